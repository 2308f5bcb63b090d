/*
 *  weather.rs
 *
 *  GeoWx - weather and time on a serial display
 *	(c) 2020-26 Stuart Hunter
 *
 *  Current conditions, forecast days and astronomy read from the
 *  line oriented conditions/forecast/astronomy reply
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use log::{debug, info, warn};

use crate::linereader::{parse_stream, LineHandler, ResponseMachine};
use crate::location::Location;
use crate::tagscan::{scan, tag, Event, Rule};
use crate::transport::HttpTransport;

pub const DEFAULT_BASE_URL: &str = "http://api.wunderground.com/api";

#[derive(Default, Debug, Clone, PartialEq)]
pub struct CurrentConditions {
    pub city: Option<String>,
    pub condition: Option<String>,
    pub temperature: Option<String>,
    pub humidity: Option<String>,
    pub wind_dir: Option<String>,
    pub wind_speed: Option<String>,
    pub pressure: Option<String>,
    pub icon: Option<String>,
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct ForecastEntry {
    pub day_of_week: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub condition: Option<String>,
    pub icon: Option<String>,
    pub humidity: Option<String>,
    pub wind_speed: Option<String>,
    pub wind_dir: Option<String>,
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct Astronomy {
    pub percent_illuminated: Option<String>,
    pub sunrise_hour: Option<String>,
    pub sunrise_minute: Option<String>,
    pub sunset_hour: Option<String>,
    pub sunset_minute: Option<String>,
}

/// Everything one weather reply yields.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub current: CurrentConditions,
    pub astronomy: Astronomy,
    /// Fully closed forecast days, in document order.
    pub forecast: Vec<ForecastEntry>,
    /// Set once the closing </response> was seen.
    pub complete: bool,
}

impl WeatherReport {
    /// The observation city is the anchor; a report without it is "no data".
    pub fn is_populated(&self) -> bool {
        self.current.city.is_some()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WxState {
    #[default]
    Start,
    Response,
    CurrentObservation,
    ObservationLocation,
    Forecast,
    SimpleForecast,
    ForecastDays,
    ForecastDay,
    Date,
    High,
    Low,
    MaxWind,
    MoonPhase,
    Sunset,
    Sunrise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WxField {
    City,
    Condition,
    Temperature,
    Humidity,
    WindDir,
    WindSpeed,
    Pressure,
    Icon,
    DayOfWeek,
    DayHigh,
    DayLow,
    DayCondition,
    DayIcon,
    DayHumidity,
    DayWindSpeed,
    DayWindDir,
    MoonIlluminated,
    SunsetHour,
    SunsetMinute,
    SunriseHour,
    SunriseMinute,
}

type WxRule = Rule<WxState, WxField>;

const START: &[WxRule] = &[Rule::descend(tag!("response"), WxState::Response)];

const RESPONSE: &[WxRule] = &[
    Rule::descend(tag!("current_observation"), WxState::CurrentObservation),
    Rule::descend(tag!("forecast"), WxState::Forecast),
    Rule::descend(tag!("moon_phase"), WxState::MoonPhase),
    Rule::ascend(tag!("response"), WxState::Start),
];

const CURRENT_OBSERVATION: &[WxRule] = &[
    Rule::descend(tag!("observation_location"), WxState::ObservationLocation),
    Rule::leaf(tag!("weather"), WxField::Condition),
    Rule::leaf(tag!("temp_c"), WxField::Temperature),
    Rule::leaf(tag!("relative_humidity"), WxField::Humidity),
    Rule::leaf(tag!("wind_dir"), WxField::WindDir),
    Rule::leaf(tag!("wind_kph"), WxField::WindSpeed),
    Rule::leaf(tag!("pressure_mb"), WxField::Pressure),
    Rule::leaf(tag!("icon"), WxField::Icon),
    Rule::ascend(tag!("current_observation"), WxState::Response),
];

const OBSERVATION_LOCATION: &[WxRule] = &[
    Rule::leaf(tag!("city"), WxField::City),
    Rule::ascend(tag!("observation_location"), WxState::CurrentObservation),
];

const FORECAST: &[WxRule] = &[
    Rule::descend(tag!("simpleforecast"), WxState::SimpleForecast),
    Rule::ascend(tag!("forecast"), WxState::Response),
];

const SIMPLE_FORECAST: &[WxRule] = &[
    Rule::descend(tag!("forecastdays"), WxState::ForecastDays),
    Rule::ascend(tag!("simpleforecast"), WxState::Forecast),
];

const FORECAST_DAYS: &[WxRule] = &[
    Rule::descend(tag!("forecastday"), WxState::ForecastDay),
    Rule::ascend(tag!("forecastdays"), WxState::SimpleForecast),
];

const FORECAST_DAY: &[WxRule] = &[
    Rule::descend(tag!("date"), WxState::Date),
    Rule::descend(tag!("high"), WxState::High),
    Rule::descend(tag!("low"), WxState::Low),
    Rule::descend(tag!("maxwind"), WxState::MaxWind),
    Rule::leaf(tag!("conditions"), WxField::DayCondition),
    Rule::leaf(tag!("icon"), WxField::DayIcon),
    Rule::leaf(tag!("avehumidity"), WxField::DayHumidity),
    Rule::ascend(tag!("forecastday"), WxState::ForecastDays),
];

const DATE: &[WxRule] = &[
    Rule::leaf(tag!("weekday_short"), WxField::DayOfWeek),
    Rule::ascend(tag!("date"), WxState::ForecastDay),
];

const HIGH: &[WxRule] = &[
    Rule::leaf(tag!("celsius"), WxField::DayHigh),
    Rule::ascend(tag!("high"), WxState::ForecastDay),
];

const LOW: &[WxRule] = &[
    Rule::leaf(tag!("celsius"), WxField::DayLow),
    Rule::ascend(tag!("low"), WxState::ForecastDay),
];

const MAX_WIND: &[WxRule] = &[
    Rule::leaf(tag!("kph"), WxField::DayWindSpeed),
    Rule::leaf(tag!("dir"), WxField::DayWindDir),
    Rule::ascend(tag!("maxwind"), WxState::ForecastDay),
];

const MOON_PHASE: &[WxRule] = &[
    Rule::descend(tag!("sunset"), WxState::Sunset),
    Rule::descend(tag!("sunrise"), WxState::Sunrise),
    Rule::leaf(tag!("percentIlluminated"), WxField::MoonIlluminated),
    Rule::ascend(tag!("moon_phase"), WxState::Response),
];

const SUNSET: &[WxRule] = &[
    Rule::leaf(tag!("hour"), WxField::SunsetHour),
    Rule::leaf(tag!("minute"), WxField::SunsetMinute),
    Rule::ascend(tag!("sunset"), WxState::MoonPhase),
];

const SUNRISE: &[WxRule] = &[
    Rule::leaf(tag!("hour"), WxField::SunriseHour),
    Rule::leaf(tag!("minute"), WxField::SunriseMinute),
    Rule::ascend(tag!("sunrise"), WxState::MoonPhase),
];

/// Transition table row set for a state.
pub fn rules(state: WxState) -> &'static [WxRule] {
    match state {
        WxState::Start => START,
        WxState::Response => RESPONSE,
        WxState::CurrentObservation => CURRENT_OBSERVATION,
        WxState::ObservationLocation => OBSERVATION_LOCATION,
        WxState::Forecast => FORECAST,
        WxState::SimpleForecast => SIMPLE_FORECAST,
        WxState::ForecastDays => FORECAST_DAYS,
        WxState::ForecastDay => FORECAST_DAY,
        WxState::Date => DATE,
        WxState::High => HIGH,
        WxState::Low => LOW,
        WxState::MaxWind => MAX_WIND,
        WxState::MoonPhase => MOON_PHASE,
        WxState::Sunset => SUNSET,
        WxState::Sunrise => SUNRISE,
    }
}

/// Line machine for the weather reply.
#[derive(Debug, Default)]
pub struct WeatherParser {
    state: WxState,
    report: WeatherReport,
    day: Option<ForecastEntry>,
}

impl WeatherParser {
    pub fn state(&self) -> WxState {
        self.state
    }

    fn enter(&mut self, next: WxState) {
        match next {
            WxState::ForecastDays => self.report.forecast.clear(),
            WxState::ForecastDay => self.day = Some(ForecastEntry::default()),
            _ => {}
        }
        self.state = next;
    }

    fn leave(&mut self, next: WxState) {
        match self.state {
            WxState::ForecastDay => {
                if let Some(day) = self.day.take() {
                    self.report.forecast.push(day);
                }
            }
            WxState::Response => self.report.complete = true,
            _ => {}
        }
        self.state = next;
    }

    fn slot(&mut self, field: WxField) -> Option<&mut Option<String>> {
        let current = &mut self.report.current;
        let astronomy = &mut self.report.astronomy;
        let slot = match field {
            WxField::City => &mut current.city,
            WxField::Condition => &mut current.condition,
            WxField::Temperature => &mut current.temperature,
            WxField::Humidity => &mut current.humidity,
            WxField::WindDir => &mut current.wind_dir,
            WxField::WindSpeed => &mut current.wind_speed,
            WxField::Pressure => &mut current.pressure,
            WxField::Icon => &mut current.icon,
            WxField::MoonIlluminated => &mut astronomy.percent_illuminated,
            WxField::SunsetHour => &mut astronomy.sunset_hour,
            WxField::SunsetMinute => &mut astronomy.sunset_minute,
            WxField::SunriseHour => &mut astronomy.sunrise_hour,
            WxField::SunriseMinute => &mut astronomy.sunrise_minute,
            // day fields only land while a forecast day is open
            WxField::DayOfWeek => &mut self.day.as_mut()?.day_of_week,
            WxField::DayHigh => &mut self.day.as_mut()?.high,
            WxField::DayLow => &mut self.day.as_mut()?.low,
            WxField::DayCondition => &mut self.day.as_mut()?.condition,
            WxField::DayIcon => &mut self.day.as_mut()?.icon,
            WxField::DayHumidity => &mut self.day.as_mut()?.humidity,
            WxField::DayWindSpeed => &mut self.day.as_mut()?.wind_speed,
            WxField::DayWindDir => &mut self.day.as_mut()?.wind_dir,
        };
        Some(slot)
    }
}

impl LineHandler for WeatherParser {
    fn handle_line(&mut self, line: &str) {
        match scan(rules(self.state), line) {
            Some(Event::Enter(next)) => self.enter(next),
            Some(Event::Leave(next)) => self.leave(next),
            Some(Event::Value(field, Some(value))) => {
                if let Some(slot) = self.slot(field) {
                    *slot = Some(value.to_string());
                }
            }
            Some(Event::Value(field, None)) => debug!("weather: {field:?} value not on its line"),
            None => {}
        }
    }
}

impl ResponseMachine for WeatherParser {
    type Record = WeatherReport;

    /// An open forecast day is discarded.
    fn finish(self) -> WeatherReport {
        self.report
    }
}

pub fn query_url(base_url: &str, api_key: &str, location: &Location) -> String {
    format!(
        "{}/{}/conditions/forecast/astronomy/q/{}.xml",
        base_url.trim_end_matches('/'),
        api_key,
        location.query_point()
    )
}

/// Fetch and parse a fresh report.
///
/// A failed request yields an empty report; a read error part way keeps
/// whatever was parsed up to that point.
pub async fn fetch_weather<T: HttpTransport>(transport: &T, url: &str) -> WeatherReport {
    let mut stream = match transport.open_response_stream(url).await {
        Ok(s) => s,
        Err(e) => {
            warn!("weather request failed: {e}");
            return WeatherReport::default();
        }
    };
    let (report, summary) = parse_stream::<WeatherParser, _>("weather", &mut stream).await;
    if !summary.completed {
        warn!("weather reply cut short after {} lines", summary.lines);
    }
    report
}

fn show(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

/// Dump a report to the log, skipped when it holds no data.
pub fn log_report(report: &WeatherReport) {
    if !report.is_populated() {
        return;
    }
    let c = &report.current;
    let a = &report.astronomy;
    info!("City    : {}", show(&c.city));
    info!("Cond.   : {}", show(&c.condition));
    info!("Temp.   : {} C", show(&c.temperature));
    info!("Humidity: {}", show(&c.humidity));
    info!("Icon    : {}", show(&c.icon));
    info!("Wind    : {} {}kph", show(&c.wind_dir), show(&c.wind_speed));
    info!("Pressure: {}mb", show(&c.pressure));
    info!("Moon    : {} %", show(&a.percent_illuminated));
    info!("Sunrise : {}:{}", show(&a.sunrise_hour), show(&a.sunrise_minute));
    info!("Sunset  : {}:{}", show(&a.sunset_hour), show(&a.sunset_minute));
    for day in &report.forecast {
        info!(
            "Day: {} Condition: {} Low: {} High: {} Icon: {} Humidity: {} % Wind: {} {}kph",
            show(&day.day_of_week),
            show(&day.condition),
            show(&day.low),
            show(&day.high),
            show(&day.icon),
            show(&day.humidity),
            show(&day.wind_dir),
            show(&day.wind_speed),
        );
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Trimmed conditions/forecast/astronomy reply, one value per line.
    pub const REPLY: &str = r#"<?xml version="1.0" ?>
<response>
  <version>0.1</version>
  <current_observation>
    <display_location>
      <city>Display City</city>
    </display_location>
    <observation_location>
      <full>Petah Tikva, Center</full>
      <city>Petah Tikva</city>
    </observation_location>
    <weather>Partly Cloudy</weather>
    <temp_f>71</temp_f>
    <temp_c>22</temp_c>
    <relative_humidity>64%</relative_humidity>
    <wind_dir>WNW</wind_dir>
    <wind_kph>13</wind_kph>
    <pressure_mb>1015</pressure_mb>
    <icon>partlycloudy</icon>
  </current_observation>
  <forecast>
    <txt_forecast>
      <forecastdays>
        <forecastday>
          <icon>txt_icon</icon>
        </forecastday>
      </forecastdays>
    </txt_forecast>
    <simpleforecast>
      <forecastdays>
        <forecastday>
          <date>
            <epoch>1354986000</epoch>
            <weekday_short>Sat</weekday_short>
          </date>
          <high>
            <fahrenheit>73</fahrenheit>
            <celsius>23</celsius>
          </high>
          <low>
            <fahrenheit>55</fahrenheit>
            <celsius>13</celsius>
          </low>
          <conditions>Clear</conditions>
          <icon>clear</icon>
          <maxwind>
            <mph>12</mph>
            <kph>19</kph>
            <dir>West</dir>
          </maxwind>
          <avehumidity>60</avehumidity>
        </forecastday>
        <forecastday>
          <date>
            <weekday_short>Sun</weekday_short>
          </date>
          <high>
            <celsius>21</celsius>
          </high>
          <low>
            <celsius>12</celsius>
          </low>
          <conditions>Chance of Rain</conditions>
          <icon>chancerain</icon>
          <maxwind>
            <kph>24</kph>
            <dir>SW</dir>
          </maxwind>
          <avehumidity>75</avehumidity>
        </forecastday>
      </forecastdays>
    </simpleforecast>
  </forecast>
  <moon_phase>
    <percentIlluminated>81</percentIlluminated>
    <current_time>
      <hour>10</hour>
      <minute>22</minute>
    </current_time>
    <sunset>
      <hour>16</hour>
      <minute>38</minute>
    </sunset>
    <sunrise>
      <hour>6</hour>
      <minute>24</minute>
    </sunrise>
  </moon_phase>
</response>
"#;
}
