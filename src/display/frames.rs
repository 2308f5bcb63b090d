/*
 *  display/frames.rs
 *
 *  GeoWx - weather and time on a serial display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Bracketed command frames understood by the serial display
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fmt;

use crate::display::error::DisplayError;
use crate::weather::{ForecastEntry, WeatherReport};

/// Day indexes are a single digit on the wire.
pub const MAX_FORECAST_DAYS: usize = 10;

const WIND_UNIT: &str = "kph";

/// Current conditions and astronomy codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentCode {
    City,
    Condition,
    Temperature,
    Humidity,
    Icon,
    Wind,
    Sunrise,
    Sunset,
    Moon,
    Pressure,
}

impl CurrentCode {
    pub const ALL: [CurrentCode; 10] = [
        CurrentCode::City,
        CurrentCode::Condition,
        CurrentCode::Temperature,
        CurrentCode::Humidity,
        CurrentCode::Icon,
        CurrentCode::Wind,
        CurrentCode::Sunrise,
        CurrentCode::Sunset,
        CurrentCode::Moon,
        CurrentCode::Pressure,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            CurrentCode::City => "IC",
            CurrentCode::Condition => "CC",
            CurrentCode::Temperature => "CT",
            CurrentCode::Humidity => "CH",
            CurrentCode::Icon => "CI",
            CurrentCode::Wind => "CW",
            CurrentCode::Sunrise => "CR",
            CurrentCode::Sunset => "CS",
            CurrentCode::Moon => "CM",
            CurrentCode::Pressure => "CP",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

/// Per forecast day codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastCode {
    DayOfWeek,
    Low,
    High,
    Icon,
    Condition,
    /// `Y`, since `H` is taken by the high temperature.
    Humidity,
    Wind,
}

impl ForecastCode {
    pub const ALL: [ForecastCode; 7] = [
        ForecastCode::DayOfWeek,
        ForecastCode::Low,
        ForecastCode::High,
        ForecastCode::Icon,
        ForecastCode::Condition,
        ForecastCode::Humidity,
        ForecastCode::Wind,
    ];

    pub fn letter(&self) -> char {
        match self {
            ForecastCode::DayOfWeek => 'D',
            ForecastCode::Low => 'L',
            ForecastCode::High => 'H',
            ForecastCode::Icon => 'I',
            ForecastCode::Condition => 'C',
            ForecastCode::Humidity => 'Y',
            ForecastCode::Wind => 'W',
        }
    }

    fn from_letter(letter: char) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.letter() == letter)
    }
}

/// One display command, rendered as `[<code><value>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Current(CurrentCode, String),
    Forecast(ForecastCode, u8, String),
    Time(String),
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Current(code, value) => write!(f, "[{}{}]", code.code(), value),
            Frame::Forecast(code, day, value) => write!(f, "[F{}{}{}]", code.letter(), day, value),
            Frame::Time(value) => write!(f, "[T{}]", value),
        }
    }
}

impl Frame {
    /// Decode a frame as written to the wire, trailing CRLF allowed.
    pub fn parse(text: &str) -> Result<Frame, DisplayError> {
        let invalid = || DisplayError::InvalidFrame(text.to_string());
        let inner = text
            .trim_end_matches(['\r', '\n'])
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(invalid)?;

        if let Some(value) = inner.strip_prefix('T') {
            return Ok(Frame::Time(value.to_string()));
        }
        if let Some(rest) = inner.strip_prefix('F') {
            let mut chars = rest.chars();
            let code = chars.next().and_then(ForecastCode::from_letter).ok_or_else(invalid)?;
            let day = chars.next().and_then(|c| c.to_digit(10)).ok_or_else(invalid)?;
            return Ok(Frame::Forecast(code, day as u8, chars.as_str().to_string()));
        }
        let code = inner.get(..2).and_then(CurrentCode::from_code).ok_or_else(invalid)?;
        Ok(Frame::Current(code, inner[2..].to_string()))
    }

    pub fn value(&self) -> &str {
        match self {
            Frame::Current(_, value) | Frame::Forecast(_, _, value) | Frame::Time(value) => value,
        }
    }
}

/// `"<dir> <speed>kph"` back into its parts.
pub fn split_wind(value: &str) -> Option<(&str, &str)> {
    value.strip_suffix(WIND_UNIT)?.rsplit_once(' ')
}

fn wind(dir: &Option<String>, speed: &Option<String>) -> Option<String> {
    Some(format!("{} {}{}", dir.as_deref()?, speed.as_deref()?, WIND_UNIT))
}

fn clock(hour: &Option<String>, minute: &Option<String>) -> Option<String> {
    Some(format!("{}:{}", hour.as_deref()?, minute.as_deref()?))
}

fn forecast_frames(day: u8, entry: &ForecastEntry, out: &mut Vec<Frame>) {
    let fields = [
        (ForecastCode::DayOfWeek, entry.day_of_week.clone()),
        (ForecastCode::Low, entry.low.clone()),
        (ForecastCode::High, entry.high.clone()),
        (ForecastCode::Icon, entry.icon.clone()),
        (ForecastCode::Condition, entry.condition.clone()),
        (ForecastCode::Humidity, entry.humidity.clone()),
        (ForecastCode::Wind, wind(&entry.wind_dir, &entry.wind_speed)),
    ];
    for (code, value) in fields {
        if let Some(value) = value {
            out.push(Frame::Forecast(code, day, value));
        }
    }
}

/// All frames for a report.
///
/// A report without a city renders nothing. Fields that were never seen are
/// skipped; a composite value needs every part.
pub fn weather_frames(report: &WeatherReport) -> Vec<Frame> {
    if !report.is_populated() {
        return Vec::new();
    }
    let c = &report.current;
    let a = &report.astronomy;
    let fields = [
        (CurrentCode::City, c.city.clone()),
        (CurrentCode::Condition, c.condition.clone()),
        (CurrentCode::Temperature, c.temperature.clone()),
        (CurrentCode::Humidity, c.humidity.clone()),
        (CurrentCode::Icon, c.icon.clone()),
        (CurrentCode::Wind, wind(&c.wind_dir, &c.wind_speed)),
        (CurrentCode::Sunrise, clock(&a.sunrise_hour, &a.sunrise_minute)),
        (CurrentCode::Sunset, clock(&a.sunset_hour, &a.sunset_minute)),
        (CurrentCode::Moon, a.percent_illuminated.clone()),
        (CurrentCode::Pressure, c.pressure.clone()),
    ];
    let mut frames: Vec<Frame> = fields
        .into_iter()
        .filter_map(|(code, value)| value.map(|v| Frame::Current(code, v)))
        .collect();

    for (day, entry) in report.forecast.iter().take(MAX_FORECAST_DAYS).enumerate() {
        forecast_frames(day as u8, entry, &mut frames);
    }
    frames
}

/// `[T<y>/<m>/<d> <h>:<m>:<s>]`, fields unpadded.
pub fn time_frame(time: &NaiveDateTime) -> Frame {
    Frame::Time(format!(
        "{}/{}/{} {}:{}:{}",
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    ))
}
