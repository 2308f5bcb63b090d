/*
 *  geoloc.rs
 *
 *  GeoWx - weather and time on a serial display
 *	(c) 2020-26 Stuart Hunter
 *
 *  IP geolocation lookup, the reply is a small line oriented
 *  document with the values inside an <info> section
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
use log::warn;

use crate::linereader::{parse_stream, LineHandler, ResponseMachine};
use crate::tagscan::{scan, tag, Event, Rule};
use crate::transport::HttpTransport;

pub const DEFAULT_LOOKUP_URL: &str = "http://www.geobytes.com/IpLocator.htm?GetLocation&Template=XML.txt";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub external_ip_address: Option<String>,
    /// Set once the closing </info> was seen.
    pub complete: bool,
}

impl GeoLocation {
    /// City is the anchor field, without it the lookup produced nothing usable.
    pub fn is_populated(&self) -> bool {
        self.city.is_some()
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let lat = self.latitude.as_deref()?.trim().parse().ok()?;
        let lng = self.longitude.as_deref()?.trim().parse().ok()?;
        Some((lat, lng))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum GeoState {
    #[default]
    Start,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoField {
    Country,
    Region,
    City,
    Latitude,
    Longitude,
    IpAddress,
}

const START_RULES: &[Rule<GeoState, GeoField>] = &[Rule::descend(tag!("info"), GeoState::Info)];

const INFO_RULES: &[Rule<GeoState, GeoField>] = &[
    Rule::leaf(tag!("country"), GeoField::Country),
    Rule::leaf(tag!("region"), GeoField::Region),
    Rule::leaf(tag!("city"), GeoField::City),
    Rule::leaf(tag!("latitude"), GeoField::Latitude),
    Rule::leaf(tag!("longitude"), GeoField::Longitude),
    Rule::leaf(tag!("ipaddress"), GeoField::IpAddress),
    Rule::ascend(tag!("info"), GeoState::Start),
];

pub fn rules(state: GeoState) -> &'static [Rule<GeoState, GeoField>] {
    match state {
        GeoState::Start => START_RULES,
        GeoState::Info => INFO_RULES,
    }
}

/// Line machine for the geolocation reply.
#[derive(Debug, Default)]
pub struct GeoParser {
    state: GeoState,
    record: GeoLocation,
}

impl GeoParser {
    pub fn state(&self) -> GeoState {
        self.state
    }
}

impl LineHandler for GeoParser {
    fn handle_line(&mut self, line: &str) {
        match scan(rules(self.state), line) {
            Some(Event::Enter(next)) => self.state = next,
            Some(Event::Leave(next)) => {
                self.state = next;
                self.record.complete = true;
            }
            Some(Event::Value(field, Some(value))) => {
                let slot = match field {
                    GeoField::Country => &mut self.record.country,
                    GeoField::Region => &mut self.record.region,
                    GeoField::City => &mut self.record.city,
                    GeoField::Latitude => &mut self.record.latitude,
                    GeoField::Longitude => &mut self.record.longitude,
                    GeoField::IpAddress => &mut self.record.external_ip_address,
                };
                *slot = Some(value.to_string());
            }
            Some(Event::Value(_, None)) | None => {}
        }
    }
}

impl ResponseMachine for GeoParser {
    type Record = GeoLocation;

    fn finish(self) -> GeoLocation {
        self.record
    }
}

/// Look up where the public address of this device is.
///
/// Transport failures are logged and yield an empty record.
pub async fn fetch_location<T: HttpTransport>(transport: &T, url: &str) -> GeoLocation {
    let mut stream = match transport.open_response_stream(url).await {
        Ok(s) => s,
        Err(e) => {
            warn!("geolocation request failed: {e}");
            return GeoLocation::default();
        }
    };
    let (record, _) = parse_stream::<GeoParser, _>("geoloc", &mut stream).await;
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::FakeTransport;
    use crate::tagscan::Transition;

    const REPLY: &str = "<?xml version=\"1.0\"?>\r\n\
        <city>Before Info</city>\r\n\
        <geobytes>\r\n\
        <info>\r\n\
        \t<ipaddress>203.0.113.7</ipaddress>\r\n\
        \t<country>Israel</country>\r\n\
        \t<region>Tel Aviv</region>\r\n\
        \t<city>Petah Tiqwa</city>\r\n\
        \t<latitude>32.0833</latitude>\r\n\
        \t<longitude>34.8833</longitude>\r\n\
        \t<timezone>+02:00</timezone>\r\n\
        </info>\r\n\
        <city>After Info</city>\r\n\
        </geobytes>\r\n";

    fn feed(lines: &str) -> GeoParser {
        let mut p = GeoParser::default();
        for l in lines.split('\n') {
            p.handle_line(l);
        }
        p
    }

    #[test]
    fn test_full_reply() {
        let p = feed(REPLY);
        assert_eq!(p.state(), GeoState::Start);
        let r = p.finish();
        assert!(r.complete);
        assert!(r.is_populated());
        assert_eq!(r.city.as_deref(), Some("Petah Tiqwa"));
        assert_eq!(r.country.as_deref(), Some("Israel"));
        assert_eq!(r.region.as_deref(), Some("Tel Aviv"));
        assert_eq!(r.external_ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(r.coordinates(), Some((32.0833, 34.8833)));
    }

    #[test]
    fn test_last_occurrence_wins_and_missing_value_keeps_previous() {
        let p = feed("<info>\n<city>One</city>\n<city>Two</city>\n<city>Three\n</info>\n");
        assert_eq!(p.finish().city.as_deref(), Some("Two"));
    }

    #[test]
    fn test_unterminated_info_is_not_complete() {
        let r = feed("<info>\n<city>Nowhere</city>\n").finish();
        assert!(!r.complete);
        assert_eq!(r.city.as_deref(), Some("Nowhere"));
        assert_eq!(r.coordinates(), None);
    }

    #[test]
    fn test_every_descend_has_a_way_back() {
        for state in [GeoState::Start, GeoState::Info] {
            for rule in rules(state) {
                if let Transition::Descend(child) = rule.transition {
                    assert!(rules(child).iter().any(|r| r.tag == rule.tag
                        && r.transition == Transition::Ascend(state)));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_location() {
        let t = FakeTransport::default().with(DEFAULT_LOOKUP_URL, REPLY);
        let r = fetch_location(&t, DEFAULT_LOOKUP_URL).await;
        assert_eq!(r.city.as_deref(), Some("Petah Tiqwa"));

        let r = fetch_location(&t, "http://unreachable/").await;
        assert_eq!(r, GeoLocation::default());
    }
}
