/*
 *  timezone.rs
 *
 *  GeoWx - weather and time on a serial display
 *	(c) 2020-26 Stuart Hunter
 *
 *  Timezone lookup for a coordinate pair. The reply is one compact
 *  record, the offset is found with a single substring search
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
use log::{info, warn};

use crate::location::Location;
use crate::transport::{read_to_end, HttpTransport};

pub const DEFAULT_BASE_URL: &str = "http://api.askgeo.com/v1";

const OFFSET_MARKER: &str = "CurrentOffsetMs\":";
const MAX_REPLY_BYTES: usize = 16 * 1024;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimezoneInfo {
    /// UTC offset including daylight saving, in milliseconds.
    pub current_offset_ms: Option<i64>,
}

impl TimezoneInfo {
    pub fn offset_minutes(&self) -> Option<i32> {
        self.current_offset_ms.map(|ms| (ms / 1000 / 60) as i32)
    }
}

pub fn query_url(base_url: &str, account_id: &str, api_key: &str, location: &Location) -> String {
    format!(
        "{}/{}/{}/query.json?databases=TimeZone&points={}",
        base_url.trim_end_matches('/'),
        account_id,
        api_key,
        location.query_point()
    )
}

/// Pull the offset out of the reply text.
///
/// The value runs from the marker to the next comma; anything that does not
/// parse as an integer counts as absent.
pub fn parse_offset(body: &str) -> TimezoneInfo {
    let current_offset_ms = body.find(OFFSET_MARKER).and_then(|at| {
        let rest = &body[at + OFFSET_MARKER.len()..];
        let end = rest.find(',')?;
        rest[..end].trim().parse().ok()
    });
    TimezoneInfo { current_offset_ms }
}

/// Fetch and decode the timezone record for `url`.
pub async fn fetch_timezone<T: HttpTransport>(transport: &T, url: &str) -> TimezoneInfo {
    let mut stream = match transport.open_response_stream(url).await {
        Ok(s) => s,
        Err(e) => {
            warn!("timezone request failed: {e}");
            return TimezoneInfo::default();
        }
    };
    let body = match read_to_end(&mut stream, MAX_REPLY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!("timezone reply read failed: {e}");
            return TimezoneInfo::default();
        }
    };
    let tz = parse_offset(&String::from_utf8_lossy(&body));
    match tz.offset_minutes() {
        Some(minutes) => info!("TZ offset(+DST)={minutes} minutes"),
        None => warn!("timezone reply carried no offset"),
    }
    tz
}
