/*
 *  location.rs
 *
 *  GeoWx - weather and time on a serial display
 *	(c) 2020-26 Stuart Hunter
 *
 *  Location service - provides lat/lng from config or geolocation lookup
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
use std::fmt;
use thiserror::Error;

use crate::geoloc::fetch_location;
use crate::transport::HttpTransport;

/// Location information with coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub city: Option<String>,
    pub region: Option<String>,
    pub source: LocationSource,
}

/// Source of location data
#[derive(Debug, Clone, PartialEq)]
pub enum LocationSource {
    UserConfig,
    GeoIP,
}

impl Location {
    /// Coordinates as they go into lookup URLs.
    pub fn query_point(&self) -> String {
        format!("{:.4},{:.4}", self.latitude, self.longitude)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            LocationSource::UserConfig => "config",
            LocationSource::GeoIP => "geoip",
        };
        if let (Some(city), Some(region)) = (&self.city, &self.region) {
            write!(f, "{}, {} ({:.4}, {:.4}) [{}]", city, region, self.latitude, self.longitude, source)
        } else {
            write!(f, "({:.4}, {:.4}) [{}]", self.latitude, self.longitude, source)
        }
    }
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("GeoIP lookup returned no usable location")]
    GeoIPFailed,
    #[error("Invalid coordinates")]
    InvalidCoordinates,
}

fn valid(lat: f64, lng: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

/// Get location from config or fallback to GeoIP lookup
pub async fn get_location<T: HttpTransport>(
    config_lat: Option<f64>,
    config_lng: Option<f64>,
    transport: &T,
    lookup_url: &str,
) -> Result<Location, LocationError> {
    // Try user-specified location from config first
    if let (Some(lat), Some(lng)) = (config_lat, config_lng) {
        if valid(lat, lng) {
            info!("Using location from config: {:.4}, {:.4}", lat, lng);
            return Ok(Location {
                latitude: lat,
                longitude: lng,
                city: None,
                region: None,
                source: LocationSource::UserConfig,
            });
        }
        warn!("Invalid coordinates in config: {}, {}", lat, lng);
        return Err(LocationError::InvalidCoordinates);
    }

    info!("No location in config, attempting GeoIP lookup...");
    let geo = fetch_location(transport, lookup_url).await;
    if !geo.is_populated() {
        warn!("GeoIP lookup produced no city");
        return Err(LocationError::GeoIPFailed);
    }
    let Some((lat, lng)) = geo.coordinates() else {
        warn!("GeoIP lookup for {:?} carried no coordinates", geo.city);
        return Err(LocationError::GeoIPFailed);
    };
    if !valid(lat, lng) {
        return Err(LocationError::InvalidCoordinates);
    }
    info!("GeoIP lookup successful: {:?}, {:?} ({:.4}, {:.4})", geo.city, geo.region, lat, lng);
    Ok(Location {
        latitude: lat,
        longitude: lng,
        city: geo.city,
        region: geo.region,
        source: LocationSource::GeoIP,
    })
}
