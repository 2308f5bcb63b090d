/*
 *  display/error.rs
 *
 *  GeoWx - weather and time on a serial display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Error types for the serial display sink and frame codec
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

use std::error::Error;
use std::fmt;
use std::io;

/// Error type for all display operations
#[derive(Debug)]
pub enum DisplayError {
    /// The display device could not be opened
    OpenFailed { device: String, source: io::Error },

    /// Writing a frame to the device failed
    WriteFailed(io::Error),

    /// Text that is not a well formed `[...]` frame
    InvalidFrame(String),

    /// Invalid configuration
    InvalidConfiguration(String),
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::OpenFailed { device, source } =>
                write!(f, "Cannot open display device {}: {}", device, source),
            DisplayError::WriteFailed(err) =>
                write!(f, "Display write failed: {}", err),
            DisplayError::InvalidFrame(text) =>
                write!(f, "Invalid display frame: {:?}", text),
            DisplayError::InvalidConfiguration(msg) =>
                write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl Error for DisplayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DisplayError::OpenFailed { source, .. } => Some(source),
            DisplayError::WriteFailed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for DisplayError {
    fn from(err: io::Error) -> Self {
        DisplayError::WriteFailed(err)
    }
}
