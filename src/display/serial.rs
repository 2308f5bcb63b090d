/*
 *  display/serial.rs
 *
 *  GeoWx - weather and time on a serial display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Frame sink writing CRLF terminated commands to a serial device
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

use log::{debug, info};
use std::fs::OpenOptions;
use std::io::{self, Write};

use crate::display::error::DisplayError;
use crate::display::frames::Frame;
use crate::display::DisplaySink;

/// Device name meaning "write to standard output".
pub const STDOUT_DEVICE: &str = "-";

/// Writes each frame followed by CRLF.
///
/// The serial line itself (baud, parity) is configured outside the
/// program, e.g. with `stty`, so any writer works.
pub struct SerialDisplay<W: Write> {
    out: W,
    frames_written: usize,
}

impl SerialDisplay<Box<dyn Write + Send>> {
    /// Open a character device, or stdout for `-`.
    pub fn open(device: &str) -> Result<Self, DisplayError> {
        if device.trim().is_empty() {
            return Err(DisplayError::InvalidConfiguration("empty display device".to_string()));
        }
        let out: Box<dyn Write + Send> = if device == STDOUT_DEVICE {
            Box::new(io::stdout())
        } else {
            let file = OpenOptions::new()
                .write(true)
                .open(device)
                .map_err(|source| DisplayError::OpenFailed { device: device.to_string(), source })?;
            Box::new(file)
        };
        info!("Display output on {}", if device == STDOUT_DEVICE { "stdout" } else { device });
        Ok(Self::new(out))
    }
}

impl<W: Write> SerialDisplay<W> {
    pub fn new(out: W) -> Self {
        Self { out, frames_written: 0 }
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> DisplaySink for SerialDisplay<W> {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        debug!("display <- {}", frame);
        write!(self.out, "{}\r\n", frame)?;
        self.out.flush()?;
        self.frames_written += 1;
        Ok(())
    }
}
