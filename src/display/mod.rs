/*
 *  display/mod.rs
 *
 *  GeoWx - weather and time on a serial display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display subsystem - frame rendering and the serial sink
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

use log::warn;

pub mod error;
pub mod frames;
pub mod serial;

// Re-exports for convenience
pub use error::DisplayError;
pub use frames::{time_frame, weather_frames, Frame};
pub use serial::SerialDisplay;

/// Anything frames can be sent to.
pub trait DisplaySink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), DisplayError>;
}

/// Send a batch, stopping at the first failure. Returns frames delivered.
pub fn send_frames<D: DisplaySink + ?Sized>(sink: &mut D, frames: &[Frame]) -> usize {
    for (sent, frame) in frames.iter().enumerate() {
        if let Err(e) = sink.write_frame(frame) {
            warn!("display: {e}, {} of {} frames sent", sent, frames.len());
            return sent;
        }
    }
    frames.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Limited {
        room: usize,
        got: Vec<String>,
    }

    impl DisplaySink for Limited {
        fn write_frame(&mut self, frame: &Frame) -> Result<(), DisplayError> {
            if self.got.len() == self.room {
                return Err(DisplayError::WriteFailed(std::io::ErrorKind::WriteZero.into()));
            }
            self.got.push(frame.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_send_frames_stops_on_error() {
        let frames = vec![Frame::Time("a".into()), Frame::Time("b".into()), Frame::Time("c".into())];
        let mut sink = Limited { room: 2, ..Default::default() };
        assert_eq!(send_frames(&mut sink, &frames), 2);
        assert_eq!(sink.got, vec!["[Ta]", "[Tb]"]);

        let mut sink = Limited { room: 5, ..Default::default() };
        assert_eq!(send_frames(&mut sink, &frames), 3);
    }
}
