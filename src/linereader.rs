/*
 *  linereader.rs
 *
 *  GeoWx - weather and time on a serial display
 *	(c) 2020-26 Stuart Hunter
 *
 *  Feeds a response body to a line handler one newline terminated
 *  line at a time, without holding the whole document
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
use log::{debug, warn};

use crate::transport::ByteStream;

const NEWLINE: u8 = 10;
const READ_CHUNK: usize = 256;
const INITIAL_LINE_CAPACITY: usize = 128;

/// Consumer of completed lines.
pub trait LineHandler {
    fn handle_line(&mut self, line: &str);
}

/// A per-response parser: fed lines, then consumed into its record.
pub trait ResponseMachine: LineHandler + Default {
    type Record;

    fn finish(self) -> Self::Record;
}

/// Bookkeeping for one read pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadSummary {
    pub bytes: usize,
    pub lines: usize,
    /// False when the pass stopped on a read error.
    pub completed: bool,
}

/// Reads a stream and hands each newline terminated line to `handler`.
///
/// Bytes after the last newline are dropped. A read error ends the pass;
/// whatever the handler already absorbed stays valid.
pub async fn read_lines<S, H>(label: &str, stream: &mut S, handler: &mut H) -> ReadSummary
where
    S: ByteStream,
    H: LineHandler,
{
    let mut summary = ReadSummary::default();
    let mut line: Vec<u8> = Vec::with_capacity(INITIAL_LINE_CAPACITY);
    let mut chunk = [0u8; READ_CHUNK];

    debug!("{label}: reading response");
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => {
                summary.completed = true;
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("{label}: error reading response: {e}");
                break;
            }
        };
        summary.bytes += n;
        for &byte in &chunk[..n] {
            if byte == NEWLINE {
                handler.handle_line(&String::from_utf8_lossy(&line));
                summary.lines += 1;
                line.clear();
            } else {
                // Vec growth is geometric, clear() keeps the capacity
                line.push(byte);
            }
        }
    }
    if !line.is_empty() {
        debug!("{label}: dropping {} bytes after the last newline", line.len());
    }
    debug!("{label}: done, {} bytes in {} lines", summary.bytes, summary.lines);
    summary
}

/// Runs a fresh machine over the stream and returns its record.
pub async fn parse_stream<M, S>(label: &str, stream: &mut S) -> (M::Record, ReadSummary)
where
    M: ResponseMachine,
    S: ByteStream,
{
    let mut machine = M::default();
    let summary = read_lines(label, stream, &mut machine).await;
    (machine.finish(), summary)
}
