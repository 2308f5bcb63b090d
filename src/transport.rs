/*
 *  transport.rs
 *
 *  GeoWx - weather and time on a serial display
 *	(c) 2020-26 Stuart Hunter
 *
 *  HTTP request/response primitive, response bodies exposed as byte streams
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
use reqwest::{header, Client, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;

const VERSION: &'static str = concat!("GeoWx ", env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

/// Failures opening or reading a response body.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(StatusCode),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A readable response body.
#[allow(async_fn_in_trait)]
pub trait ByteStream {
    /// Fill `buf` with the next bytes of the body, 0 at end of data.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Issues a GET and hands back the body as a [`ByteStream`].
///
/// Dropping the stream closes the response.
#[allow(async_fn_in_trait)]
pub trait HttpTransport {
    type Stream: ByteStream;

    async fn open_response_stream(&self, url: &str) -> Result<Self::Stream, TransportError>;
}

/// Drain a stream, stopping at `limit` bytes.
pub async fn read_to_end<S: ByteStream>(stream: &mut S, limit: usize) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::new();
    let mut buf = [0u8; 512];
    while body.len() < limit {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let take = n.min(limit - body.len());
        body.extend_from_slice(&buf[..take]);
    }
    Ok(body)
}

/// `reqwest` backed transport with connect and read timeouts.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(read_timeout: Duration) -> Result<Self, TransportError> {
        let mut headers = header::HeaderMap::new();
        headers.insert("User-Agent", header::HeaderValue::from_static(VERSION));
        headers.insert("Connection", header::HeaderValue::from_static("close"));

        let client = Client::builder()
            .connect_timeout(read_timeout)
            .read_timeout(read_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }
}

impl HttpTransport for HttpClient {
    type Stream = ResponseStream;

    async fn open_response_stream(&self, url: &str) -> Result<ResponseStream, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        Ok(ResponseStream { response, pending: Vec::new(), pos: 0 })
    }
}

/// Body of a `reqwest` response, read chunk by chunk.
#[derive(Debug)]
pub struct ResponseStream {
    response: Response,
    pending: Vec<u8>,
    pos: usize,
}

impl ByteStream for ResponseStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.pos >= self.pending.len() {
            match self.response.chunk().await? {
                Some(chunk) => {
                    self.pending = chunk.to_vec();
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
