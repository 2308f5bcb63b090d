/*
 *  ntp.rs
 *
 *  GeoWx - weather and time on a serial display
 *	(c) 2020-26 Stuart Hunter
 *
 *  Single shot NTP query, RFC 2030 client request and transmit
 *  timestamp decode
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
use chrono::{Local, NaiveDate, NaiveDateTime, TimeDelta, TimeZone};
use log::debug;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};

use crate::timesync::TimeSource;

pub const DEFAULT_SERVER: &str = "time-a.nist.gov";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const NTP_PORT: u16 = 123;
pub const PACKET_LEN: usize = 48;

/// LI 0, version 3, mode 3 (client).
const CLIENT_REQUEST: u8 = 0x1B;
const TRANSMIT_OFFSET: usize = 40;

#[derive(Debug, Error)]
pub enum NtpError {
    #[error("no NTP server address configured")]
    NoAddress,
    #[error("could not resolve NTP server: {0}")]
    Resolve(io::Error),
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("reply too short, {0} bytes")]
    ShortReply(usize),
    #[error("timestamp out of calendar range")]
    Range,
    #[error("implausible time, year {year}")]
    InvalidReply { year: i32 },
}

/// Which offset is added to the decoded UTC instant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LocalOffset {
    /// Host zone setting at decode time.
    #[default]
    System,
    Utc,
    /// Fixed offset in minutes east of UTC.
    Minutes(i32),
}

impl LocalOffset {
    pub fn apply(&self, utc: NaiveDateTime) -> Option<NaiveDateTime> {
        let seconds = match self {
            LocalOffset::System => Local.offset_from_utc_datetime(&utc).local_minus_utc() as i64,
            LocalOffset::Utc => 0,
            LocalOffset::Minutes(m) => *m as i64 * 60,
        };
        utc.checked_add_signed(TimeDelta::try_seconds(seconds)?)
    }
}

impl FromStr for LocalOffset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" | "local" => Ok(LocalOffset::System),
            "utc" | "none" => Ok(LocalOffset::Utc),
            other => other
                .parse::<i32>()
                .map(LocalOffset::Minutes)
                .map_err(|_| format!("expected system, utc or minutes, got '{s}'")),
        }
    }
}

/// The transmit timestamp of a reply, seconds and fraction since 1900.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    pub fn from_reply(reply: &[u8]) -> Result<Self, NtpError> {
        if reply.len() < PACKET_LEN {
            return Err(NtpError::ShortReply(reply.len()));
        }
        let field = &reply[TRANSMIT_OFFSET..TRANSMIT_OFFSET + 8];
        Ok(Self {
            seconds: u32::from_be_bytes([field[0], field[1], field[2], field[3]]),
            fraction: u32::from_be_bytes([field[4], field[5], field[6], field[7]]),
        })
    }

    /// Milliseconds since the epoch, fraction truncated.
    pub fn millis(&self) -> u64 {
        self.seconds as u64 * 1000 + ((self.fraction as u64 * 1000) >> 32)
    }

    pub fn to_utc(&self) -> Option<NaiveDateTime> {
        let epoch = NaiveDate::from_ymd_opt(1900, 1, 1)?.and_hms_opt(0, 0, 0)?;
        epoch.checked_add_signed(TimeDelta::try_milliseconds(self.millis() as i64)?)
    }
}

pub fn request_packet() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CLIENT_REQUEST;
    packet
}

/// Add the NTP port when none is given, bracketing bare IPv6 literals.
pub fn normalize_address(addr: &str) -> Result<String, NtpError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(NtpError::NoAddress);
    }
    if addr.starts_with('[') {
        return Ok(if addr.ends_with(']') { format!("{addr}:{NTP_PORT}") } else { addr.to_string() });
    }
    Ok(match addr.matches(':').count() {
        0 => format!("{addr}:{NTP_PORT}"),
        1 => addr.to_string(),
        _ => format!("[{addr}]:{NTP_PORT}"),
    })
}

#[allow(async_fn_in_trait)]
pub trait DatagramSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Name resolution plus socket creation.
#[allow(async_fn_in_trait)]
pub trait UdpNetwork {
    type Socket: DatagramSocket;

    async fn resolve(&self, host_port: &str) -> io::Result<Vec<SocketAddr>>;
    async fn bind_for(&self, peer: SocketAddr) -> io::Result<Self::Socket>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioUdp;

impl DatagramSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf).await
    }
}

impl UdpNetwork for TokioUdp {
    type Socket = UdpSocket;

    async fn resolve(&self, host_port: &str) -> io::Result<Vec<SocketAddr>> {
        Ok(lookup_host(host_port).await?.collect())
    }

    async fn bind_for(&self, peer: SocketAddr) -> io::Result<UdpSocket> {
        let local = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await?;
        // replies from anyone but the server are dropped by the kernel
        socket.connect(peer).await?;
        Ok(socket)
    }
}

#[derive(Debug, Clone)]
pub struct NtpClient<N: UdpNetwork = TokioUdp> {
    network: N,
    server: String,
    timeout: Duration,
    local_offset: LocalOffset,
}

impl NtpClient<TokioUdp> {
    pub fn new(server: &str) -> Self {
        Self::with_network(TokioUdp, server)
    }
}

impl<N: UdpNetwork> NtpClient<N> {
    pub fn with_network(network: N, server: &str) -> Self {
        Self {
            network,
            server: server.to_string(),
            timeout: DEFAULT_TIMEOUT,
            local_offset: LocalOffset::default(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn local_offset(mut self, offset: LocalOffset) -> Self {
        self.local_offset = offset;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// One request, one reply, no retries.
    ///
    /// The reply wait is bounded by the configured timeout. The decoded
    /// instant is shifted by the client's [`LocalOffset`].
    pub async fn query(&self) -> Result<NaiveDateTime, NtpError> {
        let host_port = normalize_address(&self.server)?;
        let peer = self
            .network
            .resolve(&host_port)
            .await
            .map_err(NtpError::Resolve)?
            .into_iter()
            .next()
            .ok_or(NtpError::NoAddress)?;

        let socket = self.network.bind_for(peer).await?;
        debug!("NTP request to {host_port} ({peer})");
        socket.send_to(&request_packet(), peer).await?;

        let mut reply = [0u8; PACKET_LEN];
        let n = tokio::time::timeout(self.timeout, socket.recv(&mut reply))
            .await
            .map_err(|_| NtpError::Timeout(self.timeout))??;

        let stamp = NtpTimestamp::from_reply(&reply[..n])?;
        let utc = stamp.to_utc().ok_or(NtpError::Range)?;
        self.local_offset.apply(utc).ok_or(NtpError::Range)
    }
}

impl<N: UdpNetwork> TimeSource for NtpClient<N> {
    async fn network_time(&mut self) -> Result<NaiveDateTime, NtpError> {
        self.query().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use std::sync::{Arc, Mutex};

    fn reply_with(seconds: u32, fraction: u32) -> Vec<u8> {
        let mut r = vec![0u8; PACKET_LEN];
        r[0] = 0x1C;
        r[TRANSMIT_OFFSET..TRANSMIT_OFFSET + 4].copy_from_slice(&seconds.to_be_bytes());
        r[TRANSMIT_OFFSET + 4..TRANSMIT_OFFSET + 8].copy_from_slice(&fraction.to_be_bytes());
        r
    }

    #[derive(Clone, Default)]
    struct FakeNet {
        addrs: Vec<SocketAddr>,
        /// None means the server never answers.
        reply: Option<Vec<u8>>,
        sent: Arc<Mutex<Vec<(Vec<u8>, SocketAddr)>>>,
    }

    struct FakeSocket(FakeNet);

    impl DatagramSocket for FakeSocket {
        async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
            self.0.sent.lock().unwrap().push((buf.to_vec(), target));
            Ok(buf.len())
        }

        async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            match &self.0.reply {
                Some(r) => {
                    let n = r.len().min(buf.len());
                    buf[..n].copy_from_slice(&r[..n]);
                    Ok(n)
                }
                None => std::future::pending().await,
            }
        }
    }

    impl UdpNetwork for FakeNet {
        type Socket = FakeSocket;

        async fn resolve(&self, _host_port: &str) -> io::Result<Vec<SocketAddr>> {
            Ok(self.addrs.clone())
        }

        async fn bind_for(&self, _peer: SocketAddr) -> io::Result<FakeSocket> {
            Ok(FakeSocket(self.clone()))
        }
    }

    fn peer(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_request_packet() {
        let p = request_packet();
        assert_eq!(p.len(), 48);
        assert_eq!(p[0], 0x1B);
        assert!(p[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_reference_instant() {
        // 2024-12-01T00:00:00Z
        let ts = NtpTimestamp::from_reply(&reply_with(3_942_000_000, 0)).unwrap();
        assert_eq!(ts.millis(), 3_942_000_000_000);
        assert_eq!(ts.to_utc().unwrap().to_string(), "2024-12-01 00:00:00");

        let ts = NtpTimestamp::from_reply(&reply_with(3_943_699_200, 0)).unwrap();
        assert_eq!(ts.millis(), 3_943_699_200_000);
        assert_eq!(ts.to_utc().unwrap().to_string(), "2024-12-20 16:00:00");
    }

    #[test]
    fn test_decode_fraction_truncates() {
        let half = NtpTimestamp { seconds: 1, fraction: 0x8000_0000 };
        assert_eq!(half.millis(), 1500);
        // 0xFFFFFFFF / 2^32 s is 999.99.. ms
        let nearly = NtpTimestamp { seconds: 0, fraction: u32::MAX };
        assert_eq!(nearly.millis(), 999);
        let dt = NtpTimestamp { seconds: 3_942_000_000, fraction: 0x8000_0000 }.to_utc().unwrap();
        assert_eq!(dt.nanosecond(), 500_000_000);
    }

    #[test]
    fn test_zeroed_reply_is_1900() {
        let dt = NtpTimestamp::from_reply(&[0u8; 48]).unwrap().to_utc().unwrap();
        assert_eq!(dt.year(), 1900);
    }

    #[test]
    fn test_short_reply() {
        assert!(matches!(NtpTimestamp::from_reply(&[0u8; 47]), Err(NtpError::ShortReply(47))));
    }

    #[test]
    fn test_local_offset() {
        let utc = NtpTimestamp { seconds: 3_942_000_000, fraction: 0 }.to_utc().unwrap();
        assert_eq!(LocalOffset::Utc.apply(utc), Some(utc));
        assert_eq!(LocalOffset::Minutes(120).apply(utc).unwrap().to_string(), "2024-12-01 02:00:00");
        assert_eq!(LocalOffset::Minutes(-300).apply(utc).unwrap().to_string(), "2024-11-30 19:00:00");
        assert!(LocalOffset::System.apply(utc).is_some());

        assert_eq!("system".parse::<LocalOffset>(), Ok(LocalOffset::System));
        assert_eq!("UTC".parse::<LocalOffset>(), Ok(LocalOffset::Utc));
        assert_eq!("-330".parse::<LocalOffset>(), Ok(LocalOffset::Minutes(-330)));
        assert!("east".parse::<LocalOffset>().is_err());
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("time.google.com").unwrap(), "time.google.com:123");
        assert_eq!(normalize_address("time.google.com:321").unwrap(), "time.google.com:321");
        assert_eq!(normalize_address("127.0.0.1").unwrap(), "127.0.0.1:123");
        assert_eq!(normalize_address("::1").unwrap(), "[::1]:123");
        assert_eq!(normalize_address("[::1]").unwrap(), "[::1]:123");
        assert_eq!(normalize_address("[::1]:321").unwrap(), "[::1]:321");
        assert!(matches!(normalize_address("  "), Err(NtpError::NoAddress)));
    }

    #[tokio::test]
    async fn test_query_sends_request_and_decodes() {
        let net = FakeNet {
            addrs: vec![peer("192.0.2.1:123"), peer("192.0.2.2:123")],
            reply: Some(reply_with(3_942_000_000, 0)),
            ..Default::default()
        };
        let client = NtpClient::with_network(net.clone(), "pool.test").local_offset(LocalOffset::Utc);
        let dt = client.query().await.unwrap();
        assert_eq!(dt.to_string(), "2024-12-01 00:00:00");

        let sent = net.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, request_packet().to_vec());
        // first resolved address is used
        assert_eq!(sent[0].1, peer("192.0.2.1:123"));
    }

    #[tokio::test]
    async fn test_query_times_out() {
        let net = FakeNet { addrs: vec![peer("192.0.2.1:123")], reply: None, ..Default::default() };
        let client = NtpClient::with_network(net, "pool.test").timeout(Duration::from_millis(50));
        let started = std::time::Instant::now();
        assert!(matches!(client.query().await, Err(NtpError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_query_without_addresses() {
        let client = NtpClient::with_network(FakeNet::default(), "pool.test");
        assert!(matches!(client.query().await, Err(NtpError::NoAddress)));
    }

    #[tokio::test]
    async fn test_query_short_reply() {
        let net = FakeNet { addrs: vec![peer("192.0.2.1:123")], reply: Some(vec![0x1C; 12]), ..Default::default() };
        let client = NtpClient::with_network(net, "pool.test");
        assert!(matches!(client.query().await, Err(NtpError::ShortReply(12))));
    }

    #[tokio::test]
    async fn test_query_over_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, PACKET_LEN);
            assert_eq!(buf[0], 0x1B);
            server.send_to(&reply_with(3_943_699_200, 0), from).await.unwrap();
        });

        let client = NtpClient::new(&addr.to_string())
            .timeout(Duration::from_secs(2))
            .local_offset(LocalOffset::Minutes(60));
        let dt = client.query().await.unwrap();
        assert_eq!(dt.to_string(), "2024-12-20 17:00:00");
        assert_eq!(client.server(), addr.to_string());
    }
}
