/*
 *  timesync.rs
 *
 *  GeoWx - weather and time on a serial display
 *	(c) 2020-26 Stuart Hunter
 *
 *  Periodic network time synchronisation with retries, a re-entrancy
 *  guard and the software device clock
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
use chrono::{Datelike, Local, NaiveDateTime, TimeDelta};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::ntp::NtpError;

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(5 * 60 * 60);

/// Anything that can tell the time over the network.
#[allow(async_fn_in_trait)]
pub trait TimeSource {
    async fn network_time(&mut self) -> Result<NaiveDateTime, NtpError>;
}

/// The clock the synchronised time is written to.
pub trait DeviceClock {
    fn now(&self) -> NaiveDateTime;
    fn set_local_time(&mut self, time: NaiveDateTime);
}

/// Wall clock kept in software.
///
/// Once set it runs from the set value on the monotonic clock; before that
/// it reports host local time. Clones share the same anchor.
#[derive(Debug, Clone, Default)]
pub struct SoftClock {
    anchor: Arc<Mutex<Option<(NaiveDateTime, Instant)>>>,
}

impl SoftClock {
    pub fn is_set(&self) -> bool {
        self.anchor.lock().map(|a| a.is_some()).unwrap_or(false)
    }
}

impl DeviceClock for SoftClock {
    fn now(&self) -> NaiveDateTime {
        let anchor = self.anchor.lock().ok().and_then(|a| *a);
        match anchor {
            Some((time, at)) => TimeDelta::from_std(at.elapsed())
                .ok()
                .and_then(|d| time.checked_add_signed(d))
                .unwrap_or(time),
            None => Local::now().naive_local(),
        }
    }

    fn set_local_time(&mut self, time: NaiveDateTime) {
        match self.anchor.lock() {
            Ok(mut anchor) => *anchor = Some((time, Instant::now())),
            Err(poisoned) => *poisoned.into_inner() = Some((time, Instant::now())),
        }
    }
}

/// Plausibility window for a decoded year, both ends exclusive.
pub fn is_sane_year(time: &NaiveDateTime) -> bool {
    let year = time.year();
    year > 2011 && year < 2100
}

/// Handle given to timer tasks. Ticking only raises a flag.
#[derive(Debug, Clone, Default)]
pub struct SyncTicker {
    in_flight: Arc<AtomicBool>,
    due: Arc<AtomicBool>,
}

impl SyncTicker {
    /// Request a sync; ignored while one is running.
    pub fn tick(&self) -> bool {
        if self.in_flight.load(Ordering::SeqCst) {
            debug!("NTP:: tick ignored, update in progress");
            return false;
        }
        self.due.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_due(&self) -> bool {
        self.due.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn take_due(&self) -> bool {
        self.due.swap(false, Ordering::SeqCst)
    }
}

/// Clears the in-flight flag however the update ends.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct TimeSyncService<T: TimeSource, C: DeviceClock> {
    source: T,
    clock: C,
    retries: u32,
    timezone_offset_minutes: i32,
    last_ok: bool,
    ever_ok: bool,
    ticker: SyncTicker,
    timer: Option<JoinHandle<()>>,
}

impl<T: TimeSource, C: DeviceClock> TimeSyncService<T, C> {
    pub fn new(source: T, clock: C) -> Self {
        Self {
            source,
            clock,
            retries: DEFAULT_RETRIES,
            timezone_offset_minutes: 0,
            last_ok: false,
            ever_ok: false,
            ticker: SyncTicker::default(),
            timer: None,
        }
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn ticker(&self) -> SyncTicker {
        self.ticker.clone()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn set_timezone_offset(&mut self, minutes: i32) {
        self.timezone_offset_minutes = minutes;
    }

    pub fn timezone_offset(&self) -> i32 {
        self.timezone_offset_minutes
    }

    pub fn last_sync_succeeded(&self) -> bool {
        self.last_ok
    }

    pub fn has_ever_succeeded(&self) -> bool {
        self.ever_ok
    }

    pub fn is_update_in_flight(&self) -> bool {
        self.ticker.in_flight()
    }

    /// Sync with the configured retry count.
    pub async fn sync(&mut self) -> bool {
        self.update_with_retries(self.retries).await
    }

    /// Query up to `retries` times, stopping at the first plausible time.
    ///
    /// On success the time plus the timezone offset is written to the
    /// device clock. A failed run only clears the last-sync flag.
    pub async fn update_with_retries(&mut self, retries: u32) -> bool {
        if self.ticker.in_flight.swap(true, Ordering::SeqCst) {
            debug!("NTP:: update already running");
            return self.last_ok;
        }
        let _guard = InFlight(Arc::clone(&self.ticker.in_flight));

        let before = self.clock.now();
        debug!("NTP:: checking server time, time before: {before}");
        for attempt in 1..=retries {
            let reply = self.source.network_time().await;
            let time = match reply {
                Ok(time) if is_sane_year(&time) => time,
                Ok(time) => {
                    warn!("NTP:: attempt {attempt}/{retries}: {}", NtpError::InvalidReply { year: time.year() });
                    continue;
                }
                Err(e) => {
                    warn!("NTP:: attempt {attempt}/{retries}: {e}");
                    continue;
                }
            };
            let local = time + TimeDelta::minutes(self.timezone_offset_minutes as i64);
            self.clock.set_local_time(local);
            self.last_ok = true;
            self.ever_ok = true;
            info!("NTP:: clock set to {local}, delta {} ms", (local - before).num_milliseconds());
            return true;
        }
        self.last_ok = false;
        false
    }

    /// Run a sync when a tick is pending; `None` when nothing was due.
    pub async fn run_due(&mut self) -> Option<bool> {
        if !self.ticker.take_due() {
            return None;
        }
        Some(self.sync().await)
    }

    /// Sync once now, then tick every `interval`.
    pub async fn begin_periodic_sync(&mut self, interval: Duration) -> bool {
        info!("NTP:: starting, every {} minutes", interval.as_secs() / 60);
        let ok = self.sync().await;

        if let Some(old) = self.timer.take() {
            old.abort();
        }
        let ticker = self.ticker.clone();
        self.timer = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut every = tokio::time::interval_at(start, interval);
            loop {
                every.tick().await;
                ticker.tick();
            }
        }));
        ok
    }
}

impl<T: TimeSource, C: DeviceClock> Drop for TimeSyncService<T, C> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::VecDeque;

    fn at(year: i32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    #[derive(Default)]
    struct Scripted {
        replies: VecDeque<Result<NaiveDateTime, NtpError>>,
        calls: u32,
        /// Ticks attempted from inside a query, with their outcome.
        ticker: Option<SyncTicker>,
        ticks: Vec<bool>,
    }

    impl Scripted {
        fn years(years: &[i32]) -> Self {
            Self { replies: years.iter().map(|&y| Ok(at(y))).collect(), ..Default::default() }
        }
    }

    impl TimeSource for Scripted {
        async fn network_time(&mut self) -> Result<NaiveDateTime, NtpError> {
            self.calls += 1;
            if let Some(ticker) = &self.ticker {
                self.ticks.push(ticker.tick());
            }
            self.replies.pop_front().unwrap_or(Err(NtpError::NoAddress))
        }
    }

    #[test]
    fn test_sane_year_bounds() {
        assert!(!is_sane_year(&at(2011)));
        assert!(is_sane_year(&at(2012)));
        assert!(is_sane_year(&at(2099)));
        assert!(!is_sane_year(&at(2100)));
        assert!(!is_sane_year(&at(1900)));
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let mut svc = TimeSyncService::new(Scripted::years(&[1900, 2005, 2024]), SoftClock::default());
        assert!(svc.update_with_retries(3).await);
        assert_eq!(svc.source.calls, 3);
        assert!(svc.last_sync_succeeded());
        assert!(svc.has_ever_succeeded());
        assert!(!svc.is_update_in_flight());
    }

    #[tokio::test]
    async fn test_fails_when_retries_run_out() {
        let clock = SoftClock::default();
        let mut svc = TimeSyncService::new(Scripted::years(&[1900, 2005, 2024]), clock.clone());
        assert!(!svc.update_with_retries(2).await);
        assert_eq!(svc.source.calls, 2);
        assert!(!svc.last_sync_succeeded());
        assert!(!svc.has_ever_succeeded());
        assert!(!clock.is_set());
    }

    #[tokio::test]
    async fn test_socket_errors_count_as_attempts() {
        let mut source = Scripted::years(&[2024]);
        source.replies.push_front(Err(NtpError::Timeout(Duration::from_secs(10))));
        let mut svc = TimeSyncService::new(source, SoftClock::default()).retries(2);
        assert!(svc.sync().await);
        assert_eq!(svc.source.calls, 2);
    }

    #[tokio::test]
    async fn test_clock_gets_timezone_offset() {
        let clock = SoftClock::default();
        let mut svc = TimeSyncService::new(Scripted::years(&[2024]), clock.clone());
        svc.set_timezone_offset(120);
        assert!(svc.sync().await);
        let drift = clock.now() - (at(2024) + TimeDelta::hours(2));
        assert!(drift >= TimeDelta::zero() && drift < TimeDelta::seconds(5));
    }

    #[tokio::test]
    async fn test_failed_resync_keeps_prior_state() {
        let clock = SoftClock::default();
        let mut svc = TimeSyncService::new(Scripted::years(&[2024, 1900, 1900, 1900]), clock.clone());
        svc.set_timezone_offset(-300);
        assert!(svc.sync().await);
        let set = clock.now();

        assert!(!svc.sync().await);
        assert!(!svc.last_sync_succeeded());
        assert!(svc.has_ever_succeeded());
        assert_eq!(svc.timezone_offset(), -300);
        assert!(clock.now() - set < TimeDelta::seconds(5));
    }

    #[tokio::test]
    async fn test_tick_during_update_is_ignored() {
        let mut svc = TimeSyncService::new(Scripted::years(&[2024]), SoftClock::default());
        let ticker = svc.ticker();
        svc.source.ticker = Some(ticker.clone());

        assert!(svc.sync().await);
        assert_eq!(svc.source.ticks, vec![false]);
        assert!(!ticker.is_due());
        assert_eq!(svc.run_due().await, None);
        assert_eq!(svc.source.calls, 1);
        assert!(svc.last_sync_succeeded());
    }

    #[tokio::test]
    async fn test_idle_tick_runs_on_next_poll() {
        let mut svc = TimeSyncService::new(Scripted::years(&[2024]), SoftClock::default());
        let ticker = svc.ticker();
        assert!(ticker.tick());
        assert!(ticker.is_due());
        assert_eq!(svc.run_due().await, Some(true));
        assert!(!ticker.is_due());
        assert_eq!(svc.run_due().await, None);
    }

    #[tokio::test]
    async fn test_begin_periodic_sync() {
        let mut svc = TimeSyncService::new(Scripted::years(&[2024, 2024]), SoftClock::default());
        let ticker = svc.ticker();
        assert!(svc.begin_periodic_sync(Duration::from_millis(20)).await);
        assert_eq!(svc.source.calls, 1);
        assert!(!ticker.is_due());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ticker.is_due());
        assert_eq!(svc.run_due().await, Some(true));
        assert_eq!(svc.source.calls, 2);
    }
}
