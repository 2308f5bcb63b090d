/*
 *  app.rs
 *
 *  GeoWx - weather and time on a serial display
 *	(c) 2020-26 Stuart Hunter
 *
 *  Application context: owns the services and records, raises work
 *  flags from timers and does the work from the main loop
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
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::display::{send_frames, time_frame, weather_frames, DisplaySink};
use crate::location::{get_location, Location};
use crate::timesync::{DeviceClock, SoftClock, TimeSource, TimeSyncService};
use crate::timezone::{self, TimezoneInfo};
use crate::transport::HttpTransport;
use crate::weather::{self, WeatherReport};

pub const MAIN_LOOP_PERIOD: Duration = Duration::from_secs(1);
const FIRST_TIME_DISPLAY: Duration = Duration::from_secs(3);
const FIRST_WEATHER: Duration = Duration::from_secs(4);

/// Work requests raised by timers and the button, consumed by the main loop.
#[derive(Debug, Clone, Default)]
pub struct Flags {
    pub weather: Arc<AtomicBool>,
    pub time: Arc<AtomicBool>,
}

impl Flags {
    /// Button press: refresh everything.
    pub fn raise_all(&self) {
        self.weather.store(true, Ordering::SeqCst);
        self.time.store(true, Ordering::SeqCst);
    }

    fn take(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::SeqCst)
    }
}

/// Raise `flag` after `first`, then every `every`.
fn flag_timer(flag: Arc<AtomicBool>, first: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + first, every);
        loop {
            interval.tick().await;
            flag.store(true, Ordering::SeqCst);
        }
    })
}

pub struct AppContext<T: HttpTransport, S: TimeSource, D: DisplaySink> {
    settings: Settings,
    transport: T,
    sync: TimeSyncService<S, SoftClock>,
    display: D,
    flags: Flags,
    location: Option<Location>,
    timezone: TimezoneInfo,
    weather: WeatherReport,
    timers: Vec<JoinHandle<()>>,
}

impl<T: HttpTransport, S: TimeSource, D: DisplaySink> AppContext<T, S, D> {
    pub fn new(settings: Settings, transport: T, source: S, display: D) -> Self {
        let sync = TimeSyncService::new(source, SoftClock::default()).retries(settings.ntp_retries);
        Self {
            settings,
            transport,
            sync,
            display,
            flags: Flags::default(),
            location: None,
            timezone: TimezoneInfo::default(),
            weather: WeatherReport::default(),
            timers: Vec::new(),
        }
    }

    pub fn flags(&self) -> Flags {
        self.flags.clone()
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn weather(&self) -> &WeatherReport {
        &self.weather
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn time_sync(&self) -> &TimeSyncService<S, SoftClock> {
        &self.sync
    }

    /// Location, timezone, first time sync, then the refresh timers.
    pub async fn init(&mut self) {
        self.resolve_location().await;
        self.lookup_timezone().await;

        if !self.sync.begin_periodic_sync(self.settings.ntp_refresh).await {
            warn!("Initial time sync failed, will retry on the next time display");
        }
        self.start_timers();
    }

    async fn resolve_location(&mut self) {
        let s = &self.settings;
        match get_location(s.latitude, s.longitude, &self.transport, &s.lookup_url).await {
            Ok(location) => {
                info!("Location: {}", location);
                self.location = Some(location);
            }
            Err(e) => warn!("Location unknown: {}", e),
        }
    }

    async fn lookup_timezone(&mut self) {
        let Some(location) = self.location.as_ref() else {
            return;
        };
        let (Some(account), Some(key)) = (&self.settings.timezone_account_id, &self.settings.timezone_api_key) else {
            info!("No timezone account configured, clock stays at UTC plus local offset");
            return;
        };
        let url = timezone::query_url(&self.settings.timezone_base_url, account, key, location);
        self.timezone = timezone::fetch_timezone(&self.transport, &url).await;
        if let Some(minutes) = self.timezone.offset_minutes() {
            self.sync.set_timezone_offset(minutes);
        }
    }

    fn start_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        self.timers.push(flag_timer(Arc::clone(&self.flags.time), FIRST_TIME_DISPLAY, self.settings.time_refresh));
        self.timers.push(flag_timer(Arc::clone(&self.flags.weather), FIRST_WEATHER, self.settings.weather_refresh));
        info!(
            "Time display every {} min, weather every {} min",
            self.settings.time_refresh.as_secs() / 60,
            self.settings.weather_refresh.as_secs() / 60
        );
    }

    /// One pass of the main loop: do whatever the flags ask for.
    pub async fn poll(&mut self) {
        if Flags::take(&self.flags.weather) {
            self.refresh_weather().await;
        }
        if Flags::take(&self.flags.time) {
            self.send_time().await;
        }
        if let Some(ok) = self.sync.run_due().await {
            debug!("Scheduled time sync: {}", if ok { "ok" } else { "failed" });
        }
    }

    /// Fetch a fresh report and send it. Returns frames written.
    pub async fn refresh_weather(&mut self) -> usize {
        let Some(location) = self.location.as_ref() else {
            warn!("Weather skipped, location unknown");
            return 0;
        };
        let Some(key) = self.settings.weather_api_key.as_deref() else {
            warn!("Weather skipped, no API key configured");
            return 0;
        };
        let url = weather::query_url(&self.settings.weather_base_url, key, location);
        self.weather = weather::fetch_weather(&self.transport, &url).await;
        weather::log_report(&self.weather);
        send_frames(&mut self.display, &weather_frames(&self.weather))
    }

    /// Send the clock, retrying the sync first if the last one failed.
    pub async fn send_time(&mut self) -> bool {
        if !self.sync.last_sync_succeeded() {
            self.sync.sync().await;
        }
        if !self.sync.has_ever_succeeded() {
            debug!("No valid time yet, time display skipped");
            return false;
        }
        let now = self.sync.clock().now();
        info!("Send time to display: {}", now);
        send_frames(&mut self.display, &[time_frame(&now)]) == 1
    }

    /// Poll forever at `period`.
    pub async fn run(&mut self, period: Duration) {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            self.poll().await;
        }
    }
}

impl<T: HttpTransport, S: TimeSource, D: DisplaySink> Drop for AppContext<T, S, D> {
    fn drop(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}
