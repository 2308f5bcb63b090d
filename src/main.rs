/*
 *  main.rs
 *
 *  GeoWx - weather and time on a serial display
 *	(c) 2020-26 Stuart Hunter
 *
 *  Finds where it is, keeps the clock in sync and sends time and
 *  weather to a serial display on a schedule
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
use env_logger::Env;

#[cfg(unix)] // Only compile this block on Unix-like systems
use tokio::signal::unix::{signal, SignalKind}; // Import specific Unix signals

mod app;
mod config;
mod display;
mod geoloc;
mod linereader;
mod location;
mod ntp;
mod tagscan;
mod timesync;
mod timezone;
mod transport;
mod weather;

use app::{AppContext, Flags, MAIN_LOOP_PERIOD};
use display::SerialDisplay;
use ntp::NtpClient;
use transport::HttpClient;

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Asynchronously waits for a SIGINT, SIGTERM, or SIGHUP signal.
/// Once a signal is caught it is logged and the function returns,
/// allowing for graceful shutdown.
async fn signal_handler() -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

/// SIGUSR1 stands in for the push button: refresh weather and time now.
async fn button_handler(flags: Flags) -> std::io::Result<()> {
    let mut usr1 = signal(SignalKind::user_defined1())?;
    while usr1.recv().await.is_some() {
        info!("Button (SIGUSR1): refreshing weather and time");
        flags.raise_all();
    }
    Ok(())
}

#[tokio::main] // Requires the `tokio` runtime with `macros` and `rt-multi-thread` features
async fn main() -> anyhow::Result<()> {
    let settings = config::load()?.settings();

    // Initialize the logger with the configured level
    env_logger::Builder::from_env(Env::default().default_filter_or(settings.log_level.as_str()))
        .format_timestamp_secs()
        .init();

    info!("{} - weather and time on a serial display", env!("CARGO_PKG_NAME"));
    info!("v.{} built {} ({})", env!("CARGO_PKG_VERSION"), BUILD_DATE, BUILD_PROFILE);
    info!("NTP server {}, {} retries", settings.ntp_server, settings.ntp_retries);

    let transport = HttpClient::new(settings.http_timeout)?;
    let ntp = NtpClient::new(&settings.ntp_server)
        .timeout(settings.ntp_timeout)
        .local_offset(settings.local_offset);
    let display = SerialDisplay::open(&settings.display_device)?;

    let mut app = AppContext::new(settings, transport, ntp, display);

    let flags = app.flags();
    tokio::spawn(async move {
        if let Err(e) = button_handler(flags).await {
            warn!("Button handler unavailable: {}", e);
        }
    });

    app.init().await;

    // Main application loop
    tokio::select! {
        // Handle Unix signals for graceful shutdown
        _ = signal_handler() => {}
        _ = app.run(MAIN_LOOP_PERIOD) => {}
    }

    info!(
        "Main application exiting, {} frames sent, clock {}.",
        app.display().frames_written(),
        if app.time_sync().has_ever_succeeded() { "synced" } else { "never synced" }
    );
    Ok(())
}
