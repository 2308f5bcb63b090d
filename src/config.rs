use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use std::{fs, path::{Path, PathBuf}, time::Duration};
use thiserror::Error;

use crate::ntp::{self, LocalOffset};
use crate::timesync::{DEFAULT_REFRESH, DEFAULT_RETRIES};
use crate::{geoloc, timezone, weather};

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level app configuration, every field optional so layers can merge.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct Config {
    pub log_level: Option<String>,     // e.g., "info" | "debug"
    pub ntp: Option<NtpConfig>,
    pub http: Option<HttpConfig>,
    pub location: Option<LocationConfig>,
    pub timezone: Option<TimezoneConfig>,
    pub weather: Option<WeatherConfig>,
    pub display: Option<DisplayConfig>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct NtpConfig {
    pub server: Option<String>,
    pub retries: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub refresh_hours: Option<u64>,
    pub local_offset: Option<String>, // "system" | "utc" | minutes east of UTC
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct HttpConfig {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct LocationConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub lookup_url: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct TimezoneConfig {
    pub account_id: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub refresh_minutes: Option<u64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct DisplayConfig {
    pub device: Option<String>,   // serial device path, "-" for stdout
    pub time_refresh_minutes: Option<u64>,
}

/// Fully resolved settings, defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub log_level: String,
    pub ntp_server: String,
    pub ntp_retries: u32,
    pub ntp_timeout: Duration,
    pub ntp_refresh: Duration,
    pub local_offset: LocalOffset,
    pub http_timeout: Duration,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub lookup_url: String,
    pub timezone_account_id: Option<String>,
    pub timezone_api_key: Option<String>,
    pub timezone_base_url: String,
    pub weather_api_key: Option<String>,
    pub weather_base_url: String,
    pub weather_refresh: Duration,
    pub display_device: String,
    pub time_refresh: Duration,
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "geowx", version, about = "Weather and time for a serial display", disable_help_flag = false)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// Enable debug log level
    #[arg(long, short = 'v', alias = "verbose", action = ArgAction::SetTrue)]
    pub debug: bool,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub ntp_server: Option<String>,
    #[arg(long)]
    pub ntp_retries: Option<u32>,
    #[arg(long, allow_hyphen_values = true)]
    pub latitude: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub longitude: Option<f64>,
    #[arg(long)]
    pub weather_key: Option<String>,
    /// Serial device for the display, "-" writes to stdout
    #[arg(long, short = 'd', value_hint = ValueHint::FilePath)]
    pub device: Option<String>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<Config, ConfigError> {
    let cli = Cli::parse();
    let cfg = load_from(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok(cfg)
}

/// Layer defaults, YAML and CLI for an already parsed command line.
pub fn load_from(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 4) Validate
    validate(&cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/geowx/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/geowx/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/geowx.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["geowx.yaml", "config.yaml", "config/geowx.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Overwrite `dst` fields that `src` sets.
macro_rules! take_some {
    ($dst:expr, $src:expr, $($field:ident),+) => {
        $( if $src.$field.is_some() { $dst.$field = $src.$field; } )+
    };
}

/// Merge an optional group, field by field when both sides have it.
macro_rules! merge_group {
    ($dst:expr, $src:expr, $($field:ident),+) => {
        match (&mut $dst, $src) {
            (None, Some(s)) => $dst = Some(s),
            (Some(d), Some(s)) => { take_some!(d, s, $($field),+); }
            _ => {}
        }
    };
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    // top-level
    if src.log_level.is_some()      { dst.log_level = src.log_level; }
    merge_group!(dst.ntp, src.ntp, server, retries, timeout_secs, refresh_hours, local_offset);
    merge_group!(dst.http, src.http, timeout_secs);
    merge_group!(dst.location, src.location, latitude, longitude, lookup_url);
    merge_group!(dst.timezone, src.timezone, account_id, api_key, base_url);
    merge_group!(dst.weather, src.weather, api_key, base_url, refresh_minutes);
    merge_group!(dst.display, src.display, device, time_refresh_minutes);
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some()       { cfg.log_level = cli.log_level.clone(); }
    if cli.debug                     { cfg.log_level = Some("debug".into()); }

    if cli.ntp_server.is_some() || cli.ntp_retries.is_some() {
        let ntp = cfg.ntp.get_or_insert_with(NtpConfig::default);
        if cli.ntp_server.is_some()  { ntp.server = cli.ntp_server.clone(); }
        if cli.ntp_retries.is_some() { ntp.retries = cli.ntp_retries; }
    }
    if cli.latitude.is_some() || cli.longitude.is_some() {
        let location = cfg.location.get_or_insert_with(LocationConfig::default);
        if cli.latitude.is_some()    { location.latitude = cli.latitude; }
        if cli.longitude.is_some()   { location.longitude = cli.longitude; }
    }
    if cli.weather_key.is_some() {
        cfg.weather.get_or_insert_with(WeatherConfig::default).api_key = cli.weather_key.clone();
    }
    if cli.device.is_some() {
        cfg.display.get_or_insert_with(DisplayConfig::default).device = cli.device.clone();
    }
}

fn nonzero(name: &str, value: Option<u64>) -> Result<(), ConfigError> {
    match value {
        Some(0) => Err(ConfigError::Validation(format!("{name} must be > 0"))),
        _ => Ok(()),
    }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(ntp) = cfg.ntp.as_ref() {
        if ntp.retries == Some(0) {
            return Err(ConfigError::Validation("ntp retries must be > 0".into()));
        }
        nonzero("ntp timeout_secs", ntp.timeout_secs)?;
        nonzero("ntp refresh_hours", ntp.refresh_hours)?;
        if let Some(offset) = ntp.local_offset.as_deref() {
            offset.parse::<LocalOffset>().map_err(|e| ConfigError::Validation(format!("ntp local_offset: {e}")))?;
        }
        if ntp.server.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(ConfigError::Validation("ntp server must not be empty".into()));
        }
    }
    if let Some(http) = cfg.http.as_ref() {
        nonzero("http timeout_secs", http.timeout_secs)?;
    }
    if let Some(location) = cfg.location.as_ref() {
        if let Some(lat) = location.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(ConfigError::Validation("latitude must be -90..=90".into()));
            }
        }
        if let Some(lng) = location.longitude {
            if !(-180.0..=180.0).contains(&lng) {
                return Err(ConfigError::Validation("longitude must be -180..=180".into()));
            }
        }
    }
    if let Some(weather) = cfg.weather.as_ref() {
        nonzero("weather refresh_minutes", weather.refresh_minutes)?;
    }
    if let Some(display) = cfg.display.as_ref() {
        nonzero("display time_refresh_minutes", display.time_refresh_minutes)?;
        if display.device.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(ConfigError::Validation("display device must not be empty".into()));
        }
    }
    Ok(())
}

impl Config {
    /// Resolve to concrete values; call after validation.
    pub fn settings(&self) -> Settings {
        let ntp = self.ntp.clone().unwrap_or_default();
        let http = self.http.clone().unwrap_or_default();
        let location = self.location.clone().unwrap_or_default();
        let tz = self.timezone.clone().unwrap_or_default();
        let wx = self.weather.clone().unwrap_or_default();
        let display = self.display.clone().unwrap_or_default();

        Settings {
            log_level: self.log_level.clone().unwrap_or_else(|| "info".into()),
            ntp_server: ntp.server.unwrap_or_else(|| ntp::DEFAULT_SERVER.into()),
            ntp_retries: ntp.retries.unwrap_or(DEFAULT_RETRIES),
            ntp_timeout: ntp.timeout_secs.map(Duration::from_secs).unwrap_or(ntp::DEFAULT_TIMEOUT),
            ntp_refresh: ntp.refresh_hours.map(|h| Duration::from_secs(h * 60 * 60)).unwrap_or(DEFAULT_REFRESH),
            local_offset: ntp.local_offset.and_then(|o| o.parse().ok()).unwrap_or_default(),
            http_timeout: Duration::from_secs(http.timeout_secs.unwrap_or(5)),
            latitude: location.latitude,
            longitude: location.longitude,
            lookup_url: location.lookup_url.unwrap_or_else(|| geoloc::DEFAULT_LOOKUP_URL.into()),
            timezone_account_id: tz.account_id,
            timezone_api_key: tz.api_key,
            timezone_base_url: tz.base_url.unwrap_or_else(|| timezone::DEFAULT_BASE_URL.into()),
            weather_api_key: wx.api_key,
            weather_base_url: wx.base_url.unwrap_or_else(|| weather::DEFAULT_BASE_URL.into()),
            weather_refresh: Duration::from_secs(wx.refresh_minutes.unwrap_or(10) * 60),
            display_device: display.device.unwrap_or_else(|| "-".into()),
            time_refresh: Duration::from_secs(display.time_refresh_minutes.unwrap_or(3) * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn yaml_file(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("geowx").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let s = Config::default().settings();
        assert_eq!(s.ntp_server, "time-a.nist.gov");
        assert_eq!(s.ntp_retries, 3);
        assert_eq!(s.ntp_timeout, Duration::from_secs(10));
        assert_eq!(s.ntp_refresh, Duration::from_secs(5 * 3600));
        assert_eq!(s.local_offset, LocalOffset::System);
        assert_eq!(s.http_timeout, Duration::from_secs(5));
        assert_eq!(s.weather_refresh, Duration::from_secs(600));
        assert_eq!(s.time_refresh, Duration::from_secs(180));
        assert_eq!(s.display_device, "-");
        assert_eq!(s.latitude, None);
    }

    #[test]
    fn test_yaml_then_cli() {
        let f = yaml_file(
            "log_level: warn\n\
             ntp:\n  server: pool.ntp.org\n  retries: 5\n  local_offset: utc\n\
             location:\n  latitude: 32.1833\n  longitude: 34.8667\n\
             weather:\n  api_key: abc\n  refresh_minutes: 15\n\
             display:\n  device: /dev/ttyUSB0\n",
        );
        let path = f.path().to_str().unwrap();
        let cfg = load_from(&cli(&["--config", path, "--ntp-retries", "2", "--longitude", "-0.5"])).unwrap();
        let s = cfg.settings();
        assert_eq!(s.log_level, "warn");
        assert_eq!(s.ntp_server, "pool.ntp.org");
        assert_eq!(s.ntp_retries, 2);
        assert_eq!(s.local_offset, LocalOffset::Utc);
        assert_eq!(s.latitude, Some(32.1833));
        assert_eq!(s.longitude, Some(-0.5));
        assert_eq!(s.weather_api_key.as_deref(), Some("abc"));
        assert_eq!(s.weather_refresh, Duration::from_secs(900));
        assert_eq!(s.display_device, "/dev/ttyUSB0");
    }

    #[test]
    fn test_debug_flag_wins() {
        let f = yaml_file("log_level: warn\n");
        let cfg = load_from(&cli(&["--config", f.path().to_str().unwrap(), "-v"])).unwrap();
        assert_eq!(cfg.settings().log_level, "debug");
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut dst = Config {
            ntp: Some(NtpConfig { server: Some("a".into()), retries: Some(4), ..Default::default() }),
            ..Default::default()
        };
        let src = Config {
            ntp: Some(NtpConfig { server: Some("b".into()), ..Default::default() }),
            display: Some(DisplayConfig { device: Some("/dev/x".into()), ..Default::default() }),
            ..Default::default()
        };
        merge(&mut dst, src);
        let ntp = dst.ntp.unwrap();
        assert_eq!(ntp.server.as_deref(), Some("b"));
        assert_eq!(ntp.retries, Some(4));
        assert_eq!(dst.display.unwrap().device.as_deref(), Some("/dev/x"));
    }

    #[test]
    fn test_validation_errors() {
        for body in [
            "ntp:\n  retries: 0\n",
            "ntp:\n  timeout_secs: 0\n",
            "ntp:\n  local_offset: eastish\n",
            "http:\n  timeout_secs: 0\n",
            "location:\n  latitude: 91.0\n",
            "weather:\n  refresh_minutes: 0\n",
            "display:\n  device: ''\n",
        ] {
            let f = yaml_file(body);
            let r = load_from(&cli(&["--config", f.path().to_str().unwrap()]));
            assert!(matches!(r, Err(ConfigError::Validation(_))), "{body}");
        }
    }

    #[test]
    fn test_missing_and_broken_files() {
        let r = load_from(&cli(&["--config", "/nonexistent/geowx.yaml"]));
        assert!(matches!(r, Err(ConfigError::Validation(_))));

        let f = yaml_file("ntp: [not, a, map\n");
        let r = load_from(&cli(&["--config", f.path().to_str().unwrap()]));
        assert!(matches!(r, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_local_offset_minutes() {
        let f = yaml_file("ntp:\n  local_offset: '-300'\n");
        let cfg = load_from(&cli(&["--config", f.path().to_str().unwrap()])).unwrap();
        assert_eq!(cfg.settings().local_offset, LocalOffset::Minutes(-300));
    }
}
