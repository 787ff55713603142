//! Environment-based configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;

use crate::archive::{Archive, ArchiveFormat};
use crate::base::{Instrument, InstrumentRegistry};
use crate::error::{Result, TrackerError};
use crate::market_data::api_parser::DEFAULT_API_ADDRESS;

const DEFAULT_FILE_STEM: &str = "commodity_prices";
const DEFAULT_DAILY_TIME: &str = "09:00";
/// One leap year
pub const MAX_HOURLY_INTERVAL_HOURS: u32 = 24 * 366;
pub const MAX_TICK_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Archive path; defaults to `commodity_prices.<format>`
    pub output_path: Option<PathBuf>,
    /// Archive format; inferred from the path when unset
    pub format: Option<ArchiveFormat>,
    pub registry: InstrumentRegistry,
    pub schedule: ScheduleConfig,
    pub quote_api: QuoteApiConfig,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub hourly_interval_hours: u32,
    pub daily_time: NaiveTime,
    /// Zone of `daily_time`. Defaults to UTC rather than the host zone, so the
    /// daily refresh fires at the same instant wherever the process runs.
    pub timezone: Tz,
    /// Sleep between trigger checks
    pub tick_secs: u64,
}

#[derive(Debug, Clone)]
pub struct QuoteApiConfig {
    pub url: String,
    pub request_timeout_secs: u64,
}

impl TrackerConfig {
    /// Loads `.env` if present, then reads `TRACKER_*` variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let format = match lookup("TRACKER_FORMAT") {
            Some(value) => Some(value.trim().to_ascii_lowercase().parse::<ArchiveFormat>().map_err(TrackerError::Config)?),
            None => None,
        };

        let registry = match lookup("TRACKER_INSTRUMENTS") {
            Some(value) => parse_instruments(&value)?,
            None => InstrumentRegistry::commodities(),
        };

        let daily_time = match lookup("TRACKER_DAILY_TIME") {
            Some(value) => parse_daily_time(&value)?,
            None => parse_daily_time(DEFAULT_DAILY_TIME)?,
        };

        let timezone = match lookup("TRACKER_TIMEZONE") {
            Some(value) => value.trim().parse::<Tz>()
                .map_err(|err| TrackerError::Config(format!("invalid TRACKER_TIMEZONE {:?}: {}", value, err)))?,
            None => Tz::UTC,
        };

        let schedule = ScheduleConfig {
            hourly_interval_hours: env_var_parse(&lookup, "TRACKER_HOURLY_INTERVAL_HOURS", 1),
            daily_time,
            timezone,
            tick_secs: env_var_parse(&lookup, "TRACKER_TICK_SECS", 60),
        };
        if !(1..=MAX_HOURLY_INTERVAL_HOURS).contains(&schedule.hourly_interval_hours) {
            return Err(TrackerError::Config(format!(
                "TRACKER_HOURLY_INTERVAL_HOURS must be between 1 and {}", MAX_HOURLY_INTERVAL_HOURS)));
        }
        if !(1..=MAX_TICK_SECS).contains(&schedule.tick_secs) {
            return Err(TrackerError::Config(format!("TRACKER_TICK_SECS must be between 1 and {}", MAX_TICK_SECS)));
        }

        Ok(TrackerConfig {
            output_path: lookup("TRACKER_OUTPUT_PATH").map(PathBuf::from),
            format,
            registry,
            schedule,
            quote_api: QuoteApiConfig {
                url: lookup("TRACKER_QUOTE_API_URL").unwrap_or_else(|| DEFAULT_API_ADDRESS.to_owned()),
                request_timeout_secs: env_var_parse(&lookup, "TRACKER_REQUEST_TIMEOUT_SECS", 15),
            },
        })
    }

    /// Explicit format, else the path extension, else CSV
    pub fn resolved_format(&self) -> ArchiveFormat {
        self.format
            .or_else(|| self.output_path.as_deref().and_then(ArchiveFormat::from_path))
            .unwrap_or(ArchiveFormat::Csv)
    }

    pub fn archive(&self) -> Archive {
        let format = self.resolved_format();
        let path = self.output_path.clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.{}", DEFAULT_FILE_STEM, format.extension())));
        Archive::new(path, format)
    }
}

impl ScheduleConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

impl QuoteApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Parses `TICKER:Name,TICKER:Name`
pub fn parse_instruments(value: &str) -> Result<InstrumentRegistry> {
    let mut instruments = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (ticker, name) = entry.split_once(':')
            .ok_or_else(|| TrackerError::Config(format!("instrument entry {:?} is not TICKER:Name", entry)))?;
        let (ticker, name) = (ticker.trim(), name.trim());
        if ticker.is_empty() || name.is_empty() {
            return Err(TrackerError::Config(format!("instrument entry {:?} is not TICKER:Name", entry)));
        }
        instruments.push(Instrument::new(ticker, name));
    }
    if instruments.is_empty() {
        return Err(TrackerError::Config("TRACKER_INSTRUMENTS is empty".to_owned()));
    }
    InstrumentRegistry::new(instruments)
        .ok_or_else(|| TrackerError::Config("TRACKER_INSTRUMENTS contains a duplicate ticker".to_owned()))
}

pub fn parse_daily_time(value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|err| TrackerError::Config(format!("invalid TRACKER_DAILY_TIME {:?}: {}", value, err)))
}

/// Parses a variable, falling back to `default` when unset or invalid
fn env_var_parse<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
