//! Persisted form of the price store.
//!
//! The whole store is rewritten on every save. Bytes are staged in a sibling
//! `.tmp` file and renamed over the target, so a failed write leaves the
//! previous archive in place.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::base::{InstrumentRegistry, PriceStore, UnknownRefreshType};

pub mod csv_archive;
pub mod xml_archive;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("XML attribute error: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("invalid timestamp {value:?}: {source}")]
    Timestamp { value: String, source: chrono::ParseError },
    #[error("local timestamp {0:?} does not exist on this host")]
    NonexistentLocalTime(String),
    #[error("invalid price {0:?}")]
    InvalidPrice(String),
    #[error(transparent)]
    RefreshType(#[from] UnknownRefreshType),
    #[error("malformed archive: {0}")]
    Malformed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Csv,
    Xml,
}

impl ArchiveFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        extension.parse().ok()
    }

    pub fn extension(&self) -> &'static str {
        match *self {
            ArchiveFormat::Csv => "csv",
            ArchiveFormat::Xml => "xml",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(input: &str) -> Result<ArchiveFormat, Self::Err> {
        match input {
            "csv" => Ok(ArchiveFormat::Csv),
            "xml" => Ok(ArchiveFormat::Xml),
            _ => Err(format!("unknown archive format: {}", input)),
        }
    }
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// RFC 3339, or an offset-less `YYYY-MM-DDTHH:MM:SS[.ffffff]` read as host local time
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ArchiveError> {
    let rfc3339_err = match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => return Ok(ts.with_timezone(&Utc)),
        Err(err) => err,
    };
    let naive = NaiveDateTime::parse_from_str(value, NAIVE_TIMESTAMP_FORMAT)
        .map_err(|_err| ArchiveError::Timestamp { value: value.to_owned(), source: rfc3339_err })?;
    Local.from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
        .ok_or_else(|| ArchiveError::NonexistentLocalTime(value.to_owned()))
}

pub fn parse_price(value: &str) -> Result<f64, ArchiveError> {
    value.trim().parse::<f64>().map_err(|_err| ArchiveError::InvalidPrice(value.to_owned()))
}

/// Blank or `None` means no value
pub fn parse_optional_price(value: &str) -> Result<Option<f64>, ArchiveError> {
    match value.trim() {
        "" | "None" => Ok(None),
        price => parse_price(price).map(Some),
    }
}

#[derive(Clone, Debug)]
pub struct Archive {
    path: PathBuf,
    format: ArchiveFormat,
}

impl Archive {
    pub fn new<P: Into<PathBuf>>(path: P, format: ArchiveFormat) -> Self {
        Archive { path: path.into(), format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn encode(&self, store: &PriceStore) -> Result<Vec<u8>, ArchiveError> {
        match self.format {
            ArchiveFormat::Csv => csv_archive::encode(store),
            ArchiveFormat::Xml => xml_archive::encode(store, Utc::now()),
        }
    }

    pub fn decode(&self, text: &str, registry: &InstrumentRegistry) -> Result<PriceStore, ArchiveError> {
        match self.format {
            ArchiveFormat::Csv => csv_archive::decode(text, registry),
            ArchiveFormat::Xml => xml_archive::decode(text, registry),
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut staging = OsString::from(self.path.as_os_str());
        staging.push(".tmp");
        PathBuf::from(staging)
    }

    /// Overwrites the archive with the full contents of `store`
    pub fn save(&self, store: &PriceStore) -> Result<(), ArchiveError> {
        let bytes = self.encode(store)?;
        let staging = self.staging_path();
        if let Err(err) = fs::write(&staging, &bytes).and_then(|()| fs::rename(&staging, &self.path)) {
            let _ = fs::remove_file(&staging);
            return Err(err.into());
        }
        debug!(path = %self.path.display(), bytes = bytes.len(), observations = store.len(), "Archive written");
        Ok(())
    }

    /// Reads the archive. `Ok(None)` means there is no file yet.
    pub fn try_load(&self, registry: &InstrumentRegistry) -> Result<Option<PriceStore>, ArchiveError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        self.decode(&text, registry).map(Some)
    }

    /// Startup load: a missing file or any read/parse failure yields an empty store
    pub fn load(&self, registry: &InstrumentRegistry) -> PriceStore {
        match self.try_load(registry) {
            Ok(Some(store)) => {
                info!(path = %self.path.display(), observations = store.len(), "Loaded existing data");
                store
            }
            Ok(None) => {
                info!(path = %self.path.display(), "No existing {} file found, starting fresh", self.format);
                PriceStore::new(registry)
            }
            Err(err) => {
                error!(path = %self.path.display(), error = %err, "Error loading data, starting fresh");
                PriceStore::new(registry)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{Instrument, Observation, RefreshType};
    use chrono::TimeZone;

    fn sample_store(registry: &InstrumentRegistry) -> PriceStore {
        let mut store = PriceStore::new(registry);
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        store.append("GC=F", Observation {
            timestamp: ts,
            price: 1950.5,
            previous_close: Some(1945.0),
            refresh_type: RefreshType::Hourly,
        });
        store.append("GC=F", Observation {
            timestamp: ts + chrono::Duration::hours(1),
            price: 1951.25,
            previous_close: None,
            refresh_type: RefreshType::Daily,
        });
        store.append("SI=F", Observation {
            timestamp: ts,
            price: 23.41,
            previous_close: Some(23.1),
            refresh_type: RefreshType::Hourly,
        });
        store
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ArchiveFormat::from_path(Path::new("prices.XML")), Some(ArchiveFormat::Xml));
        assert_eq!(ArchiveFormat::from_path(Path::new("dir/prices.csv")), Some(ArchiveFormat::Csv));
        assert_eq!(ArchiveFormat::from_path(Path::new("prices")), None);
    }

    #[test]
    fn test_timestamp_keeps_precision() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + chrono::Duration::nanoseconds(1);
        assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_offsetless_timestamp_is_host_local() {
        let naive = NaiveDateTime::parse_from_str("2024-03-01T09:00:00.123456", NAIVE_TIMESTAMP_FORMAT).unwrap();
        let expected = Local.from_local_datetime(&naive).earliest().unwrap().with_timezone(&Utc);
        assert_eq!(parse_timestamp("2024-03-01T09:00:00.123456").unwrap(), expected);

        let whole_seconds = NaiveDateTime::parse_from_str("2024-03-01T09:00:00", NAIVE_TIMESTAMP_FORMAT).unwrap();
        let expected = Local.from_local_datetime(&whole_seconds).earliest().unwrap().with_timezone(&Utc);
        assert_eq!(parse_timestamp("2024-03-01T09:00:00").unwrap(), expected);
    }

    #[test]
    fn test_optional_price() {
        assert_eq!(parse_optional_price("1945.0").unwrap(), Some(1945.0));
        assert_eq!(parse_optional_price("").unwrap(), None);
        assert_eq!(parse_optional_price("None").unwrap(), None);
        assert!(parse_optional_price("n/a").is_err());
    }

    #[test]
    fn test_save_and_load_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstrumentRegistry::commodities();
        let store = sample_store(&registry);

        for format in [ArchiveFormat::Csv, ArchiveFormat::Xml] {
            let path = dir.path().join(format!("prices.{}", format));
            let archive = Archive::new(&path, format);
            archive.save(&store).unwrap();
            assert!(!archive.staging_path().exists());

            let loaded = archive.try_load(&registry).unwrap().unwrap();
            assert_eq!(loaded, store);
        }
    }

    #[test]
    fn test_missing_and_empty_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstrumentRegistry::commodities();

        let missing = Archive::new(dir.path().join("missing.csv"), ArchiveFormat::Csv);
        assert!(missing.try_load(&registry).unwrap().is_none());
        assert!(missing.load(&registry).is_empty());

        for format in [ArchiveFormat::Csv, ArchiveFormat::Xml] {
            let path = dir.path().join(format!("empty.{}", format));
            fs::write(&path, "").unwrap();
            assert!(Archive::new(&path, format).load(&registry).is_empty());
        }
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstrumentRegistry::commodities();
        let path = dir.path().join("prices.csv");
        fs::write(&path, "Ticker,Commodity,Timestamp,RefreshType,CurrentPrice,PreviousClose\n\
            GC=F,Gold,2024-03-01T09:00:00Z,hourly,1950.5,1945\n\
            GC=F,Gold,not-a-time,hourly,1951,1945\n").unwrap();

        let archive = Archive::new(&path, ArchiveFormat::Csv);
        assert!(archive.try_load(&registry).is_err());
        assert!(archive.load(&registry).is_empty());
    }

    #[test]
    fn test_save_failure_keeps_store() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstrumentRegistry::new(vec![Instrument::new("GC=F", "Gold")]).unwrap();
        let store = sample_store(&registry);
        let archive = Archive::new(dir.path().join("no_such_dir").join("prices.csv"), ArchiveFormat::Csv);
        assert!(archive.save(&store).is_err());
        assert_eq!(store.observations("GC=F").len(), 2);
    }

    #[test]
    fn test_failed_save_removes_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InstrumentRegistry::commodities();
        let path = dir.path().join("prices.csv");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), "x").unwrap();

        let archive = Archive::new(&path, ArchiveFormat::Csv);
        assert!(archive.save(&sample_store(&registry)).is_err());
        assert!(!archive.staging_path().exists());
        assert!(path.is_dir());
    }
}
