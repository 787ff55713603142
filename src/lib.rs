//! Polls commodity quotes on a schedule and archives the accumulated price
//! history to CSV or XML.

pub mod archive;
pub mod base;
pub mod config;
pub mod error;
pub mod market_data;
pub mod refresh;
pub mod schedule;
pub mod stats;

pub use archive::{Archive, ArchiveError, ArchiveFormat};
pub use base::{Instrument, InstrumentRegistry, Observation, PriceStore, RefreshType};
pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use market_data::{PriceFetcher, PriceSample, QuoteLive, QuoteProvider};
pub use refresh::RefreshLoop;
pub use schedule::Scheduler;
pub use stats::RefreshStats;
