use chrono::{DateTime, Utc};

pub mod api_parser;
pub mod reader;

pub use api_parser::{MarketDataError, Quote};
pub use reader::{PriceFetcher, QuoteLive};

/// Result of one fetch attempt. Both prices are `None` when the lookup failed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceSample {
    pub price: Option<f64>,
    pub previous_close: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PriceSample {
    pub fn failed(timestamp: DateTime<Utc>) -> Self {
        PriceSample { price: None, previous_close: None, timestamp }
    }
}

/// Source of per-ticker quotes
pub trait QuoteProvider {
    fn fetch_quote(&mut self, ticker: &str) -> Result<Quote, MarketDataError>;
}
