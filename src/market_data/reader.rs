use std::time::Duration;

use chrono::Utc;

use super::api_parser::{self, MarketDataError, Quote};
use super::{PriceSample, QuoteProvider};

/// Live quotes from the chart API, one blocking request per ticker
pub struct QuoteLive {
    agent: ureq::Agent,
    api_address: String,
}

impl QuoteLive {
    pub fn new() -> Self {
        QuoteLive::with_address(api_parser::DEFAULT_API_ADDRESS, Duration::from_secs(15))
    }

    pub fn with_address(api_address: &str, timeout: Duration) -> Self {
        QuoteLive {
            agent: api_parser::new_agent(timeout),
            api_address: api_address.to_owned(),
        }
    }
}

impl Default for QuoteLive {
    fn default() -> Self {
        QuoteLive::new()
    }
}

impl QuoteProvider for QuoteLive {
    fn fetch_quote(&mut self, ticker: &str) -> Result<Quote, MarketDataError> {
        api_parser::fetch_api_quote(&self.agent, &self.api_address, ticker)
    }
}

/// Wraps a provider so that a lookup never fails past this boundary
pub struct PriceFetcher<P> {
    provider: P,
}

impl<P: QuoteProvider> PriceFetcher<P> {
    pub fn new(provider: P) -> Self {
        PriceFetcher { provider }
    }

    pub fn fetch(&mut self, ticker: &str) -> PriceSample {
        match self.provider.fetch_quote(ticker) {
            Ok(quote) => PriceSample {
                price: quote.price,
                previous_close: quote.previous_close,
                timestamp: Utc::now(),
            },
            Err(err) => {
                tracing::error!(ticker, error = %err, "Error fetching quote");
                PriceSample::failed(Utc::now())
            }
        }
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }
}
