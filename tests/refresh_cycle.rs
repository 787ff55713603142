//! End-to-end refresh/persist cycles through the public API.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use commodity_archiver::market_data::{MarketDataError, Quote};
use commodity_archiver::{
    Archive,
    ArchiveFormat,
    Instrument,
    InstrumentRegistry,
    PriceFetcher,
    QuoteProvider,
    RefreshLoop,
    RefreshType,
};

/// Quote source whose answers can be changed between cycles
#[derive(Default)]
struct TestProvider {
    quotes: HashMap<String, Quote>,
}

impl TestProvider {
    fn set(&mut self, ticker: &str, price: Option<f64>, previous_close: Option<f64>) {
        self.quotes.insert(ticker.to_owned(), Quote { price, previous_close });
    }
}

impl QuoteProvider for TestProvider {
    fn fetch_quote(&mut self, ticker: &str) -> Result<Quote, MarketDataError> {
        self.quotes.get(ticker)
            .copied()
            .ok_or_else(|| MarketDataError::FieldUnavailable("regularMarketPrice".to_owned()))
    }
}

fn gold_registry() -> InstrumentRegistry {
    InstrumentRegistry::new(vec![Instrument::new("GC=F", "Gold")]).unwrap()
}

#[test]
fn test_single_hourly_refresh_writes_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("commodity_prices.csv");
    let mut provider = TestProvider::default();
    provider.set("GC=F", Some(1950.5), Some(1945.0));

    let before = Utc::now();
    let mut refresh_loop = RefreshLoop::load(gold_registry(), PriceFetcher::new(provider),
        Archive::new(&path, ArchiveFormat::Csv));
    refresh_loop.refresh(RefreshType::Hourly);
    let after = Utc::now();

    let gold = refresh_loop.store().observations("GC=F");
    assert_eq!(gold.len(), 1);
    assert_eq!(gold[0].price, 1950.5);
    assert_eq!(gold[0].previous_close, Some(1945.0));
    assert_eq!(gold[0].refresh_type, RefreshType::Hourly);
    assert!(gold[0].timestamp >= before && gold[0].timestamp <= after);

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "Ticker,Commodity,Timestamp,RefreshType,CurrentPrice,PreviousClose");

    let fields: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(fields[0], "GC=F");
    assert_eq!(fields[1], "Gold");
    assert_eq!(fields[2].parse::<DateTime<Utc>>().unwrap(), gold[0].timestamp);
    assert_eq!(fields[3], "hourly");
    assert_eq!(fields[4], "1950.5");
    assert_eq!(fields[5], "1945.0");
}

#[test]
fn test_failed_fetch_writes_no_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("commodity_prices.csv");
    let mut provider = TestProvider::default();
    provider.set("GC=F", None, None);

    let mut refresh_loop = RefreshLoop::load(gold_registry(), PriceFetcher::new(provider),
        Archive::new(&path, ArchiveFormat::Csv));
    let stats = refresh_loop.refresh(RefreshType::Hourly);

    assert_eq!(stats.failed, 1);
    assert!(refresh_loop.store().is_empty());
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 1);
}

#[test]
fn test_consecutive_refreshes_survive_restart() {
    for format in [ArchiveFormat::Csv, ArchiveFormat::Xml] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("commodity_prices.{}", format));
        let mut provider = TestProvider::default();
        provider.set("GC=F", Some(1950.5), Some(1945.0));

        let mut refresh_loop = RefreshLoop::load(gold_registry(), PriceFetcher::new(provider),
            Archive::new(&path, format));
        refresh_loop.refresh(RefreshType::Hourly);
        refresh_loop.fetcher_mut().provider_mut().set("GC=F", Some(1952.25), None);
        refresh_loop.refresh(RefreshType::Daily);
        let store = refresh_loop.into_store();

        let tags: Vec<RefreshType> = store.observations("GC=F").iter().map(|o| o.refresh_type).collect();
        assert_eq!(tags, vec![RefreshType::Hourly, RefreshType::Daily]);

        // A fresh process rehydrates exactly what was written
        let restarted = RefreshLoop::load(gold_registry(), PriceFetcher::new(TestProvider::default()),
            Archive::new(&path, format));
        assert_eq!(restarted.store(), &store);
    }
}

#[test]
fn test_missing_archive_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::new(dir.path().join("absent.xml"), ArchiveFormat::Xml);
    let refresh_loop = RefreshLoop::load(InstrumentRegistry::commodities(),
        PriceFetcher::new(TestProvider::default()), archive);
    assert!(refresh_loop.store().is_empty());
    assert!(!refresh_loop.archive().path().exists());
}
