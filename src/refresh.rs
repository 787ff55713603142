//! Refresh/persist cycle and the polling loop that drives it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Local, Utc};
use tracing::{debug, error, info};

use crate::archive::Archive;
use crate::base::{InstrumentRegistry, Observation, PriceStore, RefreshType};
use crate::market_data::{PriceFetcher, QuoteProvider};
use crate::schedule::Scheduler;
use crate::stats::RefreshStats;

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

pub struct RefreshLoop<P> {
    registry: InstrumentRegistry,
    fetcher: PriceFetcher<P>,
    store: PriceStore,
    archive: Archive,
}

fn title(refresh_type: RefreshType) -> &'static str {
    match refresh_type {
        RefreshType::Hourly => "Hourly",
        RefreshType::Daily => "Daily",
    }
}

fn format_close(previous_close: Option<f64>) -> String {
    match previous_close {
        Some(close) => close.to_string(),
        None => "n/a".to_owned(),
    }
}

impl<P: QuoteProvider> RefreshLoop<P> {
    pub fn new(registry: InstrumentRegistry, fetcher: PriceFetcher<P>, store: PriceStore, archive: Archive) -> Self {
        RefreshLoop { registry, fetcher, store, archive }
    }

    /// Builds the loop with the store rehydrated from `archive`
    pub fn load(registry: InstrumentRegistry, fetcher: PriceFetcher<P>, archive: Archive) -> Self {
        let store = archive.load(&registry);
        RefreshLoop::new(registry, fetcher, store, archive)
    }

    pub fn store(&self) -> &PriceStore {
        &self.store
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn fetcher_mut(&mut self) -> &mut PriceFetcher<P> {
        &mut self.fetcher
    }

    pub fn into_store(self) -> PriceStore {
        self.store
    }

    /// Fetches every instrument once, appends the priced ones, then rewrites the archive
    pub fn refresh(&mut self, refresh_type: RefreshType) -> RefreshStats {
        let started = Instant::now();
        let mut stats = RefreshStats::new(refresh_type);
        let rule = if refresh_type == RefreshType::Daily { '=' } else { '-' };
        info!("{} {} Refresh: {} {}", rule, title(refresh_type), Local::now().format("%Y-%m-%d %H:%M:%S"), rule);

        for instrument in self.registry.iter() {
            stats.total += 1;
            let sample = self.fetcher.fetch(&instrument.ticker);
            let price = match sample.price {
                Some(price) => price,
                None => {
                    debug!(ticker = %instrument.ticker, "No price this cycle");
                    stats.failed += 1;
                    continue;
                }
            };

            let observation = Observation {
                timestamp: sample.timestamp,
                price,
                previous_close: sample.previous_close,
                refresh_type,
            };
            if self.store.append(&instrument.ticker, observation) {
                stats.success += 1;
                let suffix = if refresh_type == RefreshType::Daily { " [DAILY]" } else { "" };
                info!("{}: ${} (Prev: ${}){}", instrument.name, price, format_close(sample.previous_close), suffix);
            }
        }

        stats.persisted = self.persist();
        stats.elapsed = started.elapsed();
        stats.log_summary();
        stats
    }

    /// Writes the whole store. On failure the store is left as is for the next attempt.
    pub fn persist(&self) -> bool {
        match self.archive.save(&self.store) {
            Ok(()) => {
                info!("Data saved to {} at {}", self.archive.format().extension().to_uppercase(),
                    Local::now().format("%H:%M:%S"));
                true
            }
            Err(err) => {
                error!(path = %self.archive.path().display(), error = %err, "{} save error",
                    self.archive.format().extension().to_uppercase());
                false
            }
        }
    }

    /// Runs every refresh the scheduler reports as due at `now`
    pub fn run_pending(&mut self, scheduler: &mut Scheduler, now: chrono::DateTime<Utc>) -> Vec<RefreshStats> {
        scheduler.due(now).into_iter()
            .map(|refresh_type| self.refresh(refresh_type))
            .collect()
    }

    /// Initial hourly refresh, then scheduled refreshes until `shutdown` is set, then a final save
    pub fn run(&mut self, scheduler: &mut Scheduler, tick: Duration, shutdown: &AtomicBool) {
        self.refresh(RefreshType::Hourly);

        while !shutdown.load(Ordering::SeqCst) {
            self.run_pending(scheduler, Utc::now());
            wait_for_tick(tick, shutdown);
        }

        self.persist();
        info!("Pipeline stopped. Final data saved.");
    }
}

/// Sleeps for `tick`, waking early once `shutdown` is set
fn wait_for_tick(tick: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now().checked_add(tick);
    while !shutdown.load(Ordering::SeqCst) {
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => tick,
        };
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(SHUTDOWN_POLL));
    }
}
