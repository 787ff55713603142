use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commodity_archiver::{
    ArchiveFormat,
    PriceFetcher,
    QuoteLive,
    RefreshLoop,
    RefreshType,
    Scheduler,
    TrackerConfig,
    TrackerError,
};

#[derive(Parser)]
#[command(name = "commodity_archiver")]
#[command(about = "Polls commodity prices and archives the history to CSV or XML", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Archive file path (overrides TRACKER_OUTPUT_PATH)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Archive format: csv or xml (overrides TRACKER_FORMAT)
    #[arg(long, global = true)]
    format: Option<ArchiveFormat>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh on the hourly and daily schedule until interrupted
    Daemon,

    /// Run a single refresh cycle and exit
    Refresh {
        #[arg(long, default_value = "hourly")]
        refresh_type: RefreshType,
    },

    /// Log what the archive currently holds
    Summary,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("commodity_archiver={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = TrackerConfig::from_env()?;
    if let Some(output) = cli.output {
        config.output_path = Some(output);
    }
    if let Some(format) = cli.format {
        config.format = Some(format);
    }

    let archive = config.archive();
    let registry = config.registry.clone();
    tracing::debug!(path = %archive.path().display(), format = %archive.format(), "Configuration loaded");

    let fetcher = PriceFetcher::new(QuoteLive::with_address(
        &config.quote_api.url,
        config.quote_api.request_timeout(),
    ));

    match cli.command {
        Commands::Summary => {
            let store = archive.load(&registry);
            for series in store.series() {
                match series.observations.last() {
                    Some(latest) => info!(
                        ticker = %series.instrument.ticker,
                        name = %series.instrument.name,
                        observations = series.observations.len(),
                        latest_price = latest.price,
                        latest_at = %latest.timestamp,
                        "Archived series"
                    ),
                    None => info!(
                        ticker = %series.instrument.ticker,
                        name = %series.instrument.name,
                        "No observations"
                    ),
                }
            }
        }
        Commands::Refresh { refresh_type } => {
            let mut refresh_loop = RefreshLoop::load(registry, fetcher, archive);
            refresh_loop.refresh(refresh_type);
        }
        Commands::Daemon => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let handler_flag = Arc::clone(&shutdown);
            ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
                .map_err(TrackerError::from)?;

            let schedule = &config.schedule;
            let mut scheduler = Scheduler::hourly_and_daily(
                schedule.hourly_interval_hours,
                schedule.daily_time,
                schedule.timezone,
                Utc::now(),
            );
            info!("Commodity Pipeline Started! Tracking: {}", registry.names().join(", "));
            info!("Press Ctrl+C to stop");

            let mut refresh_loop = RefreshLoop::load(registry, fetcher, archive);
            refresh_loop.run(&mut scheduler, schedule.tick(), &shutdown);
        }
    }

    Ok(())
}
