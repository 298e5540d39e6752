//! OI Writer binary
//!
//! Wires market data, broker, persistence and the strategy engine together.
//! `--print-config` dumps the effective configuration and exits.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use oi_writer::broker::{BrokerCredentials, BrokerExecutionAdapter, LiveBroker, PaperBroker};
use oi_writer::config::{AppConfig, DataSource, ExecutionMode};
use oi_writer::engine::{EngineHandle, StrategyEngine};
use oi_writer::market_data::{
    BackgroundFetcher, HttpQuoteSource, MarketDataCache, QuoteSource, SyntheticMarket,
};
use oi_writer::persistence::{CsvTradeHistory, OpenTradeJournal};

/// Synthetic fetches that keep the leaders pinned before the random walk starts
const SYNTHETIC_PINNED_FETCHES: u64 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;

    if std::env::args().any(|a| a == "--print-config") {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    init_tracing(&config);
    info!(config = %config, "Starting OI writer");

    let cache = Arc::new(MarketDataCache::new(
        config.market_data.staleness_secs,
        config.instrument.strike_window,
    ));

    let source: Arc<dyn QuoteSource> = match config.market_data.source {
        DataSource::Simulated => Arc::new(SyntheticMarket::new(SYNTHETIC_PINNED_FETCHES)),
        DataSource::Live => Arc::new(HttpQuoteSource::new(
            &config.market_data.live_url,
            Duration::from_millis(config.market_data.request_timeout_ms),
        )?),
    };
    info!(source = source.name(), "Quote source ready");

    let fetcher_running = Arc::new(AtomicBool::new(true));
    let fetcher = BackgroundFetcher::new(
        source,
        cache.clone(),
        &config.instrument.symbol,
        Duration::from_millis(config.market_data.fetch_interval_ms),
        Duration::from_millis(config.market_data.request_timeout_ms),
    )
    .spawn(fetcher_running.clone());

    let broker: Arc<dyn BrokerExecutionAdapter> = match config.execution.mode {
        ExecutionMode::Paper => Arc::new(PaperBroker::new()),
        ExecutionMode::Live => Arc::new(LiveBroker::new(
            &config.execution.base_url,
            &config.execution.product,
            &config.execution.exchange_segment,
            Duration::from_millis(config.execution.order_timeout_ms),
            BrokerCredentials::from_env()?,
        )?),
    };
    info!(broker = broker.name(), mode = %config.execution.mode.label(), "Execution adapter ready");

    let history = Arc::new(CsvTradeHistory::new(&config.persistence.data_dir)?);
    match history.load_recent(config.persistence.retention_days, chrono::Utc::now()) {
        Ok(recent) => {
            let pnl: f64 = recent.iter().map(|r| r.pnl).sum();
            info!(
                trades = recent.len(),
                pnl = %format!("{:.2}", pnl),
                days = config.persistence.retention_days,
                "Recent trade history"
            );
        }
        Err(e) => warn!(error = %e, "Could not read trade history"),
    }

    let journal = OpenTradeJournal::new(&config.persistence.data_dir)?;
    match journal.read() {
        Ok(left_open) if !left_open.is_empty() => {
            for trade in &left_open {
                warn!(trade = %trade, "Trade left open by a previous run; reconcile with the broker");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, path = %journal.path().display(), "Could not read open trade journal"),
    }

    let (engine, handle) = StrategyEngine::new(config, cache, broker, history);
    let engine = engine.with_journal(journal);
    let engine_task = tokio::spawn(engine.run());

    wait_for_shutdown(&handle).await;

    if let Err(e) = handle.stop().await {
        warn!(error = %e, "Stop request failed");
    }
    if let Err(e) = engine_task.await {
        error!(error = %e, "Engine task failed");
    }

    fetcher_running.store(false, Ordering::SeqCst);
    fetcher.abort();
    info!("OI writer stopped");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.clone()));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Block until ctrl-c or the engine stopping on its own. SIGHUP reloads the
/// configuration files into the running engine.
#[cfg(unix)]
async fn wait_for_shutdown(handle: &EngineHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "SIGHUP reload unavailable");
            None
        }
    };
    let mut check = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                return;
            }
            Some(_) = async {
                match hangup.as_mut() {
                    Some(s) => s.recv().await,
                    None => std::future::pending().await,
                }
            } => reload(handle).await,
            _ = check.tick() => {
                if !handle.is_running() {
                    info!("Engine stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(handle: &EngineHandle) {
    let mut check = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                return;
            }
            _ = check.tick() => {
                if !handle.is_running() {
                    info!("Engine stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(unix)]
async fn reload(handle: &EngineHandle) {
    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Reload failed, keeping current configuration");
            return;
        }
    };
    let digest = config.digest();
    match handle.apply_config(config).await {
        Ok(()) => info!(digest = %digest, "Configuration reload queued"),
        Err(e) => warn!(error = %e, "Reloaded configuration rejected"),
    }
}
