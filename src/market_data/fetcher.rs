use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{MarketDataCache, QuoteSource};
use crate::error::{EngineError, EngineResult};

/// Periodically pulls the chain from a `QuoteSource` into the cache
pub struct BackgroundFetcher {
    source: Arc<dyn QuoteSource>,
    cache: Arc<MarketDataCache>,
    instrument: String,
    interval: Duration,
    timeout: Duration,
}

impl BackgroundFetcher {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        cache: Arc<MarketDataCache>,
        instrument: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            instrument: instrument.to_string(),
            interval,
            timeout,
        }
    }

    /// One fetch into the cache. A failed or timed-out pull leaves the
    /// previous snapshot in place to age out.
    pub async fn fetch_once(&self) -> EngineResult<()> {
        let result = tokio::time::timeout(self.timeout, self.source.fetch(&self.instrument)).await;

        let fetch = match result {
            Err(_) => {
                return Err(EngineError::NetworkTimeout {
                    operation: "fetch_chain",
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => {
                return Err(EngineError::DataUnavailable {
                    instrument: self.instrument.clone(),
                    reason: format!("{:#}", e),
                })
            }
            Ok(Ok(fetch)) => fetch,
        };

        if fetch.chain.is_empty() {
            return Err(EngineError::DataUnavailable {
                instrument: self.instrument.clone(),
                reason: "source returned an empty chain".to_string(),
            });
        }

        self.cache.update(&self.instrument, fetch.chain, fetch.spot);
        Ok(())
    }

    /// Fetch until `running` is cleared
    pub async fn run(self, running: Arc<AtomicBool>) {
        info!(
            source = self.source.name(),
            instrument = %self.instrument,
            interval_ms = self.interval.as_millis() as u64,
            "Background fetcher started"
        );

        let mut failures: u32 = 0;
        while running.load(Ordering::SeqCst) {
            match self.fetch_once().await {
                Ok(()) => {
                    if failures > 0 {
                        info!(failures, "Market data recovered");
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures += 1;
                    if failures == 1 || failures % 10 == 0 {
                        warn!(error = %e, failures, "Market data fetch failed");
                    } else {
                        debug!(error = %e, failures, "Market data fetch failed");
                    }
                }
            }
            tokio::time::sleep(self.interval).await;
        }

        info!(instrument = %self.instrument, "Background fetcher stopped");
    }

    pub fn spawn(self, running: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(self.run(running))
    }
}
