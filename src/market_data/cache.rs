//! Shared option-chain cache
//!
//! One writer (the background fetcher) replaces snapshots wholesale; every
//! reader gets a deep copy so no lock is held across engine work.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::types::{OptionChainSnapshot, StrikeQuote};

/// A cached snapshot together with its age at read time
#[derive(Debug, Clone, PartialEq)]
pub struct CachedChain {
    pub chain: Vec<StrikeQuote>,
    pub spot: f64,
    pub captured_at: DateTime<Utc>,
    pub age: Duration,
}

impl CachedChain {
    /// Strike closest to the spot price
    pub fn atm_strike(&self) -> Option<i64> {
        closest_strike(&self.chain, self.spot)
    }
}

/// Thread-safe store of the latest chain per instrument
pub struct MarketDataCache {
    snapshots: RwLock<HashMap<String, OptionChainSnapshot>>,
    staleness: Duration,
    strike_window: usize,
}

impl MarketDataCache {
    pub fn new(staleness_secs: u64, strike_window: usize) -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            staleness: Duration::seconds(staleness_secs as i64),
            strike_window,
        }
    }

    /// Store a fresh chain captured now
    pub fn update(&self, instrument: &str, chain: Vec<StrikeQuote>, spot: f64) {
        self.update_at(instrument, chain, spot, Utc::now());
    }

    /// Store a chain with an explicit capture timestamp
    pub fn update_at(
        &self,
        instrument: &str,
        chain: Vec<StrikeQuote>,
        spot: f64,
        captured_at: DateTime<Utc>,
    ) {
        let chain = normalize_chain(chain, spot, self.strike_window);
        debug!(instrument, strikes = chain.len(), spot, "Cache updated");

        let snapshot = OptionChainSnapshot {
            instrument: instrument.to_string(),
            chain,
            spot,
            captured_at,
        };

        if let Ok(mut snapshots) = self.snapshots.write() {
            snapshots.insert(instrument.to_string(), snapshot);
        } else {
            warn!(instrument, "Cache lock poisoned, update dropped");
        }
    }

    /// Latest chain with its age measured against the current time
    pub fn get(&self, instrument: &str) -> Option<CachedChain> {
        self.get_at(instrument, Utc::now())
    }

    /// Latest chain with its age measured against `now`
    pub fn get_at(&self, instrument: &str, now: DateTime<Utc>) -> Option<CachedChain> {
        let snapshots = self.snapshots.read().ok()?;
        snapshots.get(instrument).map(|s| CachedChain {
            chain: s.chain.clone(),
            spot: s.spot,
            captured_at: s.captured_at,
            age: now - s.captured_at,
        })
    }

    /// Latest chain if it is younger than the staleness threshold
    pub fn fresh(&self, instrument: &str, now: DateTime<Utc>) -> EngineResult<CachedChain> {
        let cached = self
            .get_at(instrument, now)
            .ok_or_else(|| EngineError::DataUnavailable {
                instrument: instrument.to_string(),
                reason: "no snapshot cached".to_string(),
            })?;

        if cached.age > self.staleness {
            return Err(EngineError::DataUnavailable {
                instrument: instrument.to_string(),
                reason: format!(
                    "snapshot is {}ms old (limit {}ms)",
                    cached.age.num_milliseconds(),
                    self.staleness.num_milliseconds()
                ),
            });
        }

        Ok(cached)
    }

    /// Instruments with a cached snapshot
    pub fn instruments(&self) -> Vec<String> {
        self.snapshots
            .read()
            .map(|s| {
                let mut keys: Vec<String> = s.keys().cloned().collect();
                keys.sort();
                keys
            })
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut snapshots) = self.snapshots.write() {
            snapshots.clear();
        }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }
}

fn closest_strike(chain: &[StrikeQuote], spot: f64) -> Option<i64> {
    chain
        .iter()
        .min_by(|a, b| {
            let da = (a.strike as f64 - spot).abs();
            let db = (b.strike as f64 - spot).abs();
            da.total_cmp(&db)
        })
        .map(|row| row.strike)
}

/// Sort by strike, drop empty rows, keep ATM±window
fn normalize_chain(mut chain: Vec<StrikeQuote>, spot: f64, window: usize) -> Vec<StrikeQuote> {
    chain.retain(|row| !(row.call.is_empty() && row.put.is_empty()));
    chain.sort_by_key(|row| row.strike);

    if spot <= 0.0 || chain.is_empty() {
        return chain;
    }

    let atm_idx = chain
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (a.strike as f64 - spot).abs();
            let db = (b.strike as f64 - spot).abs();
            da.total_cmp(&db)
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    let start = atm_idx.saturating_sub(window);
    let end = (atm_idx + window + 1).min(chain.len());
    chain.drain(end..);
    chain.drain(..start);
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OptionQuote;
    use chrono::TimeZone;

    fn row(strike: i64, oi: f64) -> StrikeQuote {
        StrikeQuote::new(
            strike,
            OptionQuote::new(50.0, 52.0, oi),
            OptionQuote::new(40.0, 41.0, oi),
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 4, 0, 0).unwrap()
    }

    #[test]
    fn update_sorts_and_trims_around_atm() {
        let cache = MarketDataCache::new(5, 2);
        let chain: Vec<_> = (0..20).rev().map(|i| row(21000 + i * 50, 100.0)).collect();
        cache.update_at("NIFTY", chain, 21510.0, t0());

        let cached = cache.get_at("NIFTY", t0()).unwrap();
        let strikes: Vec<i64> = cached.chain.iter().map(|r| r.strike).collect();
        assert_eq!(strikes, vec![21400, 21450, 21500, 21550, 21600]);
        assert_eq!(cached.atm_strike(), Some(21500));
    }

    #[test]
    fn zero_rows_are_dropped_and_nonpositive_spot_skips_trim() {
        let cache = MarketDataCache::new(5, 1);
        let empty = StrikeQuote::new(21900, OptionQuote::default(), OptionQuote::new(0.0, 0.0, 0.0));
        let chain = vec![row(22100, 1.0), empty, row(22000, 1.0), row(21800, 1.0)];
        cache.update_at("NIFTY", chain, 0.0, t0());

        let strikes: Vec<i64> = cache
            .get_at("NIFTY", t0())
            .unwrap()
            .chain
            .iter()
            .map(|r| r.strike)
            .collect();
        assert_eq!(strikes, vec![21800, 22000, 22100]);
    }

    #[test]
    fn fresh_reports_stale_and_missing_data() {
        let cache = MarketDataCache::new(5, 12);
        assert!(matches!(
            cache.fresh("NIFTY", t0()),
            Err(EngineError::DataUnavailable { .. })
        ));

        cache.update_at("NIFTY", vec![row(22000, 1.0)], 22000.0, t0());
        assert!(cache.fresh("NIFTY", t0() + Duration::seconds(5)).is_ok());

        let err = cache.fresh("NIFTY", t0() + Duration::seconds(6)).unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("old"));
    }

    #[test]
    fn reads_are_deep_copies() {
        let cache = MarketDataCache::new(5, 12);
        cache.update_at("NIFTY", vec![row(22000, 1.0)], 22000.0, t0());

        let mut copy = cache.get_at("NIFTY", t0()).unwrap();
        copy.chain.clear();
        assert_eq!(cache.get_at("NIFTY", t0()).unwrap().chain.len(), 1);
    }

    #[test]
    fn housekeeping() {
        let cache = MarketDataCache::new(5, 12);
        cache.update_at("NIFTY", vec![row(22000, 1.0)], 22000.0, t0());
        cache.update_at("BANKNIFTY", vec![row(48000, 1.0)], 48000.0, t0());
        assert_eq!(cache.instruments(), vec!["BANKNIFTY", "NIFTY"]);
        cache.clear();
        assert!(cache.get("NIFTY").is_none());
    }
}
