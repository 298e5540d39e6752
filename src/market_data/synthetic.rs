//! Synthetic option chain for paper sessions
//!
//! Generates a small chain around a drifting spot. The first `pinned_fetches`
//! pulls put every LTP inside the default entry band below ATP, with OI
//! peaking at the ATM strike, so a paper run exercises the entry path.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ChainFetch, QuoteSource};
use crate::types::{OptionQuote, Side, StrikeQuote};

const STRIKES: [i64; 9] = [
    21800, 21850, 21900, 21950, 22000, 22050, 22100, 22150, 22200,
];
const START_SPOT: f64 = 22000.0;
const START_PRICE: f64 = 150.0;
const FLOOR_PRICE: f64 = 20.0;

struct MarketState {
    rng: StdRng,
    spot: f64,
    prices: HashMap<(i64, Side), f64>,
    fetches: u64,
}

pub struct SyntheticMarket {
    state: Mutex<MarketState>,
    pinned_fetches: u64,
}

impl SyntheticMarket {
    pub fn new(pinned_fetches: u64) -> Self {
        Self::with_rng(StdRng::from_entropy(), pinned_fetches)
    }

    /// Deterministic market for tests
    pub fn seeded(seed: u64, pinned_fetches: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), pinned_fetches)
    }

    fn with_rng(rng: StdRng, pinned_fetches: u64) -> Self {
        let prices = STRIKES
            .iter()
            .flat_map(|&k| Side::ALL.into_iter().map(move |s| ((k, s), START_PRICE)))
            .collect();

        Self {
            state: Mutex::new(MarketState {
                rng,
                spot: START_SPOT,
                prices,
                fetches: 0,
            }),
            pinned_fetches,
        }
    }

    fn generate(&self) -> Result<ChainFetch> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("synthetic market state poisoned"))?;
        let pinned = state.fetches < self.pinned_fetches;
        state.fetches += 1;

        let drift = state.rng.gen_range(-10.0..10.0);
        state.spot = (state.spot + drift).max(1.0);
        let spot = state.spot;

        let mut chain = Vec::with_capacity(STRIKES.len());
        for &strike in STRIKES.iter() {
            let call = Self::leg(&mut state, strike, Side::CE, pinned);
            let put = Self::leg(&mut state, strike, Side::PE, pinned);
            chain.push(StrikeQuote::new(strike, call, put));
        }

        Ok(ChainFetch { spot, chain })
    }

    fn leg(state: &mut MarketState, strike: i64, side: Side, pinned: bool) -> OptionQuote {
        let round2 = |v: f64| (v * 100.0).round() / 100.0;

        if pinned {
            // ATP near 100, LTP 6-18% below it, OI peaking at ATM
            let atp = state.rng.gen_range(95.0..105.0);
            let ltp = atp * (1.0 - state.rng.gen_range(0.06..0.18));
            state.prices.insert((strike, side), ltp);
            let distance = (strike - 22000).abs() / 50;
            let oi = 5000.0 - distance as f64 * 500.0;
            return OptionQuote::new(round2(ltp), round2(atp), oi);
        }

        let prev = state.prices.get(&(strike, side)).copied().unwrap_or(START_PRICE);
        let ltp = (prev + state.rng.gen_range(-5.0..5.0)).max(FLOOR_PRICE);
        state.prices.insert((strike, side), ltp);
        let atp = ltp + state.rng.gen_range(-2.0..2.0);
        let oi = state.rng.gen_range(1000..=5000) as f64;
        OptionQuote::new(round2(ltp), round2(atp), oi)
    }
}

#[async_trait]
impl QuoteSource for SyntheticMarket {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn fetch(&self, _instrument: &str) -> Result<ChainFetch> {
        self.generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oi_tracker::find_highest_oi;

    #[tokio::test]
    async fn pinned_fetches_sit_inside_entry_band() {
        let market = SyntheticMarket::seeded(7, 3);
        for _ in 0..3 {
            let fetch = market.fetch("NIFTY").await.unwrap();
            assert_eq!(fetch.chain.len(), STRIKES.len());
            for row in &fetch.chain {
                for side in Side::ALL {
                    let leg = row.leg(side);
                    let (ltp, atp) = (leg.ltp().unwrap(), leg.atp().unwrap());
                    assert!(ltp <= atp * 0.95 + 0.01, "ltp {ltp} atp {atp}");
                    assert!(ltp >= atp * 0.80 - 0.01, "ltp {ltp} atp {atp}");
                }
            }
            assert_eq!(find_highest_oi(&fetch.chain), (Some(22000), Some(22000)));
        }
    }

    #[tokio::test]
    async fn free_running_prices_stay_positive() {
        let market = SyntheticMarket::seeded(11, 0);
        for _ in 0..50 {
            let fetch = market.fetch("NIFTY").await.unwrap();
            assert!(fetch.spot > 0.0);
            for row in &fetch.chain {
                assert!(row.call.ltp().unwrap() >= FLOOR_PRICE);
                let oi = row.put.oi_or_zero();
                assert!((1000.0..=5000.0).contains(&oi));
            }
        }
    }
}
