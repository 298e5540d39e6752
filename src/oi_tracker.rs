//! Open-interest leader tracking
//!
//! The strike carrying the highest OI on each side is treated as the writing
//! candidate. A candidate only becomes tradeable after it has stayed the
//! leader for a number of consecutive scans.

use serde::Serialize;

use crate::types::{Side, StrikeQuote};

/// Strike with the highest OI per side, `(call, put)`.
///
/// Missing or non-numeric OI reads as zero; ties keep the first strike in
/// chain order, so an all-zero side still leads with its first strike. Only an
/// empty chain has no leader.
pub fn find_highest_oi(chain: &[StrikeQuote]) -> (Option<i64>, Option<i64>) {
    (leader(chain, Side::CE), leader(chain, Side::PE))
}

fn leader(chain: &[StrikeQuote], side: Side) -> Option<i64> {
    let mut best: Option<(i64, f64)> = None;
    for row in chain {
        let oi = row.leg(side).oi_or_zero();
        match best {
            Some((_, top)) if oi <= top => {}
            _ => best = Some((row.strike, oi)),
        }
    }
    best.map(|(strike, _)| strike)
}

/// Leader and streak for one side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StabilityState {
    pub strike: Option<i64>,
    pub count: u32,
}

impl StabilityState {
    fn observe(&mut self, strike: Option<i64>) {
        match strike {
            None => *self = StabilityState::default(),
            Some(_) if strike == self.strike => self.count += 1,
            Some(_) => {
                self.strike = strike;
                self.count = 1;
            }
        }
    }
}

/// Result of one stability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StabilityReport {
    pub ce_strike: Option<i64>,
    pub pe_strike: Option<i64>,
    pub ce_stable: bool,
    pub pe_stable: bool,
    pub ce_count: u32,
    pub pe_count: u32,
}

impl StabilityReport {
    pub fn strike(&self, side: Side) -> Option<i64> {
        match side {
            Side::CE => self.ce_strike,
            Side::PE => self.pe_strike,
        }
    }

    pub fn is_stable(&self, side: Side) -> bool {
        match side {
            Side::CE => self.ce_stable,
            Side::PE => self.pe_stable,
        }
    }

    pub fn count(&self, side: Side) -> u32 {
        match side {
            Side::CE => self.ce_count,
            Side::PE => self.pe_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenInterestTracker {
    ce: StabilityState,
    pe: StabilityState,
    threshold: u32,
}

impl OpenInterestTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            ce: StabilityState::default(),
            pe: StabilityState::default(),
            threshold: threshold.max(1),
        }
    }

    /// Feed the latest leaders and report whether each has held long enough
    pub fn check_stability(&mut self, new_ce: Option<i64>, new_pe: Option<i64>) -> StabilityReport {
        self.ce.observe(new_ce);
        self.pe.observe(new_pe);

        StabilityReport {
            ce_strike: self.ce.strike,
            pe_strike: self.pe.strike,
            ce_stable: self.ce.strike.is_some() && self.ce.count >= self.threshold,
            pe_stable: self.pe.strike.is_some() && self.pe.count >= self.threshold,
            ce_count: self.ce.count,
            pe_count: self.pe.count,
        }
    }

    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold.max(1);
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self, side: Side) -> StabilityState {
        match side {
            Side::CE => self.ce,
            Side::PE => self.pe,
        }
    }

    pub fn reset(&mut self) {
        self.ce = StabilityState::default();
        self.pe = StabilityState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OptionQuote, QuoteField};

    fn row(strike: i64, ce_oi: f64, pe_oi: f64) -> StrikeQuote {
        StrikeQuote::new(
            strike,
            OptionQuote::new(10.0, 10.0, ce_oi),
            OptionQuote::new(10.0, 10.0, pe_oi),
        )
    }

    #[test]
    fn highest_oi_per_side() {
        let chain = vec![
            row(21900, 100.0, 900.0),
            row(22000, 700.0, 200.0),
            row(22100, 300.0, 100.0),
        ];
        assert_eq!(find_highest_oi(&chain), (Some(22000), Some(21900)));
    }

    #[test]
    fn ties_keep_first_strike_in_chain_order() {
        let chain = vec![row(22100, 500.0, 1.0), row(22000, 500.0, 1.0)];
        assert_eq!(find_highest_oi(&chain), (Some(22100), Some(22100)));
    }

    #[test]
    fn non_numeric_oi_reads_as_zero() {
        let mut noisy = row(22000, 0.0, 0.0);
        noisy.call.oi = Some(QuoteField::Text("n/a".into()));
        let chain = vec![noisy, row(22100, 50.0, 0.0)];
        assert_eq!(find_highest_oi(&chain), (Some(22100), Some(22000)));
        assert_eq!(find_highest_oi(&[]), (None, None));
    }

    #[test]
    fn all_zero_oi_leads_with_first_strike() {
        let chain = vec![row(21800, 0.0, 0.0), row(21850, 0.0, 0.0)];
        assert_eq!(find_highest_oi(&chain), (Some(21800), Some(21800)));

        let mut tracker = OpenInterestTracker::new(2);
        let (ce, pe) = find_highest_oi(&chain);
        tracker.check_stability(ce, pe);
        let report = tracker.check_stability(ce, pe);
        assert_eq!((report.ce_count, report.pe_count), (2, 2));
    }

    #[test]
    fn string_oi_with_separators_compares_numerically() {
        let mut a = row(22000, 0.0, 0.0);
        a.call.oi = Some(QuoteField::Text("1,250".into()));
        let b = row(22100, 999.0, 0.0);
        assert_eq!(find_highest_oi(&[a, b]).0, Some(22000));
    }

    #[test]
    fn stability_counter_increments_and_resets() {
        let mut tracker = OpenInterestTracker::new(2);

        let r = tracker.check_stability(Some(22000), Some(21900));
        assert_eq!((r.ce_count, r.ce_stable), (1, false));

        let r = tracker.check_stability(Some(22000), Some(21800));
        assert_eq!((r.ce_count, r.ce_stable), (2, true));
        assert_eq!((r.pe_count, r.pe_stable), (1, false));
        assert_eq!(r.strike(Side::PE), Some(21800));

        let r = tracker.check_stability(Some(22100), Some(21800));
        assert_eq!((r.ce_count, r.ce_stable), (1, false));
        assert!(r.is_stable(Side::PE));
    }

    #[test]
    fn missing_leader_clears_streak() {
        let mut tracker = OpenInterestTracker::new(1);
        assert!(tracker.check_stability(Some(22000), None).ce_stable);
        let r = tracker.check_stability(None, None);
        assert!(!r.ce_stable && !r.pe_stable);
        assert_eq!(tracker.state(Side::CE), StabilityState::default());
    }

    #[test]
    fn threshold_change_applies_to_running_streak() {
        let mut tracker = OpenInterestTracker::new(3);
        tracker.check_stability(Some(22000), None);
        assert!(!tracker.check_stability(Some(22000), None).ce_stable);
        tracker.set_threshold(2);
        assert!(tracker.check_stability(Some(22000), None).ce_stable);
        tracker.reset();
        assert_eq!(tracker.state(Side::CE).count, 0);
    }
}
