//! Buffer band and dwell timers
//!
//! An entry qualifies only after LTP has stayed inside
//! `[ATP*(1-max_pct), ATP*(1-min_pct)]` for the whole dwell period.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferBand {
    pub lower: f64,
    pub upper: f64,
}

impl BufferBand {
    pub fn new(atp: f64, min_buffer_pct: f64, max_buffer_pct: f64) -> Self {
        Self {
            lower: atp - atp * max_buffer_pct,
            upper: atp - atp * min_buffer_pct,
        }
    }

    pub fn contains(&self, ltp: f64) -> bool {
        self.lower <= ltp && ltp <= self.upper
    }
}

/// Result of feeding one observation into the timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellCheck {
    OutOfBand,
    Started,
    Waiting { elapsed: Duration },
    /// Dwell complete; the timer has been consumed
    Ready,
}

#[derive(Debug, Clone, Serialize)]
pub struct DwellStatus {
    pub side: Side,
    pub strike: i64,
    pub elapsed_secs: i64,
}

#[derive(Debug, Default)]
pub struct BufferTimers {
    timers: HashMap<(Side, i64), DateTime<Utc>>,
}

impl BufferTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        side: Side,
        strike: i64,
        in_band: bool,
        now: DateTime<Utc>,
        dwell: Duration,
    ) -> DwellCheck {
        let key = (side, strike);
        if !in_band {
            self.timers.remove(&key);
            return DwellCheck::OutOfBand;
        }

        let Some(started) = self.timers.get(&key).copied() else {
            if dwell <= Duration::zero() {
                return DwellCheck::Ready;
            }
            self.timers.insert(key, now);
            return DwellCheck::Started;
        };

        let elapsed = now - started;
        if elapsed >= dwell {
            self.timers.remove(&key);
            DwellCheck::Ready
        } else {
            DwellCheck::Waiting { elapsed }
        }
    }

    pub fn clear(&mut self, side: Side, strike: i64) -> bool {
        self.timers.remove(&(side, strike)).is_some()
    }

    /// Keep only timers for which `keep` returns true; returns the dropped keys
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<(Side, i64)>
    where
        F: FnMut(Side, i64) -> bool,
    {
        let mut dropped = Vec::new();
        self.timers.retain(|&(side, strike), _| {
            let k = keep(side, strike);
            if !k {
                dropped.push((side, strike));
            }
            k
        });
        dropped
    }

    pub fn started_at(&self, side: Side, strike: i64) -> Option<DateTime<Utc>> {
        self.timers.get(&(side, strike)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn reset(&mut self) {
        self.timers.clear();
    }

    pub fn status(&self, now: DateTime<Utc>) -> Vec<DwellStatus> {
        let mut out: Vec<DwellStatus> = self
            .timers
            .iter()
            .map(|(&(side, strike), started)| DwellStatus {
                side,
                strike,
                elapsed_secs: (now - *started).num_seconds(),
            })
            .collect();
        out.sort_by_key(|d| (d.strike, d.side == Side::PE));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 4, 30, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn band_edges() {
        let band = BufferBand::new(100.0, 0.05, 0.20);
        assert_eq!(band.lower, 80.0);
        assert_eq!(band.upper, 95.0);
        assert!(band.contains(80.0) && band.contains(95.0) && band.contains(88.0));
        assert!(!band.contains(79.95) && !band.contains(95.05));
    }

    #[test]
    fn dwell_completes_after_continuous_presence() {
        let mut timers = BufferTimers::new();
        let dwell = Duration::seconds(60);

        assert_eq!(timers.observe(Side::CE, 22000, true, t(0), dwell), DwellCheck::Started);
        assert_eq!(
            timers.observe(Side::CE, 22000, true, t(30), dwell),
            DwellCheck::Waiting {
                elapsed: Duration::seconds(30)
            }
        );
        assert_eq!(timers.observe(Side::CE, 22000, true, t(65), dwell), DwellCheck::Ready);
        // consumed
        assert!(timers.is_empty());
    }

    #[test]
    fn excursion_resets_timer() {
        let mut timers = BufferTimers::new();
        let dwell = Duration::seconds(60);

        timers.observe(Side::PE, 21900, true, t(0), dwell);
        assert_eq!(
            timers.observe(Side::PE, 21900, false, t(40), dwell),
            DwellCheck::OutOfBand
        );
        assert_eq!(timers.observe(Side::PE, 21900, true, t(50), dwell), DwellCheck::Started);
        assert!(matches!(
            timers.observe(Side::PE, 21900, true, t(100), dwell),
            DwellCheck::Waiting { .. }
        ));
        assert_eq!(timers.observe(Side::PE, 21900, true, t(110), dwell), DwellCheck::Ready);
    }

    #[test]
    fn timers_are_keyed_by_side_and_strike() {
        let mut timers = BufferTimers::new();
        let dwell = Duration::seconds(60);
        timers.observe(Side::CE, 22000, true, t(0), dwell);
        timers.observe(Side::PE, 22000, true, t(10), dwell);
        assert_eq!(timers.len(), 2);

        let dropped = timers.retain(|side, _| side == Side::PE);
        assert_eq!(dropped, vec![(Side::CE, 22000)]);
        assert_eq!(timers.started_at(Side::PE, 22000), Some(t(10)));
        assert_eq!(timers.status(t(20))[0].elapsed_secs, 10);
    }

    #[test]
    fn zero_dwell_fires_immediately() {
        let mut timers = BufferTimers::new();
        assert_eq!(
            timers.observe(Side::CE, 22000, true, t(0), Duration::zero()),
            DwellCheck::Ready
        );
    }
}
