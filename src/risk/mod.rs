//! Risk Governor - Entry gating and session kill switch
//!
//! Implements:
//! - Per-strike cooldown after every exit
//! - Stop-loss hit counting with a session blacklist
//! - Daily loss / daily target kill switch on realized + unrealized P&L

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::types::ExitReason;

/// Whether a strike may be entered right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryGate {
    Clear,
    CoolingDown { remaining: Duration },
    Blacklisted { stop_hits: u32 },
}

impl std::fmt::Display for EntryGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryGate::Clear => write!(f, "CLEAR"),
            EntryGate::CoolingDown { remaining } => {
                write!(f, "COOLDOWN ({}s left)", remaining.num_seconds())
            }
            EntryGate::Blacklisted { stop_hits } => {
                write!(f, "BLACKLISTED ({} stop hits)", stop_hits)
            }
        }
    }
}

/// Outcome of the daily limit check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskVerdict {
    Continue,
    Halt { reason: ExitReason, total_pnl: f64 },
}

/// Serializable snapshot for dashboards and the status command
#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub realized_pnl: f64,
    pub closed_trades: usize,
    pub max_daily_loss: f64,
    pub daily_target_profit: f64,
    pub halted: Option<String>,
    /// strike -> seconds until re-entry is allowed
    pub cooldowns: Vec<(i64, i64)>,
    pub stop_hits: Vec<(i64, u32)>,
    pub blacklist: Vec<i64>,
}

/// Engine-local risk state; owned by the engine task
pub struct RiskGovernor {
    config: RiskConfig,
    /// strike -> unlock time
    cooldowns: HashMap<i64, DateTime<Utc>>,
    stop_hits: HashMap<i64, u32>,
    blacklist: BTreeSet<i64>,
    realized_pnl: f64,
    closed_trades: usize,
    halted: Option<ExitReason>,
}

impl RiskGovernor {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            cooldowns: HashMap::new(),
            stop_hits: HashMap::new(),
            blacklist: BTreeSet::new(),
            realized_pnl: 0.0,
            closed_trades: 0,
            halted: None,
        }
    }

    /// Swap limits on config reload. Session state is kept.
    pub fn update_config(&mut self, config: RiskConfig) {
        self.config = config;
    }

    pub fn register_cooldown(&mut self, strike: i64, now: DateTime<Utc>) {
        let until = now + Duration::seconds(self.config.cooldown_secs as i64);
        self.cooldowns.insert(strike, until);
        info!(strike, until = %until, "Cooldown registered");
    }

    pub fn in_cooldown(&self, strike: i64, now: DateTime<Utc>) -> bool {
        self.cooldown_remaining(strike, now).is_some()
    }

    pub fn cooldown_remaining(&self, strike: i64, now: DateTime<Utc>) -> Option<Duration> {
        self.cooldowns
            .get(&strike)
            .map(|until| *until - now)
            .filter(|left| *left > Duration::zero())
    }

    /// Any cooldown still running at `now`
    pub fn has_active_cooldowns(&self, now: DateTime<Utc>) -> bool {
        self.cooldowns.values().any(|until| *until > now)
    }

    /// Count a stop-loss hit. Returns true when this hit blacklists the strike.
    pub fn record_stop_hit(&mut self, strike: i64) -> bool {
        let hits = self.stop_hits.entry(strike).or_insert(0);
        *hits += 1;
        let hits = *hits;

        if hits >= self.config.max_retries_per_strike && self.blacklist.insert(strike) {
            warn!(
                strike,
                stop_hits = hits,
                max_retries = self.config.max_retries_per_strike,
                "Strike blacklisted for the session"
            );
            return true;
        }
        false
    }

    pub fn is_blacklisted(&self, strike: i64) -> bool {
        self.blacklist.contains(&strike)
    }

    pub fn stop_hits(&self, strike: i64) -> u32 {
        self.stop_hits.get(&strike).copied().unwrap_or(0)
    }

    /// Entry gate for a strike; blacklist wins over cooldown
    pub fn entry_gate(&self, strike: i64, now: DateTime<Utc>) -> EntryGate {
        if self.is_blacklisted(strike) {
            return EntryGate::Blacklisted {
                stop_hits: self.stop_hits(strike),
            };
        }
        match self.cooldown_remaining(strike, now) {
            Some(remaining) => EntryGate::CoolingDown { remaining },
            None => EntryGate::Clear,
        }
    }

    /// Book the P&L of a closed trade
    pub fn record_realized(&mut self, pnl: f64) {
        self.realized_pnl += pnl;
        self.closed_trades += 1;
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    /// Check daily limits against realized plus current unrealized P&L.
    ///
    /// Once a limit trips the verdict stays `Halt` for the rest of the session.
    pub fn evaluate(&mut self, unrealized_pnl: f64) -> RiskVerdict {
        let total_pnl = self.realized_pnl + unrealized_pnl;

        if let Some(reason) = self.halted {
            return RiskVerdict::Halt { reason, total_pnl };
        }

        let reason = if total_pnl <= -self.config.max_daily_loss {
            ExitReason::DailyLossLimit
        } else if total_pnl >= self.config.daily_target_profit {
            ExitReason::DailyTargetReached
        } else {
            return RiskVerdict::Continue;
        };

        warn!(
            total_pnl,
            realized = self.realized_pnl,
            unrealized = unrealized_pnl,
            reason = %reason,
            "Daily risk limit reached"
        );
        self.halted = Some(reason);
        RiskVerdict::Halt { reason, total_pnl }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Drop cooldowns that have run out
    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        self.cooldowns.retain(|_, until| *until > now);
    }

    pub fn status(&self, now: DateTime<Utc>) -> RiskStatus {
        let mut cooldowns: Vec<(i64, i64)> = self
            .cooldowns
            .keys()
            .filter_map(|&k| self.cooldown_remaining(k, now).map(|d| (k, d.num_seconds())))
            .collect();
        cooldowns.sort_unstable();

        let mut stop_hits: Vec<(i64, u32)> = self.stop_hits.iter().map(|(k, v)| (*k, *v)).collect();
        stop_hits.sort_unstable();

        RiskStatus {
            realized_pnl: self.realized_pnl,
            closed_trades: self.closed_trades,
            max_daily_loss: self.config.max_daily_loss,
            daily_target_profit: self.config.daily_target_profit,
            halted: self.halted.map(|r| r.to_string()),
            cooldowns,
            stop_hits,
            blacklist: self.blacklist.iter().copied().collect(),
        }
    }
}
