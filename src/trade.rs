//! Open short-option position

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ExitReason, Side};

/// Round a price to the nearest exchange tick
pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    let (Some(p), Some(t)) = (Decimal::from_f64(price), Decimal::from_f64(tick)) else {
        return price;
    };
    if t.is_zero() {
        return price;
    }
    let ticks = (p / t).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    (ticks * t).normalize().to_f64().unwrap_or(price)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Open => write!(f, "OPEN"),
            TradeStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// One written option leg, from confirmed entry to exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub side: Side,
    pub strike: i64,
    /// Exchange trading symbol
    pub symbol: String,
    pub entry_price: f64,
    pub quantity: u32,
    /// Current stop; never raised
    pub sl_price: f64,
    /// ATP observed at entry
    pub entry_atp: f64,
    pub ltp: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub entry_time: DateTime<Utc>,
    /// Last time the breathing stop was evaluated
    pub last_sl_update: DateTime<Utc>,
    pub entry_order_id: String,
    /// None when the protective order could not be placed
    pub sl_order_id: Option<String>,
    pub status: TradeStatus,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        side: Side,
        strike: i64,
        symbol: String,
        entry_price: f64,
        quantity: u32,
        entry_atp: f64,
        sl_price: f64,
        entry_order_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            side,
            strike,
            symbol,
            entry_price,
            quantity,
            sl_price,
            entry_atp,
            ltp: entry_price,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            entry_time: now,
            last_sl_update: now,
            entry_order_id,
            sl_order_id: None,
            status: TradeStatus::Open,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
        }
    }

    /// Short P&L at a given price
    pub fn pnl_at(&self, price: f64) -> f64 {
        (self.entry_price - price) * self.quantity as f64
    }

    /// Refresh LTP and unrealized P&L
    pub fn mark(&mut self, ltp: f64) {
        self.ltp = ltp;
        self.unrealized_pnl = self.pnl_at(ltp);
    }

    /// Price traded through the stop
    pub fn is_stop_breached(&self) -> bool {
        self.ltp > self.sl_price
    }

    pub fn sl_update_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        now - self.last_sl_update >= interval
    }

    /// Move the stop to `candidate` if it is strictly lower. Returns the old stop
    /// when it moved.
    pub fn tighten_stop(&mut self, candidate: f64, now: DateTime<Utc>) -> Option<f64> {
        self.last_sl_update = now;
        if candidate < self.sl_price {
            let old = self.sl_price;
            self.sl_price = candidate;
            Some(old)
        } else {
            None
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    pub fn close(&mut self, exit_price: f64, reason: ExitReason, now: DateTime<Utc>) {
        self.ltp = exit_price;
        self.realized_pnl = self.pnl_at(exit_price);
        self.unrealized_pnl = 0.0;
        self.exit_price = Some(exit_price);
        self.exit_time = Some(now);
        self.exit_reason = Some(reason);
        self.status = TradeStatus::Closed;
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} x{} @ {:.2} sl {:.2} [{}]",
            self.side, self.strike, self.symbol, self.quantity, self.entry_price, self.sl_price, self.status
        )
    }
}
