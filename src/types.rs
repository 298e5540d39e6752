//! Core types used throughout OI Writer
//!
//! Defines the option-chain shapes written by the fetcher and read by the
//! engine, plus the small enums shared between modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;

/// Option side. CE = call, PE = put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    CE,
    PE,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::CE, Side::PE];

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "CE" | "CALL" => Some(Side::CE),
            "PE" | "PUT" => Some(Side::PE),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::CE => write!(f, "CE"),
            Side::PE => write!(f, "PE"),
        }
    }
}

/// A numeric quote field as the feed delivers it.
///
/// Feeds are inconsistent: the same field can arrive as a JSON number, a
/// numeric string, or a string with thousands separators (`"1,250"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuoteField {
    Number(f64),
    Text(String),
}

impl QuoteField {
    /// Parse to a finite f64, or `MalformedQuote`.
    pub fn parse(&self, field: &'static str) -> Result<f64, EngineError> {
        let value = match self {
            QuoteField::Number(n) => Some(*n),
            QuoteField::Text(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        };
        match value {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(EngineError::MalformedQuote {
                field,
                raw: self.to_string(),
            }),
        }
    }
}

impl From<f64> for QuoteField {
    fn from(value: f64) -> Self {
        QuoteField::Number(value)
    }
}

impl fmt::Display for QuoteField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteField::Number(n) => write!(f, "{n}"),
            QuoteField::Text(s) => write!(f, "{s}"),
        }
    }
}

fn parse_optional(field: &Option<QuoteField>, name: &'static str) -> Result<f64, EngineError> {
    match field {
        Some(value) => value.parse(name),
        None => Err(EngineError::MalformedQuote {
            field: name,
            raw: "<missing>".to_string(),
        }),
    }
}

/// Quote for one leg (call or put) of a strike
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Last traded price
    #[serde(default)]
    pub ltp: Option<QuoteField>,
    /// Average traded price
    #[serde(default)]
    pub atp: Option<QuoteField>,
    /// Open interest
    #[serde(default)]
    pub oi: Option<QuoteField>,
    #[serde(default)]
    pub bid: Option<QuoteField>,
    #[serde(default)]
    pub ask: Option<QuoteField>,
    /// Exchange trading symbol, when the feed resolves it
    #[serde(default, alias = "pTrdSymbol")]
    pub symbol: Option<String>,
}

impl OptionQuote {
    /// Build a fully numeric quote
    pub fn new(ltp: f64, atp: f64, oi: f64) -> Self {
        Self {
            ltp: Some(ltp.into()),
            atp: Some(atp.into()),
            oi: Some(oi.into()),
            bid: None,
            ask: None,
            symbol: None,
        }
    }

    pub fn ltp(&self) -> Result<f64, EngineError> {
        parse_optional(&self.ltp, "ltp")
    }

    pub fn atp(&self) -> Result<f64, EngineError> {
        parse_optional(&self.atp, "atp")
    }

    pub fn oi(&self) -> Result<f64, EngineError> {
        parse_optional(&self.oi, "oi")
    }

    /// Open interest with missing or non-numeric values read as zero
    pub fn oi_or_zero(&self) -> f64 {
        self.oi().unwrap_or(0.0)
    }

    /// True when every numeric field is zero or absent
    pub fn is_empty(&self) -> bool {
        [&self.ltp, &self.atp, &self.oi]
            .iter()
            .all(|f| f.as_ref().and_then(|v| v.parse("any").ok()).unwrap_or(0.0) == 0.0)
    }

    /// True when the leg carries a positive OI or LTP
    pub fn has_activity(&self) -> bool {
        self.oi_or_zero() > 0.0 || self.ltp().map(|v| v > 0.0).unwrap_or(false)
    }
}

/// One row of the option chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeQuote {
    pub strike: i64,
    #[serde(default)]
    pub call: OptionQuote,
    #[serde(default)]
    pub put: OptionQuote,
}

impl StrikeQuote {
    pub fn new(strike: i64, call: OptionQuote, put: OptionQuote) -> Self {
        Self { strike, call, put }
    }

    pub fn leg(&self, side: Side) -> &OptionQuote {
        match side {
            Side::CE => &self.call,
            Side::PE => &self.put,
        }
    }
}

/// Find a strike row in a chain
pub fn find_strike(chain: &[StrikeQuote], strike: i64) -> Option<&StrikeQuote> {
    chain.iter().find(|row| row.strike == strike)
}

/// Complete option-chain snapshot for one underlying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChainSnapshot {
    pub instrument: String,
    pub chain: Vec<StrikeQuote>,
    pub spot: f64,
    pub captured_at: DateTime<Utc>,
}

/// Buy/sell direction of a broker order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Single-letter transaction type used by the broker API
    pub fn code(&self) -> &'static str {
        match self {
            OrderSide::Buy => "B",
            OrderSide::Sell => "S",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Why a trade was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    Manual,
    SquareOff,
    DailyLossLimit,
    DailyTargetReached,
}

impl ExitReason {
    /// Whether this exit counts toward the strike's blacklist counter
    pub fn is_stop_hit(&self) -> bool {
        matches!(self, ExitReason::StopLoss)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "SL_HIT"),
            ExitReason::Manual => write!(f, "MANUAL"),
            ExitReason::SquareOff => write!(f, "SQUARE_OFF"),
            ExitReason::DailyLossLimit => write!(f, "MAX_DAILY_LOSS"),
            ExitReason::DailyTargetReached => write!(f, "DAILY_TARGET"),
        }
    }
}

/// Engine state as reported to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    /// Before the configured start time
    Idle,
    /// Inside the trading window, looking for a stable OI leader
    Scanning,
    /// At least one dwell timer is running
    WatchingEntry,
    /// At least one position is open
    InTrade,
    /// Flat, with at least one strike cooling down
    Cooldown,
    /// Terminal
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "IDLE"),
            EngineState::Scanning => write!(f, "SCANNING"),
            EngineState::WatchingEntry => write!(f, "WATCHING_ENTRY"),
            EngineState::InTrade => write!(f, "IN_TRADE"),
            EngineState::Cooldown => write!(f, "COOLDOWN"),
            EngineState::Stopped => write!(f, "STOPPED"),
        }
    }
}
