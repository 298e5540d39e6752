//! Value types used inside the configuration sections

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Wall-clock time of day written as `"HH:MM"` in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockTime(pub NaiveTime);

impl ClockTime {
    pub fn parse(raw: &str) -> Option<Self> {
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .ok()
            .map(ClockTime)
    }

    pub fn hm(hour: u32, minute: u32) -> Self {
        ClockTime(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN))
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ClockTime::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("expected HH:MM, got {raw:?}")))
    }
}

/// Where option-chain quotes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Randomized synthetic chain
    Simulated,
    /// HTTP snapshot feed
    Live,
}

/// Where orders go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// No-op simulator, every order succeeds instantly
    Paper,
    /// Real broker REST API
    Live,
}

impl ExecutionMode {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionMode::Paper => "PAPER",
            ExecutionMode::Live => "LIVE",
        }
    }
}

/// Convert an instant to the exchange's local time of day
pub fn local_time_of_day(now: DateTime<Utc>, utc_offset_minutes: i32) -> NaiveTime {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset).time()
}
