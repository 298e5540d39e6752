//! Engine error taxonomy
//!
//! Domain failures the engine reacts to. Application plumbing (config files,
//! startup, CSV I/O) stays on `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Cache entry missing or older than the staleness threshold.
    #[error("Market data unavailable for {instrument}: {reason}")]
    DataUnavailable { instrument: String, reason: String },

    /// A price or OI field could not be read as a number.
    #[error("Malformed quote field {field}: {raw:?}")]
    MalformedQuote { field: &'static str, raw: String },

    /// The broker declined the request.
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// A collaborator call did not answer within its timeout.
    #[error("Network timeout after {timeout_ms}ms during {operation}")]
    NetworkTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Configuration values contradict each other or are out of range.
    #[error("Configuration inconsistency: {0}")]
    ConfigInconsistency(String),
}

impl EngineError {
    /// Errors that mean "nothing usable this cycle" and should self-heal
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::DataUnavailable { .. } | EngineError::NetworkTimeout { .. }
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_missing_data_are_transient() {
        let timeout = EngineError::NetworkTimeout {
            operation: "place_order",
            timeout_ms: 3000,
        };
        assert!(timeout.is_transient());
        assert!(EngineError::DataUnavailable {
            instrument: "NIFTY".into(),
            reason: "stale".into()
        }
        .is_transient());
        assert!(!EngineError::OrderRejected("margin".into()).is_transient());
    }

    #[test]
    fn messages_carry_context() {
        let err = EngineError::ConfigInconsistency("min_buffer_pct >= max_buffer_pct".into());
        assert!(err.to_string().contains("min_buffer_pct"));
    }
}
