//! Configuration management for OI Writer
//!
//! Loads from YAML files + environment variables via .env, then validates the
//! result. An `AppConfig` is immutable once built; hot reload builds a new one
//! and hands it to the engine between iterations.

mod types;

pub use types::*;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Upper bound for every seconds-valued setting: one full day
const MAX_DURATION_SECS: u64 = 86_400;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub instrument: InstrumentConfig,
    pub session: SessionConfig,
    pub loops: LoopConfig,
    pub entry: EntryConfig,
    pub stop_loss: StopLossConfig,
    pub risk: RiskConfig,
    pub market_data: MarketDataConfig,
    pub execution: ExecutionConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Underlying index traded by the engine (cache key)
    pub symbol: String,
    /// Prefix used to build a trading symbol when the feed does not carry one,
    /// e.g. `NIFTY25DEC` + `22000` + `CE`
    pub symbol_prefix: String,
    /// Contract lot size
    pub lot_size: u32,
    /// Lots per entry
    pub lots_multiplier: u32,
    /// Exchange price tick
    pub tick_size: f64,
    /// Strikes kept on each side of ATM in the cache
    pub strike_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Engine stays idle before this time
    pub start_time: ClockTime,
    /// No scans for new entries after this time
    pub no_new_entry_time: ClockTime,
    /// Everything is squared off at this time and the engine stops
    pub square_off_time: ClockTime,
    /// Exchange offset from UTC in minutes (IST = 330)
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Fast loop cadence (trade management)
    pub fast_interval_secs: u64,
    /// Slow loop cadence (entry scans)
    pub scan_interval_secs: u64,
    /// Breathing stop recompute interval
    pub sl_update_interval_secs: u64,
    /// Sleep while waiting for the start time
    pub idle_poll_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryConfig {
    /// Entry only if LTP <= ATP * (1 - min_buffer_pct)
    pub min_buffer_pct: f64,
    /// Entry only if LTP >= ATP * (1 - max_buffer_pct)
    pub max_buffer_pct: f64,
    /// Continuous time inside the band before an entry fires
    pub dwell_secs: u64,
    /// Consecutive scans the OI leader must hold
    pub oi_stability_required: u32,
    /// Open positions allowed per side
    pub max_open_positions: usize,
    /// Scans are skipped when fewer strikes than this carry OI or LTP
    pub min_valid_strikes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossConfig {
    /// Stop = ATP * (1 + sl_pct)
    pub sl_pct: f64,
    /// Limit price offset above the trigger for protective orders
    pub limit_buffer: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Re-entry ban on a strike after exit
    pub cooldown_secs: u64,
    /// Total P&L at or below -max_daily_loss halts the session
    pub max_daily_loss: f64,
    /// Total P&L at or above daily_target_profit halts the session
    pub daily_target_profit: f64,
    /// Stop-loss hits on a strike before it is blacklisted
    pub max_retries_per_strike: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataConfig {
    pub source: DataSource,
    /// Snapshots older than this are unusable
    pub staleness_secs: u64,
    /// Background fetch cadence
    pub fetch_interval_ms: u64,
    /// Per-request timeout for the quote source
    pub request_timeout_ms: u64,
    /// Snapshot endpoint for the live source
    pub live_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    /// Broker REST base URL (live mode)
    pub base_url: String,
    /// Per-call broker timeout
    pub order_timeout_ms: u64,
    /// Product code sent with every order
    pub product: String,
    /// Exchange segment sent with every order
    pub exchange_segment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Days of closed trades `load_recent` returns
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Default filter when RUST_LOG is unset
    pub filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instrument: InstrumentConfig {
                symbol: "NIFTY".to_string(),
                symbol_prefix: "NIFTY25DEC".to_string(),
                lot_size: 75,
                lots_multiplier: 1,
                tick_size: 0.05,
                strike_window: 12,
            },
            session: SessionConfig {
                start_time: ClockTime::hm(9, 15),
                no_new_entry_time: ClockTime::hm(14, 0),
                square_off_time: ClockTime::hm(15, 15),
                utc_offset_minutes: 330,
            },
            loops: LoopConfig {
                fast_interval_secs: 2,
                scan_interval_secs: 60,
                sl_update_interval_secs: 300,
                idle_poll_secs: 30,
            },
            entry: EntryConfig {
                min_buffer_pct: 0.05,
                max_buffer_pct: 0.20,
                dwell_secs: 60,
                oi_stability_required: 2,
                max_open_positions: 2,
                min_valid_strikes: 5,
            },
            stop_loss: StopLossConfig {
                sl_pct: 0.10,
                limit_buffer: 0.5,
            },
            risk: RiskConfig {
                cooldown_secs: 900,
                max_daily_loss: 5000.0,
                daily_target_profit: 10000.0,
                max_retries_per_strike: 2,
            },
            market_data: MarketDataConfig {
                source: DataSource::Simulated,
                staleness_secs: 5,
                fetch_interval_ms: 1000,
                request_timeout_ms: 3000,
                live_url: "http://127.0.0.1:8765/option-chain".to_string(),
            },
            execution: ExecutionConfig {
                mode: ExecutionMode::Paper,
                base_url: String::new(),
                order_timeout_ms: 3000,
                product: "NRML".to_string(),
                exchange_segment: "nse_fo".to_string(),
            },
            persistence: PersistenceConfig {
                data_dir: "./data".to_string(),
                retention_days: 3,
            },
            logging: LoggingConfig {
                json: false,
                filter: "oi_writer=info".to_string(),
            },
        }
    }
}

impl SessionConfig {
    /// Before the configured start time
    pub fn is_before_start(&self, now: DateTime<Utc>) -> bool {
        local_time_of_day(now, self.utc_offset_minutes) < self.start_time.0
    }

    /// Inside [start, no_new_entry]
    pub fn is_entry_window(&self, now: DateTime<Utc>) -> bool {
        let t = local_time_of_day(now, self.utc_offset_minutes);
        self.start_time.0 <= t && t <= self.no_new_entry_time.0
    }

    /// At or after the square-off time
    pub fn is_square_off(&self, now: DateTime<Utc>) -> bool {
        local_time_of_day(now, self.utc_offset_minutes) >= self.square_off_time.0
    }
}

impl LoopConfig {
    pub fn fast_interval(&self) -> Duration {
        Duration::from_secs(self.fast_interval_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }
}

impl InstrumentConfig {
    /// Order quantity for one entry
    pub fn order_quantity(&self) -> u32 {
        self.lot_size * self.lots_multiplier
    }

    /// Fallback trading symbol for a strike/side
    pub fn fallback_symbol(&self, strike: i64, side: crate::types::Side) -> String {
        format!("{}{}{}", self.symbol_prefix, strike, side)
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();
        Self::load_from("config/default", Some("config/local"))
    }

    /// Load from an explicit base file (and optional overlay), then env vars
    pub fn load_from(base: &str, overlay: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder()
            // Instrument defaults
            .set_default("instrument.symbol", "NIFTY")?
            .set_default("instrument.symbol_prefix", "NIFTY25DEC")?
            .set_default("instrument.lot_size", 75)?
            .set_default("instrument.lots_multiplier", 1)?
            .set_default("instrument.tick_size", 0.05)?
            .set_default("instrument.strike_window", 12)?
            // Session defaults
            .set_default("session.start_time", "09:15")?
            .set_default("session.no_new_entry_time", "14:00")?
            .set_default("session.square_off_time", "15:15")?
            .set_default("session.utc_offset_minutes", 330)?
            // Loop defaults
            .set_default("loops.fast_interval_secs", 2)?
            .set_default("loops.scan_interval_secs", 60)?
            .set_default("loops.sl_update_interval_secs", 300)?
            .set_default("loops.idle_poll_secs", 30)?
            // Entry defaults
            .set_default("entry.min_buffer_pct", 0.05)?
            .set_default("entry.max_buffer_pct", 0.20)?
            .set_default("entry.dwell_secs", 60)?
            .set_default("entry.oi_stability_required", 2)?
            .set_default("entry.max_open_positions", 2)?
            .set_default("entry.min_valid_strikes", 5)?
            // Stop-loss defaults
            .set_default("stop_loss.sl_pct", 0.10)?
            .set_default("stop_loss.limit_buffer", 0.5)?
            // Risk defaults
            .set_default("risk.cooldown_secs", 900)?
            .set_default("risk.max_daily_loss", 5000.0)?
            .set_default("risk.daily_target_profit", 10000.0)?
            .set_default("risk.max_retries_per_strike", 2)?
            // Market data defaults
            .set_default("market_data.source", "simulated")?
            .set_default("market_data.staleness_secs", 5)?
            .set_default("market_data.fetch_interval_ms", 1000)?
            .set_default("market_data.request_timeout_ms", 3000)?
            .set_default(
                "market_data.live_url",
                "http://127.0.0.1:8765/option-chain",
            )?
            // Execution defaults
            .set_default("execution.mode", "paper")?
            .set_default("execution.base_url", "")?
            .set_default("execution.order_timeout_ms", 3000)?
            .set_default("execution.product", "NRML")?
            .set_default("execution.exchange_segment", "nse_fo")?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.retention_days", 3)?
            // Logging defaults
            .set_default("logging.json", false)?
            .set_default("logging.filter", "oi_writer=info")?
            // Load config file if exists
            .add_source(File::with_name(base).required(false));

        if let Some(overlay) = overlay {
            builder = builder.add_source(File::with_name(overlay).required(false));
        }

        let config = builder
            // Override with environment variables (OIW__SECTION__KEY)
            .add_source(
                Environment::with_prefix("OIW")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject contradictory or out-of-range values
    pub fn validate(&self) -> EngineResult<()> {
        let fail = |msg: String| Err(EngineError::ConfigInconsistency(msg));

        let entry = &self.entry;
        if !(0.0..1.0).contains(&entry.min_buffer_pct) || !(0.0..1.0).contains(&entry.max_buffer_pct) {
            return fail(format!(
                "buffer percentages must be in [0, 1): min={} max={}",
                entry.min_buffer_pct, entry.max_buffer_pct
            ));
        }
        if entry.min_buffer_pct >= entry.max_buffer_pct {
            return fail(format!(
                "min_buffer_pct ({}) must be below max_buffer_pct ({})",
                entry.min_buffer_pct, entry.max_buffer_pct
            ));
        }
        if entry.oi_stability_required == 0 {
            return fail("oi_stability_required must be at least 1".into());
        }
        if entry.max_open_positions == 0 {
            return fail("max_open_positions must be at least 1".into());
        }

        if !(self.stop_loss.sl_pct > 0.0) || !self.stop_loss.sl_pct.is_finite() {
            return fail(format!("sl_pct must be positive, got {}", self.stop_loss.sl_pct));
        }
        if self.stop_loss.limit_buffer < 0.0 {
            return fail(format!(
                "limit_buffer must not be negative, got {}",
                self.stop_loss.limit_buffer
            ));
        }

        let risk = &self.risk;
        if !(risk.max_daily_loss > 0.0) || !(risk.daily_target_profit > 0.0) {
            return fail(format!(
                "daily limits must be positive: max_daily_loss={} daily_target_profit={}",
                risk.max_daily_loss, risk.daily_target_profit
            ));
        }
        if risk.max_retries_per_strike == 0 {
            return fail("max_retries_per_strike must be at least 1".into());
        }

        let inst = &self.instrument;
        if inst.lot_size == 0 || inst.lots_multiplier == 0 {
            return fail("lot_size and lots_multiplier must be positive".into());
        }
        if inst.lot_size.checked_mul(inst.lots_multiplier).is_none() {
            return fail(format!(
                "order quantity overflows: lot_size={} lots_multiplier={}",
                inst.lot_size, inst.lots_multiplier
            ));
        }
        if !(inst.tick_size > 0.0) {
            return fail(format!("tick_size must be positive, got {}", inst.tick_size));
        }
        if inst.strike_window == 0 {
            return fail("strike_window must be at least 1".into());
        }
        if inst.symbol.trim().is_empty() {
            return fail("instrument.symbol is empty".into());
        }

        let s = &self.session;
        if !(s.start_time < s.no_new_entry_time && s.no_new_entry_time <= s.square_off_time) {
            return fail(format!(
                "session times out of order: start={} no_new_entry={} square_off={}",
                s.start_time, s.no_new_entry_time, s.square_off_time
            ));
        }
        if s.utc_offset_minutes.abs() > 14 * 60 {
            return fail(format!("utc_offset_minutes out of range: {}", s.utc_offset_minutes));
        }

        let l = &self.loops;
        if l.fast_interval_secs == 0 || l.idle_poll_secs == 0 {
            return fail("loop intervals must be positive".into());
        }
        if l.scan_interval_secs < l.fast_interval_secs {
            return fail(format!(
                "scan_interval_secs ({}) must not be shorter than fast_interval_secs ({})",
                l.scan_interval_secs, l.fast_interval_secs
            ));
        }

        let durations = [
            ("loops.fast_interval_secs", l.fast_interval_secs),
            ("loops.scan_interval_secs", l.scan_interval_secs),
            ("loops.sl_update_interval_secs", l.sl_update_interval_secs),
            ("loops.idle_poll_secs", l.idle_poll_secs),
            ("entry.dwell_secs", entry.dwell_secs),
            ("risk.cooldown_secs", risk.cooldown_secs),
            ("market_data.staleness_secs", self.market_data.staleness_secs),
        ];
        for (name, secs) in durations {
            if secs > MAX_DURATION_SECS {
                return fail(format!("{name} must be at most {MAX_DURATION_SECS}, got {secs}"));
            }
        }

        let md = &self.market_data;
        if md.staleness_secs == 0 || md.fetch_interval_ms == 0 || md.request_timeout_ms == 0 {
            return fail("market_data intervals must be positive".into());
        }
        if md.source == DataSource::Live && md.live_url.trim().is_empty() {
            return fail("market_data.live_url is required for the live source".into());
        }

        if self.execution.order_timeout_ms == 0 {
            return fail("order_timeout_ms must be positive".into());
        }
        if self.execution.mode == ExecutionMode::Live && self.execution.base_url.trim().is_empty() {
            return fail("execution.base_url is required in live mode".into());
        }

        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "symbol={} mode={} data={:?} window={}-{}/{} band={:.2}-{:.2} sl={:.2} dwell={}s",
            self.instrument.symbol,
            self.execution.mode.label(),
            self.market_data.source,
            self.session.start_time,
            self.session.no_new_entry_time,
            self.session.square_off_time,
            self.entry.min_buffer_pct,
            self.entry.max_buffer_pct,
            self.stop_loss.sl_pct,
            self.entry.dwell_secs,
        )
    }

    /// Effective configuration as YAML, for `--print-config`
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to render configuration")
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn load_without_files_matches_defaults() {
        let cfg = AppConfig::load_from("config/does-not-exist", None).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn load_reads_yaml_overrides() {
        let dir = std::env::temp_dir().join(format!("oiw_config_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("strategy.yaml");
        std::fs::write(
            &path,
            "entry:\n  dwell_secs: 90\nsession:\n  start_time: \"09:30\"\nexecution:\n  mode: paper\n",
        )
        .unwrap();

        let base = path.with_extension("");
        let cfg = AppConfig::load_from(base.to_str().unwrap(), None).unwrap();
        assert_eq!(cfg.entry.dwell_secs, 90);
        assert_eq!(cfg.session.start_time, ClockTime::hm(9, 30));
        assert_eq!(cfg.entry.min_buffer_pct, 0.05);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn inverted_buffer_band_fails_fast() {
        let mut cfg = AppConfig::default();
        cfg.entry.min_buffer_pct = 0.20;
        cfg.entry.max_buffer_pct = 0.05;
        assert!(matches!(
            cfg.validate(),
            Err(EngineError::ConfigInconsistency(_))
        ));
    }

    #[test]
    fn negative_percentages_fail_fast() {
        let mut cfg = AppConfig::default();
        cfg.entry.min_buffer_pct = -0.05;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.stop_loss.sl_pct = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_durations_fail_fast() {
        let mut cfg = AppConfig::default();
        cfg.risk.cooldown_secs = 10_000_000_000_000_000;
        assert!(matches!(
            cfg.validate(),
            Err(EngineError::ConfigInconsistency(_))
        ));

        let setters: [fn(&mut AppConfig); 3] = [
            |c| c.entry.dwell_secs = u64::MAX,
            |c| c.loops.scan_interval_secs = 86_401,
            |c| c.loops.sl_update_interval_secs = u64::MAX,
        ];
        for set in setters {
            let mut cfg = AppConfig::default();
            set(&mut cfg);
            assert!(cfg.validate().is_err());
        }

        let mut cfg = AppConfig::default();
        cfg.risk.cooldown_secs = 86_400;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn order_quantity_overflow_fails_fast() {
        let mut cfg = AppConfig::default();
        cfg.instrument.lot_size = u32::MAX;
        cfg.instrument.lots_multiplier = 2;
        assert!(matches!(
            cfg.validate(),
            Err(EngineError::ConfigInconsistency(_))
        ));
    }

    #[test]
    fn session_order_is_enforced() {
        let mut cfg = AppConfig::default();
        cfg.session.no_new_entry_time = ClockTime::hm(15, 30);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn live_mode_requires_endpoint() {
        let mut cfg = AppConfig::default();
        cfg.execution.mode = ExecutionMode::Live;
        assert!(cfg.validate().is_err());
        cfg.execution.base_url = "https://broker.example".into();
        cfg.validate().unwrap();
    }

    #[test]
    fn session_windows_use_exchange_offset() {
        let session = AppConfig::default().session;
        // 03:30 UTC = 09:00 IST
        let early = Utc.with_ymd_and_hms(2026, 1, 5, 3, 30, 0).unwrap();
        assert!(session.is_before_start(early));
        // 06:00 UTC = 11:30 IST
        let midday = Utc.with_ymd_and_hms(2026, 1, 5, 6, 0, 0).unwrap();
        assert!(session.is_entry_window(midday));
        assert!(!session.is_square_off(midday));
        // 09:00 UTC = 14:30 IST
        let late = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        assert!(!session.is_entry_window(late));
        assert!(!session.is_square_off(late));
        // 09:50 UTC = 15:20 IST
        let close = Utc.with_ymd_and_hms(2026, 1, 5, 9, 50, 0).unwrap();
        assert!(session.is_square_off(close));
    }

    #[test]
    fn quantity_and_symbol_helpers() {
        let mut inst = AppConfig::default().instrument;
        inst.lots_multiplier = 2;
        assert_eq!(inst.order_quantity(), 150);
        assert_eq!(
            inst.fallback_symbol(22000, crate::types::Side::PE),
            "NIFTY25DEC22000PE"
        );
    }
}
