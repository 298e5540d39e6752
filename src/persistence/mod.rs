//! CSV Persistence Module
//!
//! Append-only closed-trade history plus a JSON journal of open trades

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::ExecutionMode;
use crate::trade::Trade;
use crate::types::Side;

const HISTORY_FILE: &str = "trade_history.csv";
const JOURNAL_FILE: &str = "open_trades.json";

/// One closed trade as written to history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTradeRecord {
    pub trade_id: String,
    /// PAPER or LIVE
    pub mode: String,
    /// Underlying index
    pub symbol: String,
    pub trading_symbol: String,
    pub side: Side,
    pub strike: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: u32,
    pub pnl: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    /// Exit date, YYYY-MM-DD
    pub date: String,
    pub reason: String,
}

impl ClosedTradeRecord {
    /// Build from a closed trade. Falls back to LTP / now for fields only a
    /// closed trade carries.
    pub fn from_trade(trade: &Trade, mode: ExecutionMode, underlying: &str) -> Self {
        let exit_time = trade.exit_time.unwrap_or_else(Utc::now);
        Self {
            trade_id: trade.id.clone(),
            mode: mode.label().to_string(),
            symbol: underlying.to_string(),
            trading_symbol: trade.symbol.clone(),
            side: trade.side,
            strike: trade.strike,
            entry_price: trade.entry_price,
            exit_price: trade.exit_price.unwrap_or(trade.ltp),
            quantity: trade.quantity,
            pnl: trade.realized_pnl,
            entry_time: trade.entry_time,
            exit_time,
            date: exit_time.format("%Y-%m-%d").to_string(),
            reason: trade
                .exit_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string()),
        }
    }
}

/// Append-only store of closed trades
pub trait TradeHistory: Send + Sync {
    fn save(&self, record: &ClosedTradeRecord) -> Result<()>;
}

/// Appends to `{data_dir}/trade_history.csv`
pub struct CsvTradeHistory {
    path: PathBuf,
    writer: Mutex<csv::Writer<std::fs::File>>,
}

impl CsvTradeHistory {
    pub fn new(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        let path = data_dir.join(HISTORY_FILE);
        let writer = Self::create_writer(&path)?;
        info!(path = %path.display(), "Trade history opened");

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open CSV file")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(writer)
    }

    /// Records whose exit falls within the last `days` days of `now`
    pub fn load_recent(&self, days: u32, now: DateTime<Utc>) -> Result<Vec<ClosedTradeRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let cutoff = now - Duration::days(days as i64);
        let file = fs::File::open(&self.path).context("Failed to open trade history")?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let mut records = Vec::new();
        for result in reader.deserialize() {
            match result {
                Ok(record) => {
                    let record: ClosedTradeRecord = record;
                    if record.exit_time >= cutoff {
                        records.push(record);
                    }
                }
                Err(e) => warn!(error = %e, "Skipping unreadable history row"),
            }
        }

        records.sort_by_key(|r| r.exit_time);
        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TradeHistory for CsvTradeHistory {
    fn save(&self, record: &ClosedTradeRecord) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("trade history writer poisoned"))?;
        writer
            .serialize(record)
            .context("Failed to write trade record")?;
        writer.flush().context("Failed to flush trade writer")?;
        Ok(())
    }
}

/// In-memory history for tests and throwaway paper sessions
#[derive(Default)]
pub struct MemoryTradeHistory {
    records: Mutex<Vec<ClosedTradeRecord>>,
}

impl MemoryTradeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ClosedTradeRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl TradeHistory for MemoryTradeHistory {
    fn save(&self, record: &ClosedTradeRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory history poisoned"))?;
        records.push(record.clone());
        Ok(())
    }
}

/// JSON snapshot of currently open trades, rewritten on every change
pub struct OpenTradeJournal {
    path: PathBuf,
}

impl OpenTradeJournal {
    pub fn new(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(Self {
            path: data_dir.join(JOURNAL_FILE),
        })
    }

    pub fn write(&self, trades: &[Trade]) -> Result<()> {
        let json = serde_json::to_string_pretty(trades).context("Failed to serialize open trades")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).context("Failed to write open trade journal")?;
        fs::rename(&tmp, &self.path).context("Failed to replace open trade journal")?;
        Ok(())
    }

    /// Trades left open by a previous run, for operator inspection
    pub fn read(&self) -> Result<Vec<Trade>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path).context("Failed to read open trade journal")?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).context("Failed to parse open trade journal")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
