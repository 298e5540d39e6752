use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::buffer::DwellStatus;
use crate::config::AppConfig;
use crate::oi_tracker::StabilityState;
use crate::risk::RiskStatus;
use crate::trade::Trade;
use crate::types::{EngineState, Side};

#[derive(Debug)]
pub enum EngineCommand {
    Stop,
    ManualExit { side: Side, strike: i64 },
    SquareOff,
    ApplyConfig(Box<AppConfig>),
    Status(oneshot::Sender<EngineStatus>),
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub running: bool,
    pub open_trades: Vec<Trade>,
    pub watching: Vec<DwellStatus>,
    pub ce_leader: StabilityState,
    pub pe_leader: StabilityState,
    pub risk: RiskStatus,
    pub last_scan: Option<DateTime<Utc>>,
    pub config: String,
}

/// Cloneable control surface for a running engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    running: Arc<AtomicBool>,
}

impl EngineHandle {
    pub(crate) fn new(tx: mpsc::Sender<EngineCommand>, running: Arc<AtomicBool>) -> Self {
        Self { tx, running }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the engine. Open trades are left as they are.
    pub async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        // The engine may already have exited; the flag alone is enough then
        let _ = self.tx.send(EngineCommand::Stop).await;
        Ok(())
    }

    pub async fn manual_exit(&self, side: Side, strike: i64) -> Result<()> {
        self.tx
            .send(EngineCommand::ManualExit { side, strike })
            .await
            .context("Engine is not accepting commands")?;
        Ok(())
    }

    /// Close everything and stop
    pub async fn square_off(&self) -> Result<()> {
        self.tx
            .send(EngineCommand::SquareOff)
            .await
            .context("Engine is not accepting commands")?;
        Ok(())
    }

    /// Validate and queue a new configuration. An invalid config is refused
    /// here and the engine keeps the old one.
    pub async fn apply_config(&self, config: AppConfig) -> Result<()> {
        config.validate()?;
        self.tx
            .send(EngineCommand::ApplyConfig(Box::new(config)))
            .await
            .context("Engine is not accepting commands")?;
        Ok(())
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Status(tx))
            .await
            .context("Engine is not accepting commands")?;
        rx.await.context("Engine dropped the status request")
    }
}
