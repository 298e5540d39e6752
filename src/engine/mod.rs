//! Strategy engine
//!
//! Single-task state machine. Each iteration drains operator commands, runs
//! the fast loop (trade management, dwell re-validation, daily limits) and,
//! when due, the slow loop (OI leader scan and entry evaluation).

pub mod buffer;
mod handle;

pub use handle::{EngineCommand, EngineHandle, EngineStatus};

use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerExecutionAdapter, OrderRequest, OrderState};
use crate::config::AppConfig;
use crate::error::{EngineError, EngineResult};
use crate::market_data::{CachedChain, MarketDataCache};
use crate::oi_tracker::{find_highest_oi, OpenInterestTracker, StabilityReport};
use crate::persistence::{ClosedTradeRecord, OpenTradeJournal, TradeHistory};
use crate::risk::{EntryGate, RiskGovernor, RiskVerdict};
use crate::trade::{round_to_tick, Trade};
use crate::types::{find_strike, EngineState, ExitReason, OptionQuote, OrderSide, Side};

use buffer::{BufferBand, BufferTimers, DwellCheck};

const COMMAND_QUEUE: usize = 32;

/// Run a collaborator call under a timeout
async fn timed<T, F>(operation: &'static str, timeout_ms: u64, fut: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::NetworkTimeout {
            operation,
            timeout_ms,
        }),
    }
}

/// Parsed, positive LTP/ATP/OI for one leg
struct LegPrices {
    ltp: f64,
    atp: f64,
}

fn leg_prices(leg: &OptionQuote) -> EngineResult<LegPrices> {
    let ltp = leg.ltp()?;
    let atp = leg.atp()?;
    let oi = leg.oi()?;
    if ltp <= 0.0 || atp <= 0.0 || oi <= 0.0 {
        return Err(EngineError::MalformedQuote {
            field: "ltp/atp/oi",
            raw: format!("ltp={} atp={} oi={}", ltp, atp, oi),
        });
    }
    Ok(LegPrices { ltp, atp })
}

pub struct StrategyEngine {
    config: AppConfig,
    cache: Arc<MarketDataCache>,
    broker: Arc<dyn BrokerExecutionAdapter>,
    history: Arc<dyn TradeHistory>,
    journal: Option<OpenTradeJournal>,
    tracker: OpenInterestTracker,
    risk: RiskGovernor,
    timers: BufferTimers,
    trades: Vec<Trade>,
    state: EngineState,
    stopped: bool,
    last_scan: Option<DateTime<Utc>>,
    running: Arc<AtomicBool>,
    commands: mpsc::Receiver<EngineCommand>,
}

impl StrategyEngine {
    pub fn new(
        config: AppConfig,
        cache: Arc<MarketDataCache>,
        broker: Arc<dyn BrokerExecutionAdapter>,
        history: Arc<dyn TradeHistory>,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let running = Arc::new(AtomicBool::new(true));

        let engine = Self {
            tracker: OpenInterestTracker::new(config.entry.oi_stability_required),
            risk: RiskGovernor::new(config.risk.clone()),
            config,
            cache,
            broker,
            history,
            journal: None,
            timers: BufferTimers::new(),
            trades: Vec::new(),
            state: EngineState::Idle,
            stopped: false,
            last_scan: None,
            running: running.clone(),
            commands: rx,
        };

        (engine, EngineHandle::new(tx, running))
    }

    /// Mirror open trades into a JSON journal
    pub fn with_journal(mut self, journal: OpenTradeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn open_trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn risk(&self) -> &RiskGovernor {
        &self.risk
    }

    pub fn timers(&self) -> &BufferTimers {
        &self.timers
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Drive the engine until stopped
    pub async fn run(mut self) {
        info!(
            config = %self.config,
            broker = self.broker.name(),
            "Strategy engine started"
        );
        let mut commands_open = true;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                self.stop("running flag cleared");
            }
            if commands_open {
                commands_open = self.drain_commands(Utc::now()).await;
            }
            if self.stopped {
                break;
            }

            let now = Utc::now();
            self.tick(now).await;
            if self.stopped {
                break;
            }

            let pause = if self.config.session.is_before_start(now) {
                self.config.loops.idle_poll()
            } else {
                self.config.loops.fast_interval()
            };

            if commands_open {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    cmd = self.commands.recv() => match cmd {
                        Some(cmd) => self.handle_command(cmd, Utc::now()).await,
                        None => commands_open = false,
                    },
                }
            } else {
                tokio::time::sleep(pause).await;
            }
        }

        if !self.trades.is_empty() {
            warn!(open = self.trades.len(), "Engine stopped with open trades");
        }
        info!("Strategy engine stopped");
    }

    /// Handle every queued command. Returns false once all handles are gone.
    pub async fn drain_commands(&mut self, now: DateTime<Utc>) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => self.handle_command(cmd, now).await,
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    pub async fn handle_command(&mut self, cmd: EngineCommand, now: DateTime<Utc>) {
        match cmd {
            EngineCommand::Stop => {
                info!("Stop requested");
                self.stop("manual stop");
            }
            EngineCommand::ManualExit { side, strike } => {
                self.manual_exit(side, strike, now).await;
                self.update_state(now);
            }
            EngineCommand::SquareOff => {
                info!("Square-off requested");
                self.square_off_all(ExitReason::SquareOff, now).await;
                self.stop("square-off command");
            }
            EngineCommand::ApplyConfig(config) => self.apply_config(*config),
            EngineCommand::Status(reply) => {
                let _ = reply.send(self.status(now));
            }
        }
    }

    fn apply_config(&mut self, config: AppConfig) {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Config update rejected, keeping current config");
            return;
        }
        if config.market_data.staleness_secs != self.config.market_data.staleness_secs
            || config.instrument.strike_window != self.config.instrument.strike_window
        {
            warn!("Cache staleness and strike window take effect on restart");
        }

        self.tracker.set_threshold(config.entry.oi_stability_required);
        self.risk.update_config(config.risk.clone());
        info!(config = %config, "Config applied");
        self.config = config;
    }

    pub fn status(&self, now: DateTime<Utc>) -> EngineStatus {
        EngineStatus {
            state: self.state,
            running: self.running.load(Ordering::SeqCst) && !self.stopped,
            open_trades: self.trades.clone(),
            watching: self.timers.status(now),
            ce_leader: self.tracker.state(Side::CE),
            pe_leader: self.tracker.state(Side::PE),
            risk: self.risk.status(now),
            last_scan: self.last_scan,
            config: self.config.digest(),
        }
    }

    /// One engine iteration at `now`
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        if self.stopped {
            return;
        }

        if self.config.session.is_square_off(now) {
            if !self.trades.is_empty() {
                info!(open = self.trades.len(), "Square-off time reached");
            }
            self.square_off_all(ExitReason::SquareOff, now).await;
            self.stop("square-off time");
            return;
        }

        if self.config.session.is_before_start(now) {
            self.update_state(now);
            return;
        }

        self.fast_loop(now).await;
        if self.stopped {
            return;
        }

        if self.config.session.is_entry_window(now) && self.scan_due(now) {
            self.last_scan = Some(now);
            self.scan(now).await;
        }

        self.risk.prune_expired(now);
        self.update_state(now);
    }

    fn scan_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_scan {
            None => true,
            Some(last) => now - last >= Duration::seconds(self.config.loops.scan_interval_secs as i64),
        }
    }

    fn stop(&mut self, reason: &str) {
        if !self.stopped {
            warn!(reason, "Engine stopping");
        }
        self.stopped = true;
        self.running.store(false, Ordering::SeqCst);
        self.set_state(EngineState::Stopped, reason);
    }

    fn set_state(&mut self, next: EngineState, reason: &str) {
        if next != self.state {
            info!(from = %self.state, to = %next, reason, "State transition");
            self.state = next;
        }
    }

    fn update_state(&mut self, now: DateTime<Utc>) {
        let (next, reason) = if self.stopped {
            (EngineState::Stopped, "stopped")
        } else if self.config.session.is_before_start(now) {
            (EngineState::Idle, "before start time")
        } else if !self.trades.is_empty() {
            (EngineState::InTrade, "position open")
        } else if !self.timers.is_empty() {
            (EngineState::WatchingEntry, "dwell timer running")
        } else if self.risk.has_active_cooldowns(now) {
            (EngineState::Cooldown, "strike cooling down")
        } else {
            (EngineState::Scanning, "looking for a stable OI leader")
        };
        self.set_state(next, reason);
    }

    // ---- fast loop ----

    async fn fast_loop(&mut self, now: DateTime<Utc>) {
        let symbol = self.config.instrument.symbol.clone();
        let chain = match self.cache.fresh(&symbol, now) {
            Ok(chain) => chain,
            Err(e) => {
                if !self.trades.is_empty() || !self.timers.is_empty() {
                    warn!(error = %e, "Skipping cycle on unusable market data");
                } else {
                    debug!(error = %e, "Skipping cycle on unusable market data");
                }
                return;
            }
        };

        let mut breached = Vec::new();
        let sl_interval = Duration::seconds(self.config.loops.sl_update_interval_secs as i64);

        for idx in 0..self.trades.len() {
            let (side, strike) = (self.trades[idx].side, self.trades[idx].strike);
            let Some(row) = find_strike(&chain.chain, strike) else {
                warn!(side = %side, strike, "Open strike missing from chain");
                continue;
            };
            let leg = row.leg(side);
            let ltp = match leg.ltp() {
                Ok(v) if v > 0.0 => v,
                Ok(v) => {
                    warn!(side = %side, strike, ltp = v, "Ignoring non-positive LTP");
                    continue;
                }
                Err(e) => {
                    warn!(side = %side, strike, error = %e, "Ignoring malformed LTP");
                    continue;
                }
            };

            self.trades[idx].mark(ltp);

            if self.trades[idx].is_stop_breached() {
                breached.push((self.trades[idx].id.clone(), ltp));
                continue;
            }

            if self.trades[idx].sl_update_due(now, sl_interval) {
                if let Ok(atp) = leg.atp() {
                    if atp > 0.0 {
                        self.breathe_stop(idx, atp, now).await;
                    }
                }
            }
        }

        for (id, ltp) in breached {
            self.exit_trade(&id, ExitReason::StopLoss, ltp, now).await;
        }

        self.revalidate_timers(&chain);

        let unrealized: f64 = self.trades.iter().map(|t| t.unrealized_pnl).sum();
        if let RiskVerdict::Halt { reason, total_pnl } = self.risk.evaluate(unrealized) {
            error!(reason = %reason, total_pnl, "Kill switch: squaring off");
            self.square_off_all(reason, now).await;
            self.stop("daily risk limit");
        }
    }

    /// Recompute the stop from current ATP; only ever lowers it
    async fn breathe_stop(&mut self, idx: usize, atp: f64, now: DateTime<Utc>) {
        let candidate = round_to_tick(
            atp * (1.0 + self.config.stop_loss.sl_pct),
            self.config.instrument.tick_size,
        );
        let trade = &mut self.trades[idx];
        let Some(old) = trade.tighten_stop(candidate, now) else {
            debug!(strike = trade.strike, sl = trade.sl_price, candidate, "Stop unchanged");
            return;
        };

        info!(
            side = %trade.side,
            strike = trade.strike,
            old_sl = old,
            new_sl = candidate,
            "Breathing stop tightened"
        );

        let Some(order_id) = trade.sl_order_id.clone() else {
            return;
        };
        let symbol = trade.symbol.clone();
        let limit = round_to_tick(
            candidate + self.config.stop_loss.limit_buffer,
            self.config.instrument.tick_size,
        );
        let result = timed(
            "modify_order",
            self.config.execution.order_timeout_ms,
            self.broker.modify_order(&order_id, &symbol, limit, candidate),
        )
        .await;
        if let Err(e) = result {
            error!(order_id = %order_id, error = %e, "Failed to modify protective order");
        }
    }

    fn revalidate_timers(&mut self, chain: &CachedChain) {
        if self.timers.is_empty() {
            return;
        }
        let (min_pct, max_pct) = (self.config.entry.min_buffer_pct, self.config.entry.max_buffer_pct);
        let dropped = self.timers.retain(|side, strike| {
            find_strike(&chain.chain, strike)
                .and_then(|row| leg_prices(row.leg(side)).ok())
                .map(|p| BufferBand::new(p.atp, min_pct, max_pct).contains(p.ltp))
                .unwrap_or(false)
        });
        for (side, strike) in dropped {
            info!(side = %side, strike, "Price left buffer band, dwell timer reset");
        }
    }

    // ---- slow loop ----

    /// Entry scan over the current chain
    pub async fn scan(&mut self, now: DateTime<Utc>) {
        let symbol = self.config.instrument.symbol.clone();
        let chain = match self.cache.fresh(&symbol, now) {
            Ok(chain) => chain,
            Err(e) => {
                debug!(error = %e, "Scan skipped");
                return;
            }
        };

        let valid = chain
            .chain
            .iter()
            .filter(|row| row.call.has_activity() || row.put.has_activity())
            .count();
        if valid < self.config.entry.min_valid_strikes {
            warn!(
                valid,
                required = self.config.entry.min_valid_strikes,
                "Chain quality poor, scan skipped"
            );
            return;
        }

        let (ce, pe) = find_highest_oi(&chain.chain);
        let report = self.tracker.check_stability(ce, pe);
        debug!(
            ce = ?report.ce_strike,
            ce_count = report.ce_count,
            pe = ?report.pe_strike,
            pe_count = report.pe_count,
            "OI leaders"
        );

        for side in Side::ALL {
            if let Some(strike) = report.strike(side) {
                self.evaluate_entry(side, strike, &report, &chain, now).await;
            }
        }
    }

    async fn evaluate_entry(
        &mut self,
        side: Side,
        strike: i64,
        report: &StabilityReport,
        chain: &CachedChain,
        now: DateTime<Utc>,
    ) {
        let open_on_side = self.trades.iter().filter(|t| t.side == side).count();
        if open_on_side >= self.config.entry.max_open_positions {
            debug!(side = %side, strike, open_on_side, "Entry rejected: max positions");
            return;
        }
        if self.trades.iter().any(|t| t.side == side && t.strike == strike) {
            debug!(side = %side, strike, "Entry rejected: strike already held");
            return;
        }
        match self.risk.entry_gate(strike, now) {
            EntryGate::Clear => {}
            gate => {
                info!(side = %side, strike, gate = %gate, "Entry rejected");
                self.timers.clear(side, strike);
                return;
            }
        }
        if !report.is_stable(side) {
            debug!(
                side = %side,
                strike,
                count = report.count(side),
                required = self.tracker.threshold(),
                "Entry rejected: OI leader not yet stable"
            );
            return;
        }

        let Some(row) = find_strike(&chain.chain, strike) else {
            return;
        };
        let leg = row.leg(side);
        let prices = match leg_prices(leg) {
            Ok(p) => p,
            Err(e) => {
                info!(side = %side, strike, error = %e, "Entry rejected: unusable quote");
                self.timers.clear(side, strike);
                return;
            }
        };

        let entry = &self.config.entry;
        let band = BufferBand::new(prices.atp, entry.min_buffer_pct, entry.max_buffer_pct);
        let dwell = Duration::seconds(entry.dwell_secs as i64);
        let in_band = band.contains(prices.ltp);

        match self.timers.observe(side, strike, in_band, now, dwell) {
            DwellCheck::OutOfBand => {
                debug!(
                    side = %side,
                    strike,
                    ltp = prices.ltp,
                    lower = band.lower,
                    upper = band.upper,
                    "Entry rejected: LTP outside buffer band"
                );
            }
            DwellCheck::Started => {
                info!(side = %side, strike, ltp = prices.ltp, atp = prices.atp, "Dwell timer started");
            }
            DwellCheck::Waiting { elapsed } => {
                debug!(
                    side = %side,
                    strike,
                    elapsed_secs = elapsed.num_seconds(),
                    dwell_secs = dwell.num_seconds(),
                    "Waiting for dwell"
                );
            }
            DwellCheck::Ready => {
                let leg = leg.clone();
                self.place_entry(side, strike, &leg, prices, now).await;
            }
        }
    }

    async fn place_entry(
        &mut self,
        side: Side,
        strike: i64,
        leg: &OptionQuote,
        prices: LegPrices,
        now: DateTime<Utc>,
    ) {
        let inst = &self.config.instrument;
        let quantity = inst.order_quantity();
        let symbol = leg
            .symbol
            .clone()
            .unwrap_or_else(|| inst.fallback_symbol(strike, side));
        let timeout_ms = self.config.execution.order_timeout_ms;

        let request = OrderRequest::market(&symbol, OrderSide::Sell, quantity);
        let ack = match timed("place_order", timeout_ms, self.broker.place_order(&request)).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(side = %side, strike, order = %request, error = %e, "Entry order failed, no trade recorded");
                return;
            }
        };

        let stop = round_to_tick(
            prices.atp * (1.0 + self.config.stop_loss.sl_pct),
            self.config.instrument.tick_size,
        );
        let mut trade = Trade::open(
            side,
            strike,
            symbol.clone(),
            prices.ltp,
            quantity,
            prices.atp,
            stop,
            ack.order_id,
            now,
        );

        let limit = round_to_tick(
            stop + self.config.stop_loss.limit_buffer,
            self.config.instrument.tick_size,
        );
        let sl_request = OrderRequest::stop_loss(&symbol, OrderSide::Buy, quantity, stop, limit);
        match timed("place_order", timeout_ms, self.broker.place_order(&sl_request)).await {
            Ok(sl_ack) => trade.sl_order_id = Some(sl_ack.order_id),
            Err(e) => {
                error!(side = %side, strike, order = %sl_request, error = %e, "Protective stop order failed; trade is unprotected at the broker");
            }
        }

        info!(
            trade_id = %trade.id,
            side = %side,
            strike,
            symbol = %symbol,
            entry = prices.ltp,
            atp = prices.atp,
            sl = stop,
            qty = quantity,
            "Entered short"
        );
        self.trades.push(trade);
        self.write_journal();
    }

    // ---- exits ----

    async fn manual_exit(&mut self, side: Side, strike: i64, now: DateTime<Utc>) {
        let Some(trade) = self.trades.iter().find(|t| t.side == side && t.strike == strike) else {
            info!(side = %side, strike, "Manual exit ignored: no open trade");
            return;
        };
        let id = trade.id.clone();
        let price = self.exit_price(trade);
        self.exit_trade(&id, ExitReason::Manual, price, now).await;
    }

    async fn square_off_all(&mut self, reason: ExitReason, now: DateTime<Utc>) {
        let exits: Vec<(String, f64)> = self
            .trades
            .iter()
            .map(|t| (t.id.clone(), self.exit_price(t)))
            .collect();
        for (id, price) in exits {
            self.exit_trade(&id, reason, price, now).await;
        }
    }

    /// Latest LTP for a trade, even from an aged snapshot, else the last mark
    fn exit_price(&self, trade: &Trade) -> f64 {
        self.cache
            .get(&self.config.instrument.symbol)
            .and_then(|c| {
                find_strike(&c.chain, trade.strike).and_then(|row| row.leg(trade.side).ltp().ok())
            })
            .filter(|ltp| *ltp > 0.0)
            .unwrap_or(trade.ltp)
    }

    async fn exit_trade(&mut self, id: &str, reason: ExitReason, price: f64, now: DateTime<Utc>) {
        let Some(pos) = self.trades.iter().position(|t| t.id == id) else {
            return;
        };
        let mut trade = self.trades.remove(pos);
        let timeout_ms = self.config.execution.order_timeout_ms;

        let mut needs_market_exit = true;
        if let Some(sl_id) = trade.sl_order_id.clone() {
            if reason.is_stop_hit() && self.protective_order_filled(&sl_id).await {
                info!(order_id = %sl_id, "Protective order already filled");
                needs_market_exit = false;
            } else if let Err(e) =
                timed("cancel_order", timeout_ms, self.broker.cancel_order(&sl_id)).await
            {
                warn!(order_id = %sl_id, error = %e, "Failed to cancel protective order");
            }
        }

        if needs_market_exit {
            let request = OrderRequest::market(&trade.symbol, OrderSide::Buy, trade.quantity);
            if let Err(e) = timed("place_order", timeout_ms, self.broker.place_order(&request)).await {
                error!(
                    trade_id = %trade.id,
                    order = %request,
                    error = %e,
                    "Exit order failed; position must be reconciled at the broker"
                );
            }
        }

        trade.close(price, reason, now);
        self.risk.record_realized(trade.realized_pnl);
        self.risk.register_cooldown(trade.strike, now);
        if reason.is_stop_hit() {
            self.risk.record_stop_hit(trade.strike);
        }

        info!(
            trade_id = %trade.id,
            side = %trade.side,
            strike = trade.strike,
            exit = price,
            pnl = trade.realized_pnl,
            reason = %reason,
            "Trade closed"
        );

        let record = ClosedTradeRecord::from_trade(
            &trade,
            self.config.execution.mode,
            &self.config.instrument.symbol,
        );
        if let Err(e) = self.history.save(&record) {
            warn!(error = %e, trade_id = %trade.id, "Failed to persist closed trade");
        }
        self.write_journal();
    }

    /// Best-effort order book check; unknown counts as not filled
    async fn protective_order_filled(&self, order_id: &str) -> bool {
        match timed(
            "order_book",
            self.config.execution.order_timeout_ms,
            self.broker.order_book(),
        )
        .await
        {
            Ok(book) => book
                .iter()
                .any(|o| o.order_id == order_id && o.state == OrderState::Complete),
            Err(e) => {
                warn!(error = %e, "Order book unavailable");
                false
            }
        }
    }

    fn write_journal(&self) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.write(&self.trades) {
                warn!(error = %e, "Failed to write open trade journal");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::persistence::MemoryTradeHistory;
    use crate::types::StrikeQuote;
    use chrono::TimeZone;

    fn engine() -> StrategyEngine {
        let config = AppConfig::default();
        let cache = Arc::new(MarketDataCache::new(5, 12));
        let (engine, _handle) = StrategyEngine::new(
            config,
            cache,
            Arc::new(PaperBroker::new()),
            Arc::new(MemoryTradeHistory::new()),
        );
        engine
    }

    #[tokio::test]
    async fn timed_maps_elapsed_to_network_timeout() {
        let slow = async {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok::<_, EngineError>(())
        };
        let err = timed("place_order", 10, slow).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NetworkTimeout {
                operation: "place_order",
                timeout_ms: 10
            }
        ));
    }

    #[test]
    fn leg_prices_rejects_zero_data() {
        assert!(leg_prices(&OptionQuote::new(90.0, 100.0, 1000.0)).is_ok());
        assert!(leg_prices(&OptionQuote::new(90.0, 0.0, 1000.0)).is_err());
        assert!(leg_prices(&OptionQuote::new(90.0, 100.0, 0.0)).is_err());
        assert!(leg_prices(&OptionQuote::default()).is_err());
    }

    #[tokio::test]
    async fn idle_before_start_and_stopped_after_close() {
        let mut engine = engine();
        // 03:00 UTC = 08:30 IST
        let early = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        engine.tick(early).await;
        assert_eq!(engine.state(), EngineState::Idle);

        // 10:00 UTC = 15:30 IST
        let close = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        engine.tick(close).await;
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.is_stopped());
    }

    #[tokio::test]
    async fn poor_chain_quality_skips_scan() {
        let mut engine = engine();
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 4, 30, 0).unwrap();
        let chain: Vec<StrikeQuote> = (0..3)
            .map(|i| {
                StrikeQuote::new(
                    22000 + i * 50,
                    OptionQuote::new(90.0, 100.0, 1000.0),
                    OptionQuote::new(90.0, 100.0, 1000.0),
                )
            })
            .collect();
        engine.cache.update_at("NIFTY", chain, 22000.0, now);

        engine.scan(now).await;
        engine.scan(now).await;
        assert_eq!(engine.tracker.state(Side::CE).count, 0);
        assert!(engine.timers.is_empty());
    }

    #[tokio::test]
    async fn status_command_replies() {
        let config = AppConfig::default();
        let cache = Arc::new(MarketDataCache::new(5, 12));
        let (mut engine, handle) = StrategyEngine::new(
            config,
            cache,
            Arc::new(PaperBroker::new()),
            Arc::new(MemoryTradeHistory::new()),
        );

        let now = Utc.with_ymd_and_hms(2026, 1, 5, 4, 30, 0).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        engine.handle_command(EngineCommand::Status(tx), now).await;
        let status = rx.await.unwrap();
        assert_eq!(status.state, EngineState::Idle);
        assert!(status.open_trades.is_empty());
        assert!(handle.is_running());
    }
}
