// src/trading/desk.rs
//
// Routes generated signals: confirmation requests with a deadline, direct
// execution in auto mode, and the bookkeeping after a fill or a close.

use super::risk_manager::{RiskManager, RiskParams};
use super::signal_generator::SignalGenerator;
use crate::config::TradingConfig;
use crate::dashboard::ActivityLog;
use crate::models::{Deal, OrderRequest, OrderResult, Signal, SignalStatus};
use crate::settings::SettingsManager;
use crate::store::{Store, TradeRecord, TradeStatus};
use crate::traits::{Dashboard, DashboardSchema, SharedBroker, SharedNotifier, TableColumn, Widget};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Thresholds offered to the operator for auto trading.
pub const THRESHOLD_CHOICES: [f64; 3] = [60.0, 70.0, 80.0];

#[derive(Debug, Clone, Serialize)]
pub struct PendingConfirmation {
    pub signal: Signal,
    pub risk: RiskParams,
    /// Unix seconds.
    pub deadline: i64,
}

/// What happened to a routed signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    AwaitingConfirmation,
    Executed(OrderResult),
    Informational,
}

struct DeskState {
    settings: TradingConfig,
    persisted: Option<Arc<SettingsManager>>,
    pending: BTreeMap<String, PendingConfirmation>,
    log: ActivityLog,
    executed_count: u64,
}

pub struct TradingDesk {
    broker: SharedBroker,
    signals: Arc<Mutex<SignalGenerator>>,
    risk: Arc<RiskManager>,
    store: Option<Arc<Store>>,
    notifier: SharedNotifier,
    /// Executes qualifying signals without asking (backtests).
    auto_mode: bool,
    state: Mutex<DeskState>,
}

impl TradingDesk {
    pub fn new(
        broker: SharedBroker,
        signals: Arc<Mutex<SignalGenerator>>,
        risk: Arc<RiskManager>,
        store: Option<Arc<Store>>,
        notifier: SharedNotifier,
        settings: TradingConfig,
        auto_mode: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            signals,
            risk,
            store,
            notifier,
            auto_mode,
            state: Mutex::new(DeskState {
                settings,
                persisted: None,
                pending: BTreeMap::new(),
                log: ActivityLog::new(),
                executed_count: 0,
            }),
        })
    }

    /// Adopts the saved runtime settings; later operator changes are saved
    /// back through `manager`.
    pub async fn attach_settings(&self, manager: Arc<SettingsManager>) {
        let saved = manager.trading().await;
        let mut state = self.state.lock().await;
        log::info!(
            "[Desk] Runtime settings: auto trading {}, threshold {}",
            if saved.auto_trade_enabled { "on" } else { "off" },
            saved.auto_trade_threshold
        );
        state.settings = saved;
        state.persisted = Some(manager);
    }

    pub async fn settings(&self) -> TradingConfig {
        self.state.lock().await.settings.clone()
    }

    pub async fn pending(&self) -> Vec<PendingConfirmation> {
        self.state.lock().await.pending.values().cloned().collect()
    }

    pub fn risk_manager(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn signal_generator(&self) -> &Arc<Mutex<SignalGenerator>> {
        &self.signals
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Sends a new signal down the right path. Signals at or above the auto-trade
    /// threshold (with auto trading on) are confirmed or executed; the rest are
    /// reported only.
    pub async fn route(&self, signal: Signal, risk: RiskParams, now: i64) -> Result<Routing, String> {
        let settings = self.settings().await;
        let qualifies = self.auto_mode
            || (settings.auto_trade_enabled && signal.success_probability >= settings.auto_trade_threshold);
        if !qualifies {
            self.notifier.send_signal_info(&signal).await?;
            return Ok(Routing::Informational);
        }
        if self.auto_mode || !settings.confirmation_required {
            let result = self.execute(&signal, now).await?;
            return Ok(Routing::Executed(result));
        }
        self.submit(signal, risk, now).await?;
        Ok(Routing::AwaitingConfirmation)
    }

    /// Registers a signal for confirmation and asks the operator.
    pub async fn submit(&self, signal: Signal, risk: RiskParams, now: i64) -> Result<(), String> {
        let timeout = self.settings().await.confirmation_timeout_secs;
        self.notifier.send_signal_confirmation(&signal, &risk, timeout).await?;
        let mut state = self.state.lock().await;
        state.log.push(
            now,
            format!(
                "Awaiting confirmation: {} {} ({:.1}%)",
                signal.symbol, signal.direction, signal.success_probability
            ),
            "info",
        );
        state.pending.insert(
            signal.id.clone(),
            PendingConfirmation {
                signal,
                risk,
                deadline: now + timeout as i64,
            },
        );
        Ok(())
    }

    /// Opens the position for a pending signal. The confirmation is claimed
    /// before the order is sent, so `expire_due` cannot expire it mid-flight.
    pub async fn confirm(&self, signal_id: &str, now: i64) -> Result<OrderResult, String> {
        let claimed = self.state.lock().await.pending.remove(signal_id);
        let Some(pending) = claimed else {
            let status = self.signals.lock().await.get_signal(signal_id).map(|s| s.status);
            return Err(match status {
                Some(SignalStatus::Pending) => format!("Signal {} is not awaiting confirmation", signal_id),
                Some(status) => format!("Signal {} is already {}", signal_id, status),
                None => format!("Signal {} not found", signal_id),
            });
        };
        if pending.deadline <= now {
            self.expire(signal_id, now).await;
            return Err(format!("Signal {} is already {}", signal_id, SignalStatus::Expired));
        }
        let result = self.execute(&pending.signal, now).await;
        if result.is_err() {
            // Nothing was opened; leave it to a retry or to expiry.
            self.state.lock().await.pending.insert(signal_id.to_string(), pending);
        }
        result
    }

    pub async fn reject(&self, signal_id: &str, now: i64) -> Result<Signal, String> {
        let signal = self
            .signals
            .lock()
            .await
            .update_signal_status(signal_id, SignalStatus::Rejected, None, now)?;
        self.persist_signal(&signal).await;
        let mut state = self.state.lock().await;
        state.pending.remove(signal_id);
        state
            .log
            .push(now, format!("Rejected {} {}", signal.symbol, signal.direction), "warning");
        Ok(signal)
    }

    /// Expires confirmations whose deadline has passed.
    pub async fn expire_due(&self, now: i64) -> Vec<Signal> {
        let due: Vec<PendingConfirmation> = {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state
                .pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| state.pending.remove(id)).collect()
        };

        let mut expired = Vec::new();
        for pending in due {
            if let Some(signal) = self.expire(&pending.signal.id, now).await {
                expired.push(signal);
            }
        }
        expired
    }

    async fn expire(&self, signal_id: &str, now: i64) -> Option<Signal> {
        let updated = self
            .signals
            .lock()
            .await
            .update_signal_status(signal_id, SignalStatus::Expired, None, now);
        let signal = match updated {
            Ok(signal) => signal,
            Err(e) => {
                log::debug!("[Desk] {}", e);
                return None;
            }
        };
        self.persist_signal(&signal).await;
        if let Err(e) = self.notifier.send_expiry(&signal).await {
            log::warn!("[Desk] Expiry notice failed: {}", e);
        }
        self.state
            .lock()
            .await
            .log
            .push(now, format!("Expired {} {}", signal.symbol, signal.direction), "warning");
        Some(signal)
    }

    async fn execute(&self, signal: &Signal, now: i64) -> Result<OrderResult, String> {
        let side = signal
            .direction
            .as_side()
            .ok_or_else(|| format!("Signal {} has no direction", signal.id))?;
        let params = match self.risk.can_open_position(signal, now).await {
            Ok(params) => params,
            Err(reason) => {
                self.state
                    .lock()
                    .await
                    .log
                    .push(now, format!("Cannot open {}: {}", signal.symbol, reason), "error");
                return Err(format!("Cannot open position: {}", reason));
            }
        };

        let request = OrderRequest::market(&signal.symbol, side, params.lot_size)
            .with_stops(Some(signal.stop_loss), Some(signal.take_profit))
            .with_comment(format!("signal {}", &signal.id[..signal.id.len().min(8)]));
        let result = self.broker.open_position(request).await?;

        // The position exists from here on: book it even if the status update fails.
        let status = self.signals.lock().await.update_signal_status(
            &signal.id,
            SignalStatus::Executed,
            Some(result.clone()),
            now,
        );
        let updated = status.unwrap_or_else(|e| {
            log::warn!("[Desk] Ticket {} opened but signal not updated: {}", result.ticket, e);
            let mut executed = signal.clone();
            executed.status = SignalStatus::Executed;
            executed.execution = Some(result.clone());
            executed.status_updated_at = Some(now);
            executed
        });
        if let Err(e) = self.risk.update_risk_history(signal, &params, now).await {
            log::warn!("[Desk] Failed to record risk: {}", e);
        }
        self.persist_signal(&updated).await;
        if let Some(store) = &self.store {
            let trade = TradeRecord::opened(
                result.ticket,
                Some(signal.id.clone()),
                &signal.symbol,
                side,
                result.volume,
                result.price,
                Some(signal.stop_loss),
                Some(signal.take_profit),
                now,
            );
            if let Err(e) = store.add_trade(trade).await {
                log::warn!("[Desk] Failed to store trade: {}", e);
            }
        }
        if let Err(e) = self.notifier.send_trade_notification(&updated, &result).await {
            log::warn!("[Desk] Trade notification failed: {}", e);
        }

        let mut state = self.state.lock().await;
        state.executed_count += 1;
        state.log.push(
            now,
            format!(
                "Opened {} {} {:.2} lots at {:.5} (ticket {})",
                signal.symbol, side, result.volume, result.price, result.ticket
            ),
            "success",
        );
        log::info!(
            "[Desk] Opened {} {} {:.2} at {:.5} (ticket {})",
            signal.symbol,
            side,
            result.volume,
            result.price,
            result.ticket
        );
        Ok(result)
    }

    // =========================================================================
    // Positions
    // =========================================================================

    pub async fn close_position(&self, ticket: u64, now: i64) -> Result<OrderResult, String> {
        let result = self.broker.close_position(ticket, None).await?;
        // Deals carry broker time, which a replaying paper broker keeps in the past.
        let server_now = self.broker.server_time().await.unwrap_or(now);
        let deals = self
            .broker
            .trade_history(server_now - 86_400 * 365, server_now + 1)
            .await
            .unwrap_or_default();
        let closing: Vec<Deal> = deals.into_iter().filter(|d| d.ticket == result.ticket).collect();
        self.record_closed_deals(&closing, now).await;
        self.state
            .lock()
            .await
            .log
            .push(now, format!("Closed ticket {} at {:.5}", ticket, result.price), "info");
        Ok(result)
    }

    /// Books deals closed by the broker (stops, targets or manual closes) into the
    /// store. A signal completes once its position is fully closed.
    pub async fn record_closed_deals(&self, deals: &[Deal], now: i64) {
        for deal in deals {
            let fully_closed = match &self.store {
                Some(store) => match store.close_trade_from_deal(deal).await {
                    Ok(Some(status)) => status == TradeStatus::Closed,
                    Ok(None) => {
                        log::debug!("[Desk] No open trade for ticket {}", deal.position_ticket);
                        self.position_gone(deal.position_ticket).await
                    }
                    Err(e) => {
                        log::warn!("[Desk] Failed to close trade: {}", e);
                        self.position_gone(deal.position_ticket).await
                    }
                },
                None => self.position_gone(deal.position_ticket).await,
            };
            if fully_closed {
                self.complete_signal_for(deal.position_ticket, now).await;
            }
            let kind = if deal.profit >= 0.0 { "success" } else { "error" };
            let what = if fully_closed { "closed" } else { "partly closed" };
            self.state.lock().await.log.push(
                now,
                format!(
                    "{} ticket {} {} at {:.5}: {:+.2}",
                    deal.symbol, deal.position_ticket, what, deal.close_price, deal.profit
                ),
                kind,
            );
        }
    }

    async fn position_gone(&self, ticket: u64) -> bool {
        self.broker.position(ticket).await.map_or(true, |p| p.is_none())
    }

    async fn complete_signal_for(&self, ticket: u64, now: i64) {
        let mut generator = self.signals.lock().await;
        let signal_id = generator
            .get_signal_history(usize::MAX)
            .into_iter()
            .find(|s| s.execution.as_ref().is_some_and(|e| e.ticket == ticket))
            .map(|s| s.id);
        let Some(id) = signal_id else {
            return;
        };
        let completed = generator.update_signal_status(&id, SignalStatus::Completed, None, now);
        drop(generator);
        if let Ok(signal) = completed {
            self.persist_signal(&signal).await;
        }
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Flips auto trading and returns the new state.
    pub async fn toggle_auto_trade(&self) -> bool {
        let mut state = self.state.lock().await;
        state.settings.auto_trade_enabled = !state.settings.auto_trade_enabled;
        let enabled = state.settings.auto_trade_enabled;
        let saved = (state.persisted.clone(), state.settings.clone());
        drop(state);
        log::info!("[Desk] Auto trading {}", if enabled { "enabled" } else { "disabled" });
        self.save_settings(saved).await;
        enabled
    }

    pub async fn set_threshold(&self, threshold: f64) -> Result<(), String> {
        if !THRESHOLD_CHOICES.contains(&threshold) {
            return Err(format!("Threshold must be one of 60, 70 or 80, got {}", threshold));
        }
        let mut state = self.state.lock().await;
        state.settings.auto_trade_threshold = threshold;
        let saved = (state.persisted.clone(), state.settings.clone());
        drop(state);
        log::info!("[Desk] Auto-trade threshold set to {}", threshold);
        self.save_settings(saved).await;
        Ok(())
    }

    async fn save_settings(&self, (manager, settings): (Option<Arc<SettingsManager>>, TradingConfig)) {
        if let Some(manager) = manager {
            if let Err(e) = manager.set_trading(settings).await {
                log::warn!("[Desk] Failed to save settings: {}", e);
            }
        }
    }

    async fn persist_signal(&self, signal: &Signal) {
        if let Some(store) = &self.store {
            if let Err(e) = store.update_signal(signal).await {
                log::warn!("[Desk] Failed to update stored signal: {}", e);
            }
        }
    }
}

// =============================================================================
// Dashboard Implementation
// =============================================================================

#[async_trait]
impl Dashboard for TradingDesk {
    fn dashboard_name(&self) -> &str {
        "desk"
    }

    async fn dashboard_state(&self) -> Value {
        let now = self
            .broker
            .server_time()
            .await
            .unwrap_or_else(|_| chrono::Utc::now().timestamp());
        let risk = self.risk.get_risk_summary(now).await;
        let state = self.state.lock().await;
        let pending: Vec<Value> = state
            .pending
            .values()
            .map(|p| {
                json!({
                    "id": p.signal.id,
                    "symbol": p.signal.symbol,
                    "direction": p.signal.direction,
                    "probability": p.signal.success_probability,
                    "lot_size": p.risk.lot_size,
                    "deadline": p.deadline,
                })
            })
            .collect();
        json!({
            "auto_trade_enabled": state.settings.auto_trade_enabled,
            "auto_trade_threshold": state.settings.auto_trade_threshold,
            "confirmation_required": state.settings.confirmation_required,
            "executed_count": state.executed_count,
            "daily_risk": risk.daily_risk,
            "weekly_risk": risk.weekly_risk,
            "pending": pending,
            "log": state.log.entries(),
        })
    }

    fn dashboard_schema(&self) -> DashboardSchema {
        DashboardSchema {
            widgets: vec![
                Widget::KeyValue {
                    label: "Auto Trading".to_string(),
                    key: "auto_trade_enabled".to_string(),
                    format: None,
                },
                Widget::KeyValue {
                    label: "Threshold".to_string(),
                    key: "auto_trade_threshold".to_string(),
                    format: Some("{:.0}%".to_string()),
                },
                Widget::KeyValue {
                    label: "Executed".to_string(),
                    key: "executed_count".to_string(),
                    format: None,
                },
                Widget::KeyValue {
                    label: "Daily Risk".to_string(),
                    key: "daily_risk".to_string(),
                    format: Some("{:.2}%".to_string()),
                },
                Widget::KeyValue {
                    label: "Weekly Risk".to_string(),
                    key: "weekly_risk".to_string(),
                    format: Some("{:.2}%".to_string()),
                },
                Widget::Table {
                    title: "Awaiting Confirmation".to_string(),
                    columns: vec![
                        TableColumn::new("Symbol", "symbol"),
                        TableColumn::new("Side", "direction"),
                        TableColumn::new("Probability", "probability"),
                        TableColumn::new("Lots", "lot_size"),
                    ],
                    data_key: "pending".to_string(),
                },
                Widget::Divider,
                Widget::Log {
                    title: "Desk Log".to_string(),
                    data_key: "log".to_string(),
                    max_lines: 50,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PaperBrokerConfig, RiskConfig, SignalConfig};
    use crate::connectors::PaperBroker;
    use crate::models::{Bar, Direction, Timeframe};
    use crate::notifier::LogNotifier;
    use crate::settings::SettingsManager;
    use crate::store::TradeFilter;
    use crate::traits::Broker;
    use chrono::Utc;
    use crate::trading::signal_generator::tests::summary_analysis;

    const T0: i64 = 1_704_067_200;

    struct Fixture {
        broker: Arc<PaperBroker>,
        desk: Arc<TradingDesk>,
        signal: Signal,
    }

    async fn fixture(settings: TradingConfig, auto_mode: bool) -> Fixture {
        fixture_with(settings, auto_mode, None).await
    }

    async fn fixture_with(settings: TradingConfig, auto_mode: bool, store: Option<Arc<Store>>) -> Fixture {
        let broker = Arc::new(PaperBroker::new(PaperBrokerConfig::default()));
        let bars: Vec<Bar> = (0..10)
            .map(|i| Bar::new(T0 - 3600 * (10 - i), 1.1, 1.1005, 1.0995, 1.1))
            .collect();
        broker.load_bars("EURUSD", Timeframe::H1, bars).await;
        broker.set_clock(T0).await;

        let mut generator = SignalGenerator::new(SignalConfig::default());
        let signal = generator
            .generate_signal(&summary_analysis("EURUSD", Direction::Buy, 90.0, 90.0), None, None, T0)
            .unwrap();
        let signals = Arc::new(Mutex::new(generator));
        let risk = Arc::new(RiskManager::new(broker.clone(), RiskConfig::default(), 1.5));
        let desk = TradingDesk::new(
            broker.clone(),
            signals,
            risk,
            store,
            Arc::new(LogNotifier),
            settings,
            auto_mode,
        );
        Fixture { broker, desk, signal }
    }

    fn temp_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "test_{}_{}",
            name,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    fn closing_deal(ticket: u64, volume: f64, close_time: i64) -> Deal {
        Deal {
            ticket: ticket + 1000,
            position_ticket: ticket,
            symbol: "EURUSD".to_string(),
            side: crate::models::OrderSide::Buy,
            volume,
            open_price: 1.1,
            close_price: 1.101,
            profit: 5.0,
            open_time: T0,
            close_time,
            comment: "close".to_string(),
        }
    }

    async fn status_of(desk: &TradingDesk, id: &str) -> SignalStatus {
        desk.signal_generator().lock().await.get_signal(id).unwrap().status
    }

    fn confirming() -> TradingConfig {
        TradingConfig {
            auto_trade_enabled: true,
            auto_trade_threshold: 60.0,
            ..TradingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_below_threshold_is_informational() {
        let f = fixture(TradingConfig::default(), false).await;
        let routing = f.desk.route(f.signal.clone(), RiskParams::default(), T0).await.unwrap();
        assert_eq!(routing, Routing::Informational);
        assert!(f.desk.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_opens_position() {
        let f = fixture(confirming(), false).await;
        let routing = f.desk.route(f.signal.clone(), RiskParams::default(), T0).await.unwrap();
        assert_eq!(routing, Routing::AwaitingConfirmation);
        assert_eq!(f.desk.pending().await.len(), 1);

        let result = f.desk.confirm(&f.signal.id, T0 + 10).await.unwrap();
        assert!(f.desk.pending().await.is_empty());
        let positions = f.broker.positions(Some("EURUSD")).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].ticket, result.ticket);
        assert_eq!(positions[0].stop_loss, Some(f.signal.stop_loss));

        let generator = f.desk.signal_generator().lock().await;
        assert_eq!(generator.get_signal(&f.signal.id).unwrap().status, SignalStatus::Executed);
        drop(generator);
        assert!(f.desk.confirm(&f.signal.id, T0 + 20).await.is_err());
    }

    #[tokio::test]
    async fn test_expiry_and_reject() {
        let f = fixture(confirming(), false).await;
        f.desk.route(f.signal.clone(), RiskParams::default(), T0).await.unwrap();
        assert!(f.desk.expire_due(T0 + 299).await.is_empty());
        let expired = f.desk.expire_due(T0 + 300).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, SignalStatus::Expired);
        assert!(f.desk.reject(&f.signal.id, T0 + 301).await.is_err());
    }

    #[tokio::test]
    async fn test_auto_mode_executes_and_settings() {
        let f = fixture(TradingConfig::default(), true).await;
        let routing = f.desk.route(f.signal.clone(), RiskParams::default(), T0).await.unwrap();
        assert!(matches!(routing, Routing::Executed(_)));

        assert!(f.desk.toggle_auto_trade().await);
        assert!(f.desk.set_threshold(80.0).await.is_ok());
        assert!(f.desk.set_threshold(75.0).await.is_err());
        assert_eq!(f.desk.settings().await.auto_trade_threshold, 80.0);

        let state = f.desk.dashboard_state().await;
        assert_eq!(state["executed_count"], 1);
    }

    #[tokio::test]
    async fn test_confirm_after_deadline_expires() {
        let f = fixture(confirming(), false).await;
        f.desk.route(f.signal.clone(), RiskParams::default(), T0).await.unwrap();

        let err = f.desk.confirm(&f.signal.id, T0 + 300).await.unwrap_err();
        assert!(err.contains("expired"));
        assert_eq!(status_of(&f.desk, &f.signal.id).await, SignalStatus::Expired);
        assert!(f.desk.pending().await.is_empty());
        assert!(f.broker.positions(None).await.unwrap().is_empty());
        assert!(f.desk.expire_due(T0 + 301).await.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_in_flight_is_not_expired() {
        let f = fixture(confirming(), false).await;
        f.desk.route(f.signal.clone(), RiskParams::default(), T0).await.unwrap();

        // Hold the generator so the confirmation stalls after the order is sent.
        let guard = f.desk.signal_generator().lock().await;
        let desk = f.desk.clone();
        let id = f.signal.id.clone();
        let handle = tokio::spawn(async move { desk.confirm(&id, T0 + 299).await });
        while !f.desk.pending().await.is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(f.desk.expire_due(T0 + 300).await.is_empty());
        drop(guard);

        let result = handle.await.unwrap().unwrap();
        assert_eq!(status_of(&f.desk, &f.signal.id).await, SignalStatus::Executed);
        let positions = f.broker.positions(None).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].ticket, result.ticket);
        let summary = f.desk.risk_manager().get_risk_summary(T0 + 300).await;
        assert!(summary.daily_risk > 0.0);
    }

    #[tokio::test]
    async fn test_failed_confirm_stays_pending() {
        let f = fixture(confirming(), false).await;
        f.desk.route(f.signal.clone(), RiskParams::default(), T0).await.unwrap();
        for _ in 0..RiskConfig::default().max_positions_per_symbol {
            f.broker
                .open_position(OrderRequest::market("EURUSD", crate::models::OrderSide::Buy, 0.01))
                .await
                .unwrap();
        }
        let err = f.desk.confirm(&f.signal.id, T0 + 10).await.unwrap_err();
        assert!(err.contains("Maximum positions"));
        assert_eq!(f.desk.pending().await.len(), 1);
        assert_eq!(f.desk.expire_due(T0 + 300).await.len(), 1);
    }

    #[tokio::test]
    async fn test_close_books_deal_on_replay_clock() {
        let dir = temp_dir("desk_paper_close");
        let store = Arc::new(Store::open(&dir).unwrap());
        let f = fixture_with(TradingConfig::default(), true, Some(store.clone())).await;
        let Routing::Executed(opened) = f.desk.route(f.signal.clone(), RiskParams::default(), T0).await.unwrap() else {
            panic!("auto mode should execute");
        };

        // The operator acts on wall-clock time while the paper clock sits at T0.
        f.desk.close_position(opened.ticket, Utc::now().timestamp()).await.unwrap();

        let trades = store.get_trades(&TradeFilter::default(), 10).await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, TradeStatus::Closed);
        assert_eq!(trades[0].close_time, Some(T0));
        assert_eq!(status_of(&f.desk, &f.signal.id).await, SignalStatus::Completed);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_partial_close_keeps_signal_executed() {
        let dir = temp_dir("desk_partial");
        let store = Arc::new(Store::open(&dir).unwrap());
        let f = fixture_with(TradingConfig::default(), true, Some(store.clone())).await;
        let Routing::Executed(opened) = f.desk.route(f.signal.clone(), RiskParams::default(), T0).await.unwrap() else {
            panic!("auto mode should execute");
        };
        let half = opened.volume / 2.0;

        f.desk.record_closed_deals(&[closing_deal(opened.ticket, half, T0 + 60)], T0 + 60).await;
        assert_eq!(status_of(&f.desk, &f.signal.id).await, SignalStatus::Executed);
        let trades = store.get_trades(&TradeFilter::default(), 10).await;
        assert_eq!(trades[0].status, TradeStatus::Open);

        f.desk.record_closed_deals(&[closing_deal(opened.ticket, half, T0 + 120)], T0 + 120).await;
        assert_eq!(status_of(&f.desk, &f.signal.id).await, SignalStatus::Completed);
        let trades = store.get_trades(&TradeFilter::default(), 10).await;
        assert_eq!(trades[0].status, TradeStatus::Closed);
        assert_eq!(trades[0].profit_loss, Some(10.0));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_partial_close_without_store_checks_broker() {
        let f = fixture(TradingConfig::default(), true).await;
        let Routing::Executed(opened) = f.desk.route(f.signal.clone(), RiskParams::default(), T0).await.unwrap() else {
            panic!("auto mode should execute");
        };
        // The position is still open at the broker.
        f.desk.record_closed_deals(&[closing_deal(opened.ticket, 0.01, T0 + 60)], T0 + 60).await;
        assert_eq!(status_of(&f.desk, &f.signal.id).await, SignalStatus::Executed);

        f.broker.close_position(opened.ticket, None).await.unwrap();
        f.desk.record_closed_deals(&[closing_deal(opened.ticket, opened.volume, T0 + 120)], T0 + 120).await;
        assert_eq!(status_of(&f.desk, &f.signal.id).await, SignalStatus::Completed);
    }

    #[tokio::test]
    async fn test_operator_settings_survive_restart() {
        let dir = temp_dir("desk_settings");
        let manager = Arc::new(SettingsManager::open(&dir, TradingConfig::default()).unwrap());
        let f = fixture(TradingConfig::default(), false).await;
        f.desk.attach_settings(manager).await;
        assert!(f.desk.toggle_auto_trade().await);
        f.desk.set_threshold(60.0).await.unwrap();

        let reopened = Arc::new(SettingsManager::open(&dir, TradingConfig::default()).unwrap());
        let restarted = fixture(TradingConfig::default(), false).await;
        restarted.desk.attach_settings(reopened).await;
        let settings = restarted.desk.settings().await;
        assert!(settings.auto_trade_enabled);
        assert_eq!(settings.auto_trade_threshold, 60.0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
