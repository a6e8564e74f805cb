// src/traits.rs

use crate::models::{
    AccountInfo, Bar, Deal, OrderRequest, OrderResult, OrderSide, PendingOrder, PendingOrderRequest,
    Position, Signal, SymbolInfo, Tick, Timeframe,
};
use crate::trading::RiskParams;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// Broker
// =============================================================================

/// Account, market data and order routing of one trading terminal.
/// Implementations are shared across the engine, desk and command handlers.
#[async_trait]
pub trait Broker: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), String>;
    async fn disconnect(&self) -> Result<(), String>;
    async fn is_connected(&self) -> bool;
    /// Current time on the broker side, unix seconds. Simulated brokers report
    /// their replay clock.
    async fn server_time(&self) -> Result<i64, String> {
        Ok(chrono::Utc::now().timestamp())
    }

    async fn account_info(&self) -> Result<AccountInfo, String>;
    /// Open positions, optionally for one symbol.
    async fn positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, String>;
    async fn position(&self, ticket: u64) -> Result<Option<Position>, String>;
    /// Resting orders, optionally for one symbol.
    async fn orders(&self, symbol: Option<&str>) -> Result<Vec<PendingOrder>, String>;
    /// Orders that left the book (filled, cancelled or expired) between two unix times.
    async fn order_history(&self, from: i64, to: i64) -> Result<Vec<PendingOrder>, String>;
    /// Closed deals between two unix times.
    async fn trade_history(&self, from: i64, to: i64) -> Result<Vec<Deal>, String>;

    /// The last `count` bars, oldest first.
    async fn historical_data(&self, symbol: &str, tf: Timeframe, count: usize) -> Result<Vec<Bar>, String>;
    async fn last_tick(&self, symbol: &str) -> Result<Tick, String>;
    async fn symbols_info(&self) -> Result<Vec<SymbolInfo>, String>;
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, String>;

    async fn open_position(&self, request: OrderRequest) -> Result<OrderResult, String>;
    /// Closes `volume` lots of a position, or all of it when None.
    async fn close_position(&self, ticket: u64, volume: Option<f64>) -> Result<OrderResult, String>;
    async fn modify_position(
        &self,
        ticket: u64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), String>;
    async fn place_pending_order(&self, request: PendingOrderRequest) -> Result<OrderResult, String>;
    async fn cancel_order(&self, ticket: u64) -> Result<(), String>;
    /// Margin in account currency required to open `volume` lots.
    async fn calculate_margin(&self, symbol: &str, side: OrderSide, volume: f64) -> Result<f64, String>;
}

pub type SharedBroker = Arc<dyn Broker>;

// =============================================================================
// Notifier
// =============================================================================

/// Outbound messages to the operator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), String>;

    /// Asks the operator to confirm or reject a signal within `timeout_secs`.
    async fn send_signal_confirmation(
        &self,
        signal: &Signal,
        risk: &RiskParams,
        timeout_secs: u64,
    ) -> Result<(), String>;

    /// Reports a signal that is not routed to confirmation.
    async fn send_signal_info(&self, signal: &Signal) -> Result<(), String>;

    async fn send_trade_notification(&self, signal: &Signal, result: &OrderResult) -> Result<(), String>;

    async fn send_expiry(&self, signal: &Signal) -> Result<(), String>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

// =============================================================================
// Dashboard
// =============================================================================

/// A component that exposes a panel on the web dashboard.
#[async_trait]
pub trait Dashboard: Send + Sync {
    fn dashboard_name(&self) -> &str;

    /// Current panel state as JSON; keys are referenced by the schema.
    async fn dashboard_state(&self) -> Value;

    fn dashboard_schema(&self) -> DashboardSchema;
}

/// Layout of a dashboard panel.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSchema {
    pub widgets: Vec<Widget>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Widget {
    KeyValue {
        label: String,
        key: String,
        format: Option<String>,
    },
    Chart {
        title: String,
        data_key: String,
        chart_type: String,
    },
    Table {
        title: String,
        columns: Vec<TableColumn>,
        data_key: String,
    },
    Log {
        title: String,
        data_key: String,
        max_lines: usize,
    },
    Divider,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableColumn {
    pub header: String,
    pub key: String,
    pub format: Option<String>,
}

impl TableColumn {
    pub fn new(header: &str, key: &str) -> Self {
        Self {
            header: header.to_string(),
            key: key.to_string(),
            format: None,
        }
    }
}
