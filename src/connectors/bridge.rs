// src/connectors/bridge.rs
//
// JSON/HTTP client for a trading terminal bridge. Every operation is a
// POST to `{base_url}/api/{operation}` with JSON parameters; the bridge answers
// with `{ "success", "data", "error", "retcode" }`.

use super::{retcode_description, with_retry, RetryPolicy, RETCODE_DONE, RETCODE_PLACED};
use crate::config::BridgeBrokerConfig;
use crate::models::{
    AccountInfo, Bar, Deal, OrderRequest, OrderResult, OrderSide, PendingOrder, PendingOrderRequest,
    Position, SymbolInfo, Tick, Timeframe,
};
use crate::traits::Broker;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retcode: Option<u32>,
}

/// Turns a bridge reply into a result. Trade return codes other than done or
/// placed are errors with their description.
fn unwrap_envelope<T>(operation: &str, envelope: Envelope<T>) -> Result<T, String> {
    if let Some(code) = envelope.retcode {
        if code != RETCODE_DONE && code != RETCODE_PLACED {
            return Err(format!("{} failed: {} - {}", operation, code, retcode_description(code)));
        }
    }
    if !envelope.success {
        return Err(format!(
            "{} failed: {}",
            operation,
            envelope.error.unwrap_or_else(|| "unknown bridge error".to_string())
        ));
    }
    envelope
        .data
        .ok_or_else(|| format!("{} failed: empty response", operation))
}

pub struct BridgeBroker {
    config: BridgeBrokerConfig,
    api_key: Option<String>,
    client: reqwest::Client,
    connected: AtomicBool,
    retry: RetryPolicy,
}

impl BridgeBroker {
    pub fn new(config: BridgeBrokerConfig, api_key: Option<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            config,
            api_key,
            client,
            connected: AtomicBool::new(false),
            retry: RetryPolicy::default(),
        })
    }

    fn url(&self, operation: &str) -> String {
        format!("{}/api/{}", self.config.base_url.trim_end_matches('/'), operation)
    }

    async fn post_once<T: DeserializeOwned>(&self, operation: &str, params: &Value) -> Result<Envelope<T>, String> {
        let mut request = self.client.post(self.url(operation)).json(params);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(format!("Bridge returned {}", status));
        }
        response
            .json::<Envelope<T>>()
            .await
            .map_err(|e| format!("Failed to parse {} response: {}", operation, e))
    }

    /// Read operation: transport failures are retried.
    async fn query<T: DeserializeOwned>(&self, operation: &str, params: Value) -> Result<T, String> {
        let envelope = with_retry(self.retry, operation, || self.post_once::<T>(operation, &params)).await?;
        unwrap_envelope(operation, envelope)
    }

    /// Trade operation: sent once and only when real trading is enabled.
    async fn trade<T: DeserializeOwned>(&self, operation: &str, params: Value) -> Result<T, String> {
        if !self.config.enable_real_trading {
            return Err(format!("{} refused: real trading is disabled", operation));
        }
        let envelope = self.post_once::<T>(operation, &params).await?;
        unwrap_envelope(operation, envelope)
    }
}

#[async_trait]
impl Broker for BridgeBroker {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn connect(&self) -> Result<(), String> {
        let account: AccountInfo = self.query("connect", json!({})).await?;
        self.connected.store(true, Ordering::SeqCst);
        log::info!(
            "[Bridge] Connected to account {} ({:.2} {})",
            account.login,
            account.balance,
            account.currency
        );
        if !self.config.enable_real_trading {
            log::warn!("[Bridge] Real trading disabled; orders will be refused");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), String> {
        let result: Result<Value, String> = self.query("disconnect", json!({})).await;
        self.connected.store(false, Ordering::SeqCst);
        result.map(|_| ())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn account_info(&self) -> Result<AccountInfo, String> {
        self.query("account_info", json!({})).await
    }

    async fn positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, String> {
        self.query("positions", json!({ "symbol": symbol })).await
    }

    async fn position(&self, ticket: u64) -> Result<Option<Position>, String> {
        self.query("position", json!({ "ticket": ticket })).await
    }

    async fn orders(&self, symbol: Option<&str>) -> Result<Vec<PendingOrder>, String> {
        self.query("orders", json!({ "symbol": symbol })).await
    }

    async fn order_history(&self, from: i64, to: i64) -> Result<Vec<PendingOrder>, String> {
        self.query("order_history", json!({ "from": from, "to": to })).await
    }

    async fn trade_history(&self, from: i64, to: i64) -> Result<Vec<Deal>, String> {
        self.query("trade_history", json!({ "from": from, "to": to })).await
    }

    async fn historical_data(&self, symbol: &str, tf: Timeframe, count: usize) -> Result<Vec<Bar>, String> {
        let mut bars: Vec<Bar> = self
            .query(
                "historical_data",
                json!({ "symbol": symbol, "timeframe": tf, "count": count }),
            )
            .await?;
        bars.sort_by_key(|b| b.time);
        Ok(bars)
    }

    async fn last_tick(&self, symbol: &str) -> Result<Tick, String> {
        self.query("last_tick", json!({ "symbol": symbol })).await
    }

    async fn symbols_info(&self) -> Result<Vec<SymbolInfo>, String> {
        self.query("symbols_info", json!({})).await
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, String> {
        self.query("symbol_info", json!({ "symbol": symbol })).await
    }

    async fn open_position(&self, mut request: OrderRequest) -> Result<OrderResult, String> {
        request.magic = self.config.magic;
        request.deviation = self.config.deviation;
        let result: OrderResult = self.trade("open_position", json!(request)).await?;
        log::info!(
            "[Bridge] Opened {} {} {} at {:.5} (ticket {})",
            request.side,
            result.volume,
            request.symbol,
            result.price,
            result.ticket
        );
        Ok(result)
    }

    async fn close_position(&self, ticket: u64, volume: Option<f64>) -> Result<OrderResult, String> {
        self.trade(
            "close_position",
            json!({ "ticket": ticket, "volume": volume, "deviation": self.config.deviation }),
        )
        .await
    }

    async fn modify_position(
        &self,
        ticket: u64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), String> {
        let _: Value = self
            .trade(
                "modify_position",
                json!({ "ticket": ticket, "stop_loss": stop_loss, "take_profit": take_profit }),
            )
            .await?;
        Ok(())
    }

    async fn place_pending_order(&self, request: PendingOrderRequest) -> Result<OrderResult, String> {
        self.trade(
            "place_pending_order",
            json!({ "request": request, "magic": self.config.magic }),
        )
        .await
    }

    async fn cancel_order(&self, ticket: u64) -> Result<(), String> {
        let _: Value = self.trade("cancel_order", json!({ "ticket": ticket })).await?;
        Ok(())
    }

    async fn calculate_margin(&self, symbol: &str, side: OrderSide, volume: f64) -> Result<f64, String> {
        self.query(
            "calculate_margin",
            json!({ "symbol": symbol, "side": side, "volume": volume }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(enable_real_trading: bool) -> BridgeBroker {
        BridgeBroker::new(
            BridgeBrokerConfig {
                base_url: "http://127.0.0.1:9/".to_string(),
                timeout_secs: 1,
                enable_real_trading,
                magic: 234000,
                deviation: 10,
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_url_joins_operation() {
        assert_eq!(broker(false).url("account_info"), "http://127.0.0.1:9/api/account_info");
    }

    #[test]
    fn test_envelope_retcode_mapping() {
        let ok: Envelope<OrderResult> = serde_json::from_str(
            r#"{"success":true,"retcode":10009,"data":{"ticket":5,"price":1.1,"volume":0.1,"retcode":10009,"comment":""}}"#,
        )
        .unwrap();
        assert_eq!(unwrap_envelope("open_position", ok).unwrap().ticket, 5);

        let no_money: Envelope<OrderResult> =
            serde_json::from_str(r#"{"success":false,"retcode":10019,"data":null}"#).unwrap();
        let err = unwrap_envelope("open_position", no_money).unwrap_err();
        assert!(err.contains("10019"));
        assert!(err.contains("not enough money"));

        let failed: Envelope<Value> =
            serde_json::from_str(r#"{"success":false,"error":"symbol not found","data":null}"#).unwrap();
        assert_eq!(
            unwrap_envelope("symbol_info", failed).unwrap_err(),
            "symbol_info failed: symbol not found"
        );
    }

    #[tokio::test]
    async fn test_orders_refused_without_real_trading() {
        let b = broker(false);
        let err = b
            .open_position(OrderRequest::market("EURUSD", OrderSide::Buy, 0.1))
            .await
            .unwrap_err();
        assert!(err.contains("real trading is disabled"));
        assert!(b.cancel_order(1).await.is_err());
        assert!(!b.is_connected().await);
    }
}
