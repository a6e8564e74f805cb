// src/engine/mod.rs
//
// The scan loop: refresh market data, analyze every symbol, forecast, turn the
// result into a signal and hand it to the desk. The same scan drives live
// trading (wall clock) and backtests (the paper broker's clock).

pub mod chart;

use crate::analysis::engine::{AnalysisEngine, SymbolAnalysis};
use crate::analysis::news::{CalendarEvent, NewsAnalysis, NewsAnalyzer};
use crate::config::{local_time, GeneralConfig};
use crate::connectors::PaperBroker;
use crate::dashboard::ActivityLog;
use crate::data::DataManager;
use crate::models::{Bar, Direction, Signal, Timeframe};
use crate::prediction::{ModelMetrics, Prediction, Predictor};
use crate::store::{ModelPerformanceRecord, Store};
use chart::{build_chart, step_timeframe, ChartData};
use crate::traits::{Dashboard, DashboardSchema, SharedBroker, TableColumn, Widget};
use crate::trading::{Routing, TradingDesk};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Hours of calendar events on each side of the scan time fed to news analysis.
const NEWS_WINDOW_HOURS: i64 = 24;
/// Bars of the stepping timeframe skipped before a backtest starts scanning.
pub const BACKTEST_WARMUP_BARS: usize = 50;
const RECENT_SIGNALS_SHOWN: usize = 20;

/// Outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub timestamp: i64,
    pub symbols_analyzed: usize,
    pub signals: Vec<String>,
    pub awaiting_confirmation: usize,
    pub executed: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BacktestReport {
    pub steps: usize,
    pub signals: usize,
    pub trades: usize,
    pub wins: usize,
    /// Percent of closed trades with positive profit.
    pub win_rate: f64,
    pub open_positions: usize,
    pub initial_balance: f64,
    pub final_balance: f64,
}

#[derive(Debug, Clone, Serialize)]
struct AnalysisDigest {
    symbol: String,
    signal: Direction,
    strength: f64,
    success_probability: f64,
    price: Option<f64>,
    support: Option<f64>,
    resistance: Option<f64>,
    prediction: Option<f64>,
}

struct EngineState {
    scans: u64,
    failed_scans: u64,
    signals_generated: u64,
    last_scan: Option<i64>,
    analyses: BTreeMap<String, AnalysisDigest>,
    charts: BTreeMap<String, ChartData>,
    log: ActivityLog,
}

pub struct BotEngine {
    broker: SharedBroker,
    data: Arc<DataManager>,
    analysis: Arc<AnalysisEngine>,
    news: NewsAnalyzer,
    predictor: Option<Arc<Mutex<Predictor>>>,
    desk: Arc<TradingDesk>,
    store: Option<Arc<Store>>,
    general: GeneralConfig,
    state: Mutex<EngineState>,
}

impl BotEngine {
    pub fn new(
        broker: SharedBroker,
        data: Arc<DataManager>,
        predictor: Option<Predictor>,
        desk: Arc<TradingDesk>,
        store: Option<Arc<Store>>,
        general: GeneralConfig,
    ) -> Arc<Self> {
        log::info!(
            "[Engine] {} symbols on {} timeframes, prediction {}",
            general.symbols.len(),
            general.timeframes.len(),
            if predictor.is_some() { "on" } else { "off" }
        );
        Arc::new(Self {
            broker,
            data,
            analysis: Arc::new(AnalysisEngine::new()),
            news: NewsAnalyzer::new(),
            predictor: predictor.map(|p| Arc::new(Mutex::new(p))),
            desk,
            store,
            general,
            state: Mutex::new(EngineState {
                scans: 0,
                failed_scans: 0,
                signals_generated: 0,
                last_scan: None,
                analyses: BTreeMap::new(),
                charts: BTreeMap::new(),
                log: ActivityLog::new(),
            }),
        })
    }

    pub fn desk(&self) -> &Arc<TradingDesk> {
        &self.desk
    }

    // =========================================================================
    // Scan
    // =========================================================================

    /// One pass over every configured symbol at time `now` (unix seconds).
    /// A failing symbol is logged and skipped; the scan fails only when no
    /// market data could be fetched at all.
    pub async fn scan_once(&self, now: i64) -> Result<ScanReport, String> {
        let since = self.state.lock().await.last_scan;
        if let Some(since) = since {
            self.book_closed_deals(since, now).await;
        }

        let updated = self
            .data
            .update_market_data(&self.general.symbols, &self.general.timeframes)
            .await;
        if !updated.values().any(|ok| *ok) {
            let mut state = self.state.lock().await;
            state.failed_scans += 1;
            state.log.push(now, "No market data available".to_string(), "error");
            return Err("No market data available".to_string());
        }

        let events = self.news_window(now);
        let mut report = ScanReport {
            timestamp: now,
            ..ScanReport::default()
        };
        for symbol in &self.general.symbols {
            match self.scan_symbol(symbol, &events, now).await {
                Ok(routed) => {
                    report.symbols_analyzed += 1;
                    if let Some((signal, routing)) = routed {
                        report.signals.push(signal.id.clone());
                        match routing {
                            Some(Routing::AwaitingConfirmation) => report.awaiting_confirmation += 1,
                            Some(Routing::Executed(_)) => report.executed += 1,
                            _ => {}
                        }
                    }
                }
                Err(e) => {
                    log::warn!("[Engine] {}: {}", symbol, e);
                    self.state
                        .lock()
                        .await
                        .log
                        .push(now, format!("{} failed: {}", symbol, e), "error");
                }
            }
        }
        report.expired = self.desk.expire_due(now).await.len();

        let mut state = self.state.lock().await;
        state.scans += 1;
        state.last_scan = Some(now);
        state.signals_generated += report.signals.len() as u64;
        log::debug!(
            "[Engine] Scan done: {} symbols, {} signals, {} expired",
            report.symbols_analyzed,
            report.signals.len(),
            report.expired
        );
        Ok(report)
    }

    fn news_window(&self, now: i64) -> Vec<CalendarEvent> {
        let Some(at) = DateTime::<Utc>::from_timestamp(now, 0) else {
            return Vec::new();
        };
        let window = chrono::Duration::hours(NEWS_WINDOW_HOURS);
        self.data.get_news_data(at - window, at + window).unwrap_or_else(|e| {
            log::warn!("[Engine] {}", e);
            Vec::new()
        })
    }

    fn news_for(
        &self,
        symbol: &str,
        events: &[CalendarEvent],
        now: i64,
    ) -> Option<NewsAnalysis> {
        let social = self.data.get_social_sentiment(symbol).unwrap_or_else(|e| {
            log::warn!("[Engine] {}", e);
            Vec::new()
        });
        if events.is_empty() && social.is_empty() {
            return None;
        }
        let at = DateTime::<Utc>::from_timestamp(now, 0)?;
        Some(self.news.analyze(symbol, events, &social, at))
    }

    async fn scan_symbol(
        &self,
        symbol: &str,
        events: &[CalendarEvent],
        now: i64,
    ) -> Result<Option<(Signal, Option<Routing>)>, String> {
        let mut frames: BTreeMap<Timeframe, Vec<Bar>> = BTreeMap::new();
        for &tf in &self.general.timeframes {
            frames.insert(tf, self.data.cached(symbol, tf).await.unwrap_or_default());
        }
        if frames.values().all(|bars| bars.is_empty()) {
            return Err("no bars".to_string());
        }

        let chart_tf = step_timeframe(&self.general.timeframes);
        let chart_bars = frames.get(&chart_tf).cloned().unwrap_or_default();
        let news = self.news_for(symbol, events, now);
        let engine = self.analysis.clone();
        let name = symbol.to_string();
        let analysis = tokio::task::spawn_blocking(move || engine.analyze(&name, &frames, news, now))
            .await
            .map_err(|e| format!("Analysis task failed: {}", e))?;

        let prediction = self.predict(symbol).await;
        let tick = self.data.get_latest_tick(symbol).await.ok();
        let chart = build_chart(symbol, chart_tf, &chart_bars, analysis.timeframe(chart_tf));
        self.remember(&analysis, prediction.as_ref(), chart).await;

        let signal = self.desk.signal_generator().lock().await.generate_signal(
            &analysis,
            prediction.as_ref(),
            tick.as_ref(),
            now,
        );
        let Some(signal) = signal else {
            return Ok(None);
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.add_signal(&signal).await {
                log::warn!("[Engine] Failed to store signal: {}", e);
            }
        }
        self.state.lock().await.log.push(
            now,
            format!(
                "Signal {} {} ({:.1}%, RR {:.2})",
                signal.symbol, signal.direction, signal.success_probability, signal.risk_reward
            ),
            "signal",
        );

        let risk = match self.desk.risk_manager().calculate_risk_params(&signal, now).await {
            Ok(risk) => risk,
            Err(e) => {
                log::warn!("[Engine] Risk sizing failed for {}: {}", symbol, e);
                return Ok(Some((signal, None)));
            }
        };
        let routing = match self.desk.route(signal.clone(), risk, now).await {
            Ok(routing) => Some(routing),
            Err(e) => {
                log::warn!("[Engine] Routing {} failed: {}", signal.id, e);
                self.state
                    .lock()
                    .await
                    .log
                    .push(now, format!("{} not routed: {}", symbol, e), "warning");
                None
            }
        };
        Ok(Some((signal, routing)))
    }

    async fn predict(&self, symbol: &str) -> Option<Prediction> {
        let predictor = self.predictor.clone()?;
        let tf = predictor.lock().await.config().timeframe;
        let bars = match self.data.cached(symbol, tf).await {
            Some(bars) => bars,
            None => self.data.get_historical_data(symbol, tf, None, true).await.ok()?,
        };
        let name = symbol.to_string();
        let result = tokio::task::spawn_blocking(move || predictor.blocking_lock().predict(&name, &bars)).await;
        match result {
            Ok(Ok(prediction)) => Some(prediction),
            Ok(Err(e)) => {
                log::debug!("[Engine] No prediction for {}: {}", symbol, e);
                None
            }
            Err(e) => {
                log::warn!("[Engine] Prediction task failed: {}", e);
                None
            }
        }
    }

    async fn remember(&self, analysis: &SymbolAnalysis, prediction: Option<&Prediction>, chart: Option<ChartData>) {
        let summary = &analysis.summary;
        let digest = AnalysisDigest {
            symbol: analysis.symbol.clone(),
            signal: summary.signal,
            strength: summary.strength,
            success_probability: summary.success_probability,
            price: summary.current_price,
            support: summary.nearest_support,
            resistance: summary.nearest_resistance,
            prediction: prediction.map(|p| p.predicted_change * 100.0),
        };
        let mut state = self.state.lock().await;
        state.analyses.insert(analysis.symbol.clone(), digest);
        if let Some(chart) = chart {
            state.charts.insert(analysis.symbol.clone(), chart);
        }
    }

    /// Books deals the broker closed since the last scan and refreshes the
    /// day's performance row.
    async fn book_closed_deals(&self, since: i64, now: i64) {
        let deals = match self.broker.trade_history(since + 1, now).await {
            Ok(deals) => deals,
            Err(e) => {
                log::warn!("[Engine] Failed to read trade history: {}", e);
                return;
            }
        };
        if deals.is_empty() {
            return;
        }
        self.desk.record_closed_deals(&deals, now).await;
        if let Some(store) = &self.store {
            let day = local_time(self.general.tz(), now).date_naive();
            if let Err(e) = store.update_performance(day).await {
                log::warn!("[Engine] Failed to update performance: {}", e);
            }
        }
    }

    // =========================================================================
    // Loops
    // =========================================================================

    /// Scans every `scan_interval_secs` until the task is dropped. A failed scan
    /// waits `error_retry_secs` instead.
    pub async fn run(&self) {
        log::info!("[Engine] Starting scan loop every {}s", self.general.scan_interval_secs);
        loop {
            let now = self.server_time().await;
            let wait = match self.scan_once(now).await {
                Ok(report) => {
                    if !report.signals.is_empty() {
                        log::info!(
                            "[Engine] {} signals ({} awaiting confirmation, {} executed)",
                            report.signals.len(),
                            report.awaiting_confirmation,
                            report.executed
                        );
                    }
                    self.general.scan_interval_secs
                }
                Err(e) => {
                    log::error!("[Engine] Scan failed: {}", e);
                    self.general.error_retry_secs
                }
            };
            tokio::time::sleep(Duration::from_secs(wait)).await;
        }
    }

    async fn server_time(&self) -> i64 {
        self.broker
            .server_time()
            .await
            .unwrap_or_else(|_| Utc::now().timestamp())
    }

    /// Replays the paper broker's bars close by close on `step`, scanning after
    /// each one. Positions still open at the end are reported, not closed.
    pub async fn run_backtest(&self, paper: &PaperBroker, step: Timeframe) -> Result<BacktestReport, String> {
        self.replay(paper, step, None).await
    }

    /// Paper trading over recorded bars: the paper clock moves one `step` close
    /// per scan interval, so stops, targets and pending orders fill as it goes.
    /// Returns when the bars run out.
    pub async fn run_paper(&self, paper: &PaperBroker, step: Timeframe) -> Result<BacktestReport, String> {
        let pace = Duration::from_secs(self.general.scan_interval_secs);
        self.replay(paper, step, Some(pace)).await
    }

    async fn replay(&self, paper: &PaperBroker, step: Timeframe, pace: Option<Duration>) -> Result<BacktestReport, String> {
        let label = if pace.is_some() { "Paper replay" } else { "Backtest" };
        let times = paper.close_times(step).await;
        if times.len() <= BACKTEST_WARMUP_BARS {
            return Err(format!(
                "{} needs more than {} {} bars, got {}",
                label,
                BACKTEST_WARMUP_BARS,
                step,
                times.len()
            ));
        }
        let initial_balance = paper.balance().await;
        let start = times[0];
        log::info!("[Engine] {} over {} {} closes", label, times.len() - BACKTEST_WARMUP_BARS, step);

        let mut report = BacktestReport {
            initial_balance,
            ..BacktestReport::default()
        };
        paper.set_clock(times[BACKTEST_WARMUP_BARS - 1]).await;
        for &t in &times[BACKTEST_WARMUP_BARS..] {
            // Stops hit while advancing are booked by the scan's deal sweep.
            paper.advance_to(t).await;
            match self.scan_once(t).await {
                Ok(scan) => report.signals += scan.signals.len(),
                Err(e) => log::warn!("[Engine] Scan at {} failed: {}", t, e),
            }
            report.steps += 1;
            if let Some(pace) = pace {
                tokio::time::sleep(pace).await;
            }
        }

        let end = paper.clock().await;
        let deals = self.broker.trade_history(start, end + 1).await?;
        report.trades = deals.len();
        report.wins = deals.iter().filter(|d| d.profit > 0.0).count();
        report.win_rate = if report.trades > 0 {
            report.wins as f64 / report.trades as f64 * 100.0
        } else {
            0.0
        };
        report.open_positions = self.broker.positions(None).await?.len();
        report.final_balance = paper.balance().await;
        log::info!(
            "[Engine] {} done: {} trades, win rate {:.1}%, balance {:.2}",
            label,
            report.trades,
            report.win_rate,
            report.final_balance
        );
        Ok(report)
    }

    /// Trains a model per symbol on the prediction timeframe and records its
    /// test metrics.
    pub async fn train_models(&self) -> Vec<(String, Result<ModelMetrics, String>)> {
        let Some(predictor) = self.predictor.clone() else {
            return Vec::new();
        };
        let tf = predictor.lock().await.config().timeframe;
        let mut results = Vec::new();
        for symbol in &self.general.symbols {
            let result = match self.data.get_historical_data(symbol, tf, None, false).await {
                Ok(bars) => {
                    let predictor = predictor.clone();
                    let name = symbol.clone();
                    tokio::task::spawn_blocking(move || predictor.blocking_lock().train(&name, tf, &bars))
                        .await
                        .map_err(|e| format!("Training task failed: {}", e))
                        .and_then(|r| r)
                }
                Err(e) => Err(e),
            };
            if let (Ok(metrics), Some(store)) = (&result, &self.store) {
                let record = ModelPerformanceRecord {
                    id: 0,
                    symbol: symbol.clone(),
                    model_name: format!("ridge_{}", tf),
                    timestamp: Utc::now().timestamp(),
                    accuracy: metrics.accuracy,
                    direction_accuracy: metrics.direction_accuracy,
                    mse: metrics.mse,
                    mae: metrics.mae,
                };
                if let Err(e) = store.add_model_performance(record).await {
                    log::warn!("[Engine] Failed to store model metrics: {}", e);
                }
            }
            results.push((symbol.clone(), result));
        }
        results
    }
}

// =============================================================================
// Dashboard Implementation
// =============================================================================

#[async_trait]
impl Dashboard for BotEngine {
    fn dashboard_name(&self) -> &str {
        "engine"
    }

    async fn dashboard_state(&self) -> Value {
        let account = self.broker.account_info().await.ok();
        let signals = self
            .desk
            .signal_generator()
            .lock()
            .await
            .get_signal_history(RECENT_SIGNALS_SHOWN);
        let signals: Vec<Value> = signals
            .iter()
            .rev()
            .map(|s| {
                json!({
                    "symbol": s.symbol,
                    "direction": s.direction,
                    "probability": s.success_probability,
                    "entry": s.entry_price,
                    "stop_loss": s.stop_loss,
                    "take_profit": s.take_profit,
                    "status": s.status,
                })
            })
            .collect();
        let state = self.state.lock().await;
        json!({
            "broker": self.broker.name(),
            "balance": account.as_ref().map(|a| a.balance),
            "equity": account.as_ref().map(|a| a.equity),
            "free_margin": account.as_ref().map(|a| a.free_margin),
            "scans": state.scans,
            "failed_scans": state.failed_scans,
            "signals_generated": state.signals_generated,
            "last_scan": state.last_scan
                .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            "analyses": state.analyses.values().collect::<Vec<_>>(),
            "charts": state.charts.values().collect::<Vec<_>>(),
            "signals": signals,
            "log": state.log.entries(),
        })
    }

    fn dashboard_schema(&self) -> DashboardSchema {
        let money = |label: &str, key: &str| Widget::KeyValue {
            label: label.to_string(),
            key: key.to_string(),
            format: Some("money".to_string()),
        };
        let plain = |label: &str, key: &str| Widget::KeyValue {
            label: label.to_string(),
            key: key.to_string(),
            format: None,
        };
        let price = |header: &str, key: &str| TableColumn {
            format: Some("price".to_string()),
            ..TableColumn::new(header, key)
        };
        DashboardSchema {
            widgets: vec![
                plain("Broker", "broker"),
                money("Balance", "balance"),
                money("Equity", "equity"),
                money("Free Margin", "free_margin"),
                plain("Scans", "scans"),
                plain("Signals", "signals_generated"),
                plain("Last Scan", "last_scan"),
                Widget::Divider,
                Widget::Table {
                    title: "Analysis".to_string(),
                    columns: vec![
                        TableColumn::new("Symbol", "symbol"),
                        TableColumn::new("Signal", "signal"),
                        TableColumn::new("Strength", "strength"),
                        TableColumn {
                            format: Some("percent".to_string()),
                            ..TableColumn::new("Probability", "success_probability")
                        },
                        price("Price", "price"),
                        price("Support", "support"),
                        price("Resistance", "resistance"),
                    ],
                    data_key: "analyses".to_string(),
                },
                Widget::Chart {
                    title: "Charts".to_string(),
                    data_key: "charts".to_string(),
                    chart_type: "candlestick".to_string(),
                },
                Widget::Table {
                    title: "Recent Signals".to_string(),
                    columns: vec![
                        TableColumn::new("Symbol", "symbol"),
                        TableColumn::new("Direction", "direction"),
                        TableColumn {
                            format: Some("percent".to_string()),
                            ..TableColumn::new("Probability", "probability")
                        },
                        price("Entry", "entry"),
                        price("SL", "stop_loss"),
                        price("TP", "take_profit"),
                        TableColumn::new("Status", "status"),
                    ],
                    data_key: "signals".to_string(),
                },
                Widget::Log {
                    title: "Activity".to_string(),
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
    use crate::config::{PaperBrokerConfig, RiskConfig, SignalConfig, TradingConfig};
    use crate::notifier::LogNotifier;
    use crate::trading::{RiskManager, SignalGenerator};

    const T0: i64 = 1_704_067_200;

    fn engine_with(broker: Arc<PaperBroker>, general: GeneralConfig) -> Arc<BotEngine> {
        let data_dir = std::env::temp_dir().join(format!(
            "test_engine_{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let data = Arc::new(DataManager::new(broker.clone(), &data_dir, 200, false));
        let risk = Arc::new(RiskManager::new(broker.clone(), RiskConfig::default(), 1.5));
        let desk = TradingDesk::new(
            broker.clone(),
            Arc::new(Mutex::new(SignalGenerator::new(SignalConfig::default()))),
            risk,
            None,
            Arc::new(LogNotifier),
            TradingConfig::default(),
            false,
        );
        BotEngine::new(broker, data, None, desk, None, general)
    }

    fn general(symbols: &[&str]) -> GeneralConfig {
        GeneralConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            timeframes: vec![Timeframe::H1],
            ..GeneralConfig::default()
        }
    }

    #[tokio::test]
    async fn test_scan_without_data_fails() {
        let broker = Arc::new(PaperBroker::new(PaperBrokerConfig::default()));
        let engine = engine_with(broker, general(&["EURUSD"]));
        assert!(engine.scan_once(T0).await.is_err());
        assert_eq!(engine.dashboard_state().await["failed_scans"], 1);
    }

    #[tokio::test]
    async fn test_scan_records_analysis() {
        let broker = Arc::new(PaperBroker::new(PaperBrokerConfig::default()));
        let bars: Vec<Bar> = (0..120)
            .map(|i| {
                let c = 1.1 + (i as f64 * 0.3).sin() * 0.002;
                Bar::new(T0 - 3600 * (120 - i), c, c + 0.0008, c - 0.0008, c + 0.0001)
            })
            .collect();
        broker.load_bars("EURUSD", Timeframe::H1, bars).await;
        broker.set_clock(T0).await;

        let engine = engine_with(broker, general(&["EURUSD", "GBPUSD"]));
        let report = engine.scan_once(T0).await.unwrap();
        assert_eq!(report.symbols_analyzed, 1);

        let state = engine.dashboard_state().await;
        assert_eq!(state["scans"], 1);
        assert_eq!(state["analyses"][0]["symbol"], "EURUSD");
        let chart = &state["charts"][0];
        assert_eq!(chart["symbol"], "EURUSD");
        assert_eq!(chart["timeframe"], "H1");
        assert_eq!(chart["candles"].as_array().unwrap().len(), chart::CHART_BARS);
        assert_eq!(chart["indicators"][0]["name"], "EMA 20");
        assert!(chart["support"].is_array());

        let schema = serde_json::to_value(engine.dashboard_schema()).unwrap();
        let widgets = schema["widgets"].as_array().unwrap();
        assert!(widgets.iter().any(|w| w["type"] == "chart" && w["data_key"] == "charts"));
    }

    #[tokio::test]
    async fn test_paper_replay_moves_broker_clock() {
        let broker = Arc::new(PaperBroker::new(PaperBrokerConfig::default()));
        let bars: Vec<Bar> = (0..60)
            .map(|i| {
                let c = 1.1 + (i as f64 * 0.4).sin() * 0.001;
                Bar::new(T0 + 3600 * i, c, c + 0.0005, c - 0.0005, c)
            })
            .collect();
        broker.load_bars("EURUSD", Timeframe::H1, bars).await;
        broker.set_clock(T0 + 60 * 3600).await;
        let general = GeneralConfig {
            scan_interval_secs: 0,
            ..general(&["EURUSD"])
        };
        let engine = engine_with(broker.clone(), general);

        let report = engine.run_paper(&broker, Timeframe::H1).await.unwrap();
        assert_eq!(report.steps, 60 - BACKTEST_WARMUP_BARS);
        assert_eq!(broker.clock().await, T0 + 60 * 3600);
        assert_eq!(engine.server_time().await, T0 + 60 * 3600);
        assert_eq!(engine.dashboard_state().await["scans"], report.steps);
    }

    #[tokio::test]
    async fn test_backtest_needs_warmup() {
        let broker = Arc::new(PaperBroker::new(PaperBrokerConfig::default()));
        let bars: Vec<Bar> = (0..10).map(|i| Bar::new(T0 + 3600 * i, 1.1, 1.11, 1.09, 1.1)).collect();
        broker.load_bars("EURUSD", Timeframe::H1, bars).await;
        let engine = engine_with(broker.clone(), general(&["EURUSD"]));
        assert!(engine.run_backtest(&broker, Timeframe::H1).await.is_err());
    }
}
