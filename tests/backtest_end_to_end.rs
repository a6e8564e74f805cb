// tests/backtest_end_to_end.rs

use chrono::Utc;
use forex_bot::config::{GeneralConfig, PaperBrokerConfig, RiskConfig, SignalConfig, TradingConfig};
use forex_bot::connectors::{synthetic_bars, PaperBroker};
use forex_bot::data::DataManager;
use forex_bot::engine::{BotEngine, BACKTEST_WARMUP_BARS};
use forex_bot::models::Timeframe;
use forex_bot::notifier::LogNotifier;
use forex_bot::traits::SharedBroker;
use forex_bot::trading::{RiskManager, SignalGenerator, TradingDesk};
use std::sync::Arc;
use tokio::sync::Mutex;

const START: i64 = 1_704_067_200;
const BARS: usize = 160;

async fn setup() -> (Arc<PaperBroker>, Arc<BotEngine>) {
    let paper = Arc::new(PaperBroker::new(PaperBrokerConfig::default()));
    paper
        .load_bars("EURUSD", Timeframe::H1, synthetic_bars(1.1, Timeframe::H1, START, BARS))
        .await;
    let broker: SharedBroker = paper.clone();

    let data_dir = std::env::temp_dir().join(format!(
        "test_backtest_e2e_{}",
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
        true,
    );
    let general = GeneralConfig {
        symbols: vec!["EURUSD".to_string()],
        timeframes: vec![Timeframe::H1],
        ..GeneralConfig::default()
    };
    let engine = BotEngine::new(broker, data, None, desk, None, general);
    (paper, engine)
}

#[tokio::test]
async fn test_backtest_steps_every_close_after_warmup() {
    let (paper, engine) = setup().await;
    let report = engine.run_backtest(&paper, Timeframe::H1).await.unwrap();

    assert_eq!(report.steps, BARS - BACKTEST_WARMUP_BARS);
    assert_eq!(report.initial_balance, PaperBrokerConfig::default().initial_balance);
    assert!(report.final_balance.is_finite());
    assert!(report.wins <= report.trades);
    assert!((0.0..=100.0).contains(&report.win_rate));

    // The clock ends on the last bar's close.
    assert_eq!(paper.clock().await, START + BARS as i64 * 3600);
}

#[tokio::test]
async fn test_backtest_leaves_nothing_awaiting_confirmation() {
    let (paper, engine) = setup().await;
    engine.run_backtest(&paper, Timeframe::H1).await.unwrap();
    assert!(engine.desk().pending().await.is_empty());
}
