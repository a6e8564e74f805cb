// src/config.rs
//
// TOML configuration. Every section has defaults so an empty file is valid.
// Secrets never live in the file; see `Secrets::from_env`.

use crate::models::Timeframe;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// =============================================================================
// Configuration Types
// =============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub scan_interval_secs: u64,
    /// Sleep after a failed scan.
    pub error_retry_secs: u64,
    /// IANA name used for day boundaries in risk accounting and messages.
    pub timezone: String,
    pub data_dir: String,
    pub bars_per_request: usize,
    /// Write fetched bars to CSV after every scan.
    pub save_market_data: bool,
    /// Web dashboard port (None = no dashboard)
    pub dashboard_port: Option<u16>,
    pub log_level: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            symbols: ["EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD", "XAUUSD"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeframes: vec![
                Timeframe::M5,
                Timeframe::M15,
                Timeframe::H1,
                Timeframe::H4,
                Timeframe::D1,
            ],
            scan_interval_secs: 60,
            error_retry_secs: 30,
            timezone: "Europe/Istanbul".to_string(),
            data_dir: "data".to_string(),
            bars_per_request: 1000,
            save_market_data: false,
            dashboard_port: None,
            log_level: None,
        }
    }
}

/// `timestamp` (unix seconds) as wall-clock time in `tz`.
pub fn local_time(tz: Tz, timestamp: i64) -> DateTime<Tz> {
    Utc.timestamp_opt(timestamp, 0).single().unwrap_or_default().with_timezone(&tz)
}

impl GeneralConfig {
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or_else(|_| {
            log::warn!("Unknown timezone {}, using UTC", self.timezone);
            chrono_tz::UTC
        })
    }
}

/// Broker selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerConfig {
    Paper(PaperBrokerConfig),
    Bridge(BridgeBrokerConfig),
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig::Paper(PaperBrokerConfig::default())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperBrokerConfig {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// One position per symbol and side: fills in the same direction are
    /// averaged in, opposite fills reduce the position.
    #[serde(default)]
    pub netting: bool,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            leverage: default_leverage(),
            currency: default_currency(),
            netting: false,
        }
    }
}

fn default_initial_balance() -> f64 {
    10_000.0
}

fn default_leverage() -> u32 {
    100
}

fn default_currency() -> String {
    "USD".to_string()
}

/// JSON/HTTP bridge to a trading terminal.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeBrokerConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Order placement is refused unless this is set.
    #[serde(default)]
    pub enable_real_trading: bool,
    #[serde(default = "default_magic")]
    pub magic: i64,
    #[serde(default = "default_deviation")]
    pub deviation: u32,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_magic() -> i64 {
    234000
}

fn default_deviation() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Percent of balance risked per trade at full probability.
    pub max_risk_percent: f64,
    pub max_daily_risk_percent: f64,
    pub max_weekly_risk_percent: f64,
    pub max_open_positions: usize,
    pub max_positions_per_symbol: usize,
    pub max_lot_size: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_percent: 2.0,
            max_daily_risk_percent: 5.0,
            max_weekly_risk_percent: 10.0,
            max_open_positions: 5,
            max_positions_per_symbol: 2,
            max_lot_size: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub min_probability: f64,
    pub min_strength: f64,
    pub min_risk_reward: f64,
    pub max_signals_per_day: usize,
    pub default_sl_pips: f64,
    pub default_tp_pips: f64,
    pub analysis_weight: f64,
    pub prediction_weight: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_probability: 60.0,
            min_strength: 40.0,
            min_risk_reward: 1.5,
            max_signals_per_day: 10,
            default_sl_pips: 50.0,
            default_tp_pips: 100.0,
            analysis_weight: 0.7,
            prediction_weight: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub auto_trade_enabled: bool,
    /// Minimum success probability (percent) routed to confirmation.
    pub auto_trade_threshold: f64,
    pub confirmation_required: bool,
    pub confirmation_timeout_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            auto_trade_enabled: false,
            auto_trade_threshold: 70.0,
            confirmation_required: true,
            confirmation_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub enabled: bool,
    pub timeframe: Timeframe,
    /// Lagged returns per feature row.
    pub lags: usize,
    pub ridge_alpha: f64,
    /// Predicted change (fraction) beyond which the forecast has a direction.
    pub direction_threshold: f64,
    pub min_training_bars: usize,
    pub model_dir: String,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeframe: Timeframe::H1,
            lags: 10,
            ridge_alpha: 1.0,
            direction_threshold: 0.001,
            min_training_bars: 200,
            model_dir: "models".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    /// getUpdates long-poll timeout.
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_timeout_secs: 30,
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, String> {
        let config: Config = toml::from_str(s).map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.general.symbols.is_empty() {
            return Err("general.symbols must not be empty".to_string());
        }
        if self.general.timeframes.is_empty() {
            return Err("general.timeframes must not be empty".to_string());
        }
        if self.general.scan_interval_secs == 0 {
            return Err("general.scan_interval_secs must be positive".to_string());
        }
        if !(0.0..=100.0).contains(&self.trading.auto_trade_threshold) {
            return Err(format!(
                "trading.auto_trade_threshold must be within 0..100, got {}",
                self.trading.auto_trade_threshold
            ));
        }
        if self.prediction.lags == 0 {
            return Err("prediction.lags must be positive".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Secrets
// =============================================================================

/// Credentials read from the environment.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<i64>,
    pub bridge_api_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let telegram_token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty());
        if telegram_token.is_none() {
            println!("Note: TELEGRAM_BOT_TOKEN not set, Telegram disabled");
        }
        let telegram_chat_id = match std::env::var("TELEGRAM_CHAT_ID") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                println!("Note: TELEGRAM_CHAT_ID is not a number, Telegram disabled");
            }).ok(),
            Err(_) => {
                println!("Note: TELEGRAM_CHAT_ID not set, Telegram disabled");
                None
            }
        };
        let bridge_api_key = std::env::var("BRIDGE_API_KEY").ok().filter(|s| !s.is_empty());
        Self {
            telegram_token,
            telegram_chat_id,
            bridge_api_key,
        }
    }

    pub fn telegram(&self) -> Option<(String, i64)> {
        Some((self.telegram_token.clone()?, self.telegram_chat_id?))
    }
}

// =============================================================================
// Default Configuration
// =============================================================================

/// Returns a default configuration string for documentation.
pub fn default_config_template() -> &'static str {
    r#"# Forex Bot Configuration
#
# Secrets come from the environment:
#   TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID  Telegram notifications and commands
#   BRIDGE_API_KEY                        bearer token for the terminal bridge

[general]
symbols = ["EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD", "XAUUSD"]
timeframes = ["M5", "M15", "H1", "H4", "D1"]
scan_interval_secs = 60
error_retry_secs = 30
timezone = "Europe/Istanbul"
data_dir = "data"
bars_per_request = 1000
save_market_data = false
# Web dashboard port (optional)
dashboard_port = 8080

[broker]
type = "paper"
initial_balance = 10000.0
leverage = 100
currency = "USD"
netting = false

# Live terminal bridge
# [broker]
# type = "bridge"
# base_url = "http://127.0.0.1:8765"
# timeout_secs = 60
# enable_real_trading = false
# magic = 234000
# deviation = 10

[risk]
max_risk_percent = 2.0
max_daily_risk_percent = 5.0
max_weekly_risk_percent = 10.0
max_open_positions = 5
max_positions_per_symbol = 2
max_lot_size = 1.0

[signal]
min_probability = 60.0
min_strength = 40.0
min_risk_reward = 1.5
max_signals_per_day = 10
default_sl_pips = 50.0
default_tp_pips = 100.0
analysis_weight = 0.7
prediction_weight = 0.3

[trading]
auto_trade_enabled = false
auto_trade_threshold = 70.0
confirmation_required = true
confirmation_timeout_secs = 300

[prediction]
enabled = true
timeframe = "H1"
lags = 10
ridge_alpha = 1.0
direction_threshold = 0.001
min_training_bars = 200
model_dir = "models"

[telegram]
enabled = false
poll_timeout_secs = 30
"#
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.general.symbols.len(), 6);
        assert_eq!(config.general.timeframes[2], Timeframe::H1);
        assert_eq!(config.risk.max_open_positions, 5);
        assert_eq!(config.trading.confirmation_timeout_secs, 300);
        assert!(matches!(config.broker, BrokerConfig::Paper(ref p) if p.initial_balance == 10_000.0));
    }

    #[test]
    fn test_template_parses() {
        let config = Config::from_str(default_config_template()).unwrap();
        assert_eq!(config.general.dashboard_port, Some(8080));
        assert_eq!(config.prediction.lags, 10);
        assert_eq!(config.general.tz(), chrono_tz::Europe::Istanbul);
    }

    #[test]
    fn test_bridge_broker_section() {
        let config = Config::from_str(
            r#"
            [broker]
            type = "bridge"
            base_url = "http://localhost:8765"
            enable_real_trading = true
        "#,
        )
        .unwrap();
        match config.broker {
            BrokerConfig::Bridge(b) => {
                assert_eq!(b.base_url, "http://localhost:8765");
                assert!(b.enable_real_trading);
                assert_eq!(b.magic, 234000);
                assert_eq!(b.timeout_secs, 60);
            }
            _ => panic!("Expected bridge broker"),
        }
    }

    #[test]
    fn test_partial_section_and_validation() {
        let config = Config::from_str("[signal]\nmin_probability = 75.0\n").unwrap();
        assert_eq!(config.signal.min_probability, 75.0);
        assert_eq!(config.signal.min_risk_reward, 1.5);

        assert!(Config::from_str("[general]\nsymbols = []\n").is_err());
        assert!(Config::from_str("[trading]\nauto_trade_threshold = 150.0\n").is_err());
        assert!(Config::from_str("[general]\ntimeframes = [\"H2\"]\n").is_err());
    }
}
