// src/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Timeframes and Market Data
// =============================================================================

/// Bar timeframes supported by the broker bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
    MN1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 9] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
        Timeframe::MN1,
    ];

    /// Length of one bar in minutes.
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
            Timeframe::W1 => 10080,
            Timeframe::MN1 => 43200,
        }
    }

    /// Length of one bar in seconds.
    pub fn seconds(&self) -> i64 {
        self.minutes() * 60
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
            Timeframe::MN1 => "MN1",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown timeframe: {}", s))
    }
}

/// One OHLC bar. `time` is the bar open time in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub tick_volume: f64,
    #[serde(default)]
    pub spread: f64,
}

impl Bar {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            tick_volume: 0.0,
            spread: 0.0,
        }
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn upper_shadow(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_shadow(&self) -> f64 {
        self.open.min(self.close) - self.low
    }
}

/// Latest quote for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub time: i64,
    pub bid: f64,
    pub ask: f64,
    #[serde(default)]
    pub last: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Tick {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

/// Contract specification for a tradable symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub digits: u32,
    pub point: f64,
    pub contract_size: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    #[serde(default)]
    pub spread: f64,
    #[serde(default)]
    pub currency_base: String,
    #[serde(default)]
    pub currency_profit: String,
    /// Fraction of notional required as margin before leverage (1.0 for plain FX).
    #[serde(default = "default_margin_rate")]
    pub margin_rate: f64,
}

fn default_margin_rate() -> f64 {
    1.0
}

impl SymbolInfo {
    /// Reasonable contract defaults for a symbol when the broker has no spec for it.
    pub fn standard(symbol: &str) -> Self {
        let upper = symbol.to_uppercase();
        let (digits, contract_size) = if upper.starts_with("XAU") {
            (2, 100.0)
        } else if upper.starts_with("XAG") {
            (3, 5000.0)
        } else if upper.ends_with("JPY") {
            (3, 100_000.0)
        } else {
            (5, 100_000.0)
        };
        let (base, profit) = match (upper.get(..3), upper.get(3..6)) {
            (Some(base), Some(profit)) => (base.to_string(), profit.to_string()),
            _ => (upper.clone(), "USD".to_string()),
        };
        Self {
            name: upper,
            digits,
            point: 10f64.powi(-(digits as i32)),
            contract_size,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            spread: 0.0,
            currency_base: base,
            currency_profit: profit,
            margin_rate: 1.0,
        }
    }
}

/// Trading account snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: i64,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    /// Equity / margin in percent; 0 when no margin is used.
    pub margin_level: f64,
    pub currency: String,
    pub leverage: u32,
}

// =============================================================================
// Orders and Positions
// =============================================================================

/// Signal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
    #[default]
    Neutral,
}

impl Direction {
    pub fn as_side(&self) -> Option<OrderSide> {
        match self {
            Direction::Buy => Some(OrderSide::Buy),
            Direction::Sell => Some(OrderSide::Sell),
            Direction::Neutral => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "buy"),
            Direction::Sell => write!(f, "sell"),
            Direction::Neutral => write!(f, "neutral"),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Pending order kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
    BuyLimit,
    SellLimit,
    BuyStop,
    SellStop,
}

impl PendingKind {
    pub fn side(&self) -> OrderSide {
        match self {
            PendingKind::BuyLimit | PendingKind::BuyStop => OrderSide::Buy,
            PendingKind::SellLimit | PendingKind::SellStop => OrderSide::Sell,
        }
    }
}

impl FromStr for PendingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy_limit" => Ok(PendingKind::BuyLimit),
            "sell_limit" => Ok(PendingKind::SellLimit),
            "buy_stop" => Ok(PendingKind::BuyStop),
            "sell_stop" => Ok(PendingKind::SellStop),
            other => Err(format!("Unknown pending order type: {}", other)),
        }
    }
}

/// A market order request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    /// Requested price; None fills at market.
    pub price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Maximum slippage in points.
    pub deviation: u32,
    pub magic: i64,
    pub comment: String,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            volume,
            price: None,
            stop_loss: None,
            take_profit: None,
            deviation: 10,
            magic: 234000,
            comment: String::new(),
        }
    }

    pub fn with_stops(mut self, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

/// Pending order request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrderRequest {
    pub symbol: String,
    pub kind: PendingKind,
    pub volume: f64,
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub comment: String,
    /// Expiry in unix seconds (good-till-cancelled when None).
    pub expiration: Option<i64>,
}

/// Result of a successful trade request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub ticket: u64,
    pub price: f64,
    pub volume: f64,
    pub retcode: u32,
    pub comment: String,
}

/// Open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub open_price: f64,
    pub current_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub profit: f64,
    #[serde(default)]
    pub swap: f64,
    pub open_time: i64,
    #[serde(default)]
    pub magic: i64,
    #[serde(default)]
    pub comment: String,
}

/// Resting order not yet triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub ticket: u64,
    pub symbol: String,
    pub kind: PendingKind,
    pub volume: f64,
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub time_setup: i64,
    #[serde(default)]
    pub expiration: Option<i64>,
    #[serde(default)]
    pub comment: String,
}

/// Closed (or partially closed) trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: u64,
    pub position_ticket: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub open_price: f64,
    pub close_price: f64,
    pub profit: f64,
    pub open_time: i64,
    pub close_time: i64,
    #[serde(default)]
    pub comment: String,
}

// =============================================================================
// Signals
// =============================================================================

/// Lifecycle of a generated signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Pending,
    Executed,
    Rejected,
    Expired,
    Completed,
}

impl SignalStatus {
    /// Allowed transitions: pending to any other state, executed to completed.
    pub fn can_transition_to(&self, next: SignalStatus) -> bool {
        match (self, next) {
            (SignalStatus::Pending, SignalStatus::Pending) => false,
            (SignalStatus::Pending, _) => true,
            (SignalStatus::Executed, SignalStatus::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalStatus::Pending => "pending",
            SignalStatus::Executed => "executed",
            SignalStatus::Rejected => "rejected",
            SignalStatus::Expired => "expired",
            SignalStatus::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

/// Per-timeframe digest stored with a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeDigest {
    pub timeframe: Timeframe,
    pub signal: Direction,
    pub strength: f64,
}

/// A trade idea produced by the signal generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    /// 0..100
    pub strength: f64,
    /// 0..100
    pub success_probability: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward: f64,
    /// Unix seconds.
    pub timestamp: i64,
    pub status: SignalStatus,
    #[serde(default)]
    pub timeframes: Vec<TimeframeDigest>,
    #[serde(default)]
    pub key_patterns: Vec<String>,
    pub nearest_support: Option<f64>,
    pub nearest_resistance: Option<f64>,
    /// Predicted next-bar change in percent, if a model was available.
    pub predicted_change: Option<f64>,
    #[serde(default)]
    pub execution: Option<OrderResult>,
    #[serde(default)]
    pub status_updated_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parse_and_minutes() {
        assert_eq!("h4".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert_eq!(Timeframe::MN1.minutes(), 43200);
        assert_eq!(Timeframe::M15.to_string(), "M15");
        assert!("H2".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_serde_uppercase() {
        let json = serde_json::to_string(&Timeframe::D1).unwrap();
        assert_eq!(json, "\"D1\"");
    }

    #[test]
    fn test_bar_shadows() {
        let bar = Bar::new(0, 1.1000, 1.1050, 1.0950, 1.1020);
        assert!(bar.is_bullish());
        assert!((bar.upper_shadow() - 0.0030).abs() < 1e-9);
        assert!((bar.lower_shadow() - 0.0050).abs() < 1e-9);
        assert!((bar.range() - 0.0100).abs() < 1e-9);
    }

    #[test]
    fn test_signal_status_transitions() {
        assert!(SignalStatus::Pending.can_transition_to(SignalStatus::Executed));
        assert!(SignalStatus::Pending.can_transition_to(SignalStatus::Expired));
        assert!(SignalStatus::Executed.can_transition_to(SignalStatus::Completed));
        assert!(!SignalStatus::Rejected.can_transition_to(SignalStatus::Executed));
        assert!(!SignalStatus::Expired.can_transition_to(SignalStatus::Pending));
    }

    #[test]
    fn test_standard_symbol_info() {
        let jpy = SymbolInfo::standard("usdjpy");
        assert_eq!(jpy.digits, 3);
        assert_eq!(jpy.currency_profit, "JPY");
        let gold = SymbolInfo::standard("XAUUSD");
        assert_eq!(gold.contract_size, 100.0);
        assert_eq!(gold.currency_base, "XAU");
    }

    #[test]
    fn test_standard_symbol_info_multibyte_name() {
        // Byte 3 falls inside 'Ä'.
        let odd = SymbolInfo::standard("abäcde");
        assert_eq!(odd.currency_base, "ABÄCDE");
        assert_eq!(odd.currency_profit, "USD");
        let short = SymbolInfo::standard("btc");
        assert_eq!(short.currency_base, "BTC");
    }
}
