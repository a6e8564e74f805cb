// src/trading/risk_manager.rs
//
// Position sizing and exposure limits. Risk taken is tracked per local day and
// ISO week (UTC unless a timezone is set) as a percentage of the balance at entry.

use crate::config::{local_time, RiskConfig};
use crate::connectors::paper::position_profit;
use crate::indicators::pip_size;
use crate::models::{Direction, OrderSide, Signal};
use crate::traits::SharedBroker;
use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::Mutex;

const MAX_RISK_HISTORY: usize = 100;
const MIN_LOT: f64 = 0.01;
/// Remaining budget below one cent counts as spent.
const MIN_RISK_AMOUNT: f64 = 0.01;

/// Sizing for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    pub lot_size: f64,
    /// Account currency.
    pub risk_amount: f64,
    /// Percent of balance.
    pub risk_percent: f64,
    /// False when the daily or weekly budget is spent.
    pub max_allowed: bool,
    pub sl_pips: f64,
    pub tp_pips: f64,
    /// Account currency per pip per lot.
    pub pip_value: f64,
    pub risk_reward_ratio: f64,
    pub margin_required: f64,
    pub max_lot_allowed: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            lot_size: MIN_LOT,
            risk_amount: 0.0,
            risk_percent: 0.0,
            max_allowed: true,
            sl_pips: 0.0,
            tp_pips: 0.0,
            pip_value: 0.0,
            risk_reward_ratio: 0.0,
            margin_required: 0.0,
            max_lot_allowed: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PositionLimits {
    pub current_open_positions: usize,
    pub max_positions: usize,
    pub max_positions_reached: bool,
    pub positions_per_symbol: BTreeMap<String, usize>,
    pub max_positions_per_symbol: usize,
    pub max_positions_per_symbol_reached: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEntry {
    pub timestamp: i64,
    pub symbol: String,
    pub direction: Direction,
    pub lot_size: f64,
    pub risk_amount: f64,
    pub risk_percent: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSummary {
    pub daily_risk: f64,
    pub weekly_risk: f64,
    pub max_daily_risk: f64,
    pub max_weekly_risk: f64,
    pub total_trades_today: usize,
    pub avg_risk_per_trade: f64,
}

/// Share of the maximum per-trade risk used at a given success probability.
pub fn risk_scale(success_probability: f64) -> f64 {
    if success_probability >= 80.0 {
        1.0
    } else if success_probability >= 70.0 {
        0.8
    } else if success_probability >= 60.0 {
        0.6
    } else {
        0.5
    }
}

struct RiskState {
    history: VecDeque<RiskEntry>,
    daily_risk: f64,
    weekly_risk: f64,
    last_reset_day: Option<NaiveDate>,
    last_reset_week: Option<(i32, u32)>,
}

impl RiskState {
    /// Zeroes the daily and weekly totals when `now` is in a new day or ISO week
    /// of `tz`.
    fn roll(&mut self, now: i64, tz: Tz) {
        let now = local_time(tz, now);
        let day = now.date_naive();
        let week = (now.iso_week().year(), now.iso_week().week());
        if self.last_reset_day != Some(day) {
            if self.last_reset_day.is_some() {
                log::info!("[Risk] Daily risk reset");
            }
            self.daily_risk = 0.0;
            self.last_reset_day = Some(day);
        }
        if self.last_reset_week != Some(week) {
            if self.last_reset_week.is_some() {
                log::info!("[Risk] Weekly risk reset");
            }
            self.weekly_risk = 0.0;
            self.last_reset_week = Some(week);
        }
    }
}

pub struct RiskManager {
    broker: SharedBroker,
    config: RiskConfig,
    min_risk_reward: f64,
    tz: Tz,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(broker: SharedBroker, config: RiskConfig, min_risk_reward: f64) -> Self {
        Self {
            broker,
            config,
            min_risk_reward,
            tz: chrono_tz::UTC,
            state: Mutex::new(RiskState {
                history: VecDeque::new(),
                daily_risk: 0.0,
                weekly_risk: 0.0,
                last_reset_day: None,
                last_reset_week: None,
            }),
        }
    }

    /// Day and week boundaries follow `tz`.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Lot size and exposure for `signal` at time `now`.
    ///
    /// The per-trade risk is `max_risk_percent` scaled by the signal probability,
    /// capped by what is left of the daily and weekly budgets.
    pub async fn calculate_risk_params(&self, signal: &Signal, now: i64) -> Result<RiskParams, String> {
        let side = signal
            .direction
            .as_side()
            .ok_or_else(|| format!("Signal {} has no direction", signal.id))?;
        let account = self.broker.account_info().await?;
        let info = self.broker.symbol_info(&signal.symbol).await?;
        let balance = account.balance;

        let pip = pip_size(&signal.symbol);
        let pip_value = position_profit(
            &info,
            OrderSide::Buy,
            1.0,
            signal.entry_price,
            signal.entry_price + pip,
            &account.currency,
        );

        let sl_distance = (signal.entry_price - signal.stop_loss) * side.sign();
        let tp_distance = (signal.take_profit - signal.entry_price) * side.sign();
        let sl_pips = (sl_distance / pip).trunc();
        let tp_pips = (tp_distance / pip).trunc();
        let risk_reward_ratio = if sl_distance > 0.0 { tp_distance / sl_distance } else { 0.0 };

        let (daily_risk, weekly_risk) = {
            let mut state = self.state.lock().await;
            state.roll(now, self.tz);
            (state.daily_risk, state.weekly_risk)
        };

        let mut risk_percent = self.config.max_risk_percent * risk_scale(signal.success_probability);
        let remaining_daily = (self.config.max_daily_risk_percent - daily_risk) / 100.0 * balance;
        let remaining_weekly = (self.config.max_weekly_risk_percent - weekly_risk) / 100.0 * balance;
        let available = remaining_daily.min(remaining_weekly);

        let mut risk_amount = balance * risk_percent / 100.0;
        if risk_amount > available {
            risk_amount = available.max(0.0);
            risk_percent = if balance > 0.0 { risk_amount / balance * 100.0 } else { 0.0 };
        }

        let raw_lot = if sl_pips > 0.0 && pip_value > 0.0 {
            risk_amount / (sl_pips * pip_value)
        } else {
            MIN_LOT
        };
        let lot_size = ((raw_lot / MIN_LOT).round() * MIN_LOT)
            .min(info.volume_max)
            .min(self.config.max_lot_size)
            .max(info.volume_min);

        let margin_required = self.broker.calculate_margin(&signal.symbol, side, lot_size).await?;

        Ok(RiskParams {
            lot_size,
            risk_amount,
            risk_percent,
            max_allowed: available >= MIN_RISK_AMOUNT,
            sl_pips,
            tp_pips,
            pip_value,
            risk_reward_ratio,
            margin_required,
            max_lot_allowed: self.config.max_lot_size,
        })
    }

    pub async fn check_position_limits(&self) -> Result<PositionLimits, String> {
        let positions = self.broker.positions(None).await?;
        let mut per_symbol: BTreeMap<String, usize> = BTreeMap::new();
        for p in &positions {
            *per_symbol.entry(p.symbol.clone()).or_default() += 1;
        }
        let reached = per_symbol
            .iter()
            .map(|(s, n)| (s.clone(), *n >= self.config.max_positions_per_symbol))
            .collect();
        Ok(PositionLimits {
            current_open_positions: positions.len(),
            max_positions: self.config.max_open_positions,
            max_positions_reached: positions.len() >= self.config.max_open_positions,
            positions_per_symbol: per_symbol,
            max_positions_per_symbol: self.config.max_positions_per_symbol,
            max_positions_per_symbol_reached: reached,
        })
    }

    /// Checks, in order: open positions, positions for the symbol, free margin,
    /// risk budget, minimum lot and risk/reward. Returns the sizing when all pass.
    pub async fn can_open_position(&self, signal: &Signal, now: i64) -> Result<RiskParams, String> {
        let account = self.broker.account_info().await?;
        let limits = self.check_position_limits().await?;

        if limits.max_positions_reached {
            return Err(format!("Maximum open positions reached ({})", limits.max_positions));
        }
        if limits
            .max_positions_per_symbol_reached
            .get(&signal.symbol)
            .copied()
            .unwrap_or(false)
        {
            return Err(format!(
                "Maximum positions for {} reached ({})",
                signal.symbol, limits.max_positions_per_symbol
            ));
        }

        let params = self.calculate_risk_params(signal, now).await?;
        if params.margin_required > account.free_margin {
            return Err(format!(
                "Insufficient margin: required {:.2}, free {:.2}",
                params.margin_required, account.free_margin
            ));
        }
        if !params.max_allowed {
            return Err("Daily or weekly risk limit reached".to_string());
        }
        if params.lot_size < MIN_LOT {
            return Err(format!("Lot size too small ({:.2} < {:.2})", params.lot_size, MIN_LOT));
        }
        if params.risk_reward_ratio < self.min_risk_reward {
            return Err(format!(
                "Risk/reward too low: {:.2} < {}",
                params.risk_reward_ratio, self.min_risk_reward
            ));
        }
        Ok(params)
    }

    /// Books the risk of an opened trade against the daily and weekly budgets.
    pub async fn update_risk_history(&self, signal: &Signal, params: &RiskParams, now: i64) -> Result<(), String> {
        let balance = self.broker.account_info().await?.balance;
        let risk_percent = if balance > 0.0 {
            params.risk_amount / balance * 100.0
        } else {
            0.0
        };
        let entry = RiskEntry {
            timestamp: now,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            lot_size: params.lot_size,
            risk_amount: params.risk_amount,
            risk_percent,
            balance,
        };

        let mut state = self.state.lock().await;
        state.roll(now, self.tz);
        state.daily_risk += risk_percent;
        state.weekly_risk += risk_percent;
        state.history.push_back(entry);
        while state.history.len() > MAX_RISK_HISTORY {
            state.history.pop_front();
        }
        log::info!(
            "[Risk] Booked {:.2}% on {} (day {:.2}%, week {:.2}%)",
            risk_percent,
            signal.symbol,
            state.daily_risk,
            state.weekly_risk
        );
        Ok(())
    }

    /// Entries from the last `days` days.
    pub async fn get_risk_history(&self, days: i64, now: i64) -> Vec<RiskEntry> {
        let since = now - days * 86_400;
        let state = self.state.lock().await;
        state.history.iter().filter(|e| e.timestamp >= since).cloned().collect()
    }

    pub async fn get_risk_summary(&self, now: i64) -> RiskSummary {
        let mut state = self.state.lock().await;
        state.roll(now, self.tz);
        let today = local_time(self.tz, now).date_naive();
        let todays: Vec<&RiskEntry> = state
            .history
            .iter()
            .filter(|e| local_time(self.tz, e.timestamp).date_naive() == today)
            .collect();
        let avg = if todays.is_empty() {
            0.0
        } else {
            todays.iter().map(|e| e.risk_percent).sum::<f64>() / todays.len() as f64
        };
        RiskSummary {
            daily_risk: state.daily_risk,
            weekly_risk: state.weekly_risk,
            max_daily_risk: self.config.max_daily_risk_percent,
            max_weekly_risk: self.config.max_weekly_risk_percent,
            total_trades_today: todays.len(),
            avg_risk_per_trade: avg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaperBrokerConfig;
    use crate::connectors::PaperBroker;
    use crate::models::{Bar, OrderRequest, SignalStatus, Timeframe};
    use crate::traits::Broker;
    use std::sync::Arc;

    // Monday 2024-01-01 00:00 UTC.
    const T0: i64 = 1_704_067_200;

    async fn broker() -> Arc<PaperBroker> {
        let broker = Arc::new(PaperBroker::new(PaperBrokerConfig::default()));
        let bars: Vec<Bar> = (0..10)
            .map(|i| Bar::new(T0 - 3600 * (10 - i), 1.1, 1.1005, 1.0995, 1.1))
            .collect();
        broker.load_bars("EURUSD", Timeframe::H1, bars.clone()).await;
        broker.load_bars("GBPUSD", Timeframe::H1, bars).await;
        broker.set_clock(T0).await;
        broker
    }

    fn signal(symbol: &str, probability: f64, sl: f64, tp: f64) -> Signal {
        Signal {
            id: "s1".to_string(),
            symbol: symbol.to_string(),
            direction: Direction::Buy,
            strength: 70.0,
            success_probability: probability,
            entry_price: 1.1,
            stop_loss: sl,
            take_profit: tp,
            risk_reward: 2.0,
            timestamp: T0,
            status: SignalStatus::Pending,
            timeframes: Vec::new(),
            key_patterns: Vec::new(),
            nearest_support: None,
            nearest_resistance: None,
            predicted_change: None,
            execution: None,
            status_updated_at: None,
        }
    }

    #[test]
    fn test_risk_scale_tiers() {
        assert_eq!(risk_scale(85.0), 1.0);
        assert_eq!(risk_scale(72.0), 0.8);
        assert_eq!(risk_scale(60.0), 0.6);
        assert_eq!(risk_scale(10.0), 0.5);
    }

    #[tokio::test]
    async fn test_sizing_from_stop_distance() {
        let rm = RiskManager::new(broker().await, RiskConfig::default(), 1.5);
        // 2% of 10000 over 50 pips at 10 USD per pip: 0.4 lots.
        let params = rm.calculate_risk_params(&signal("EURUSD", 85.0, 1.095, 1.11), T0).await.unwrap();
        assert_eq!(params.sl_pips, 50.0);
        assert!((params.pip_value - 10.0).abs() < 1e-6);
        assert!((params.risk_amount - 200.0).abs() < 1e-9);
        assert!((params.lot_size - 0.4).abs() < 1e-9);
        assert!((params.risk_reward_ratio - 2.0).abs() < 1e-6);
        assert!(params.margin_required > 0.0);

        // 60% probability risks 1.2%: 0.24 lots.
        let params = rm.calculate_risk_params(&signal("EURUSD", 60.0, 1.095, 1.11), T0).await.unwrap();
        assert!((params.lot_size - 0.24).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_budget_caps_and_resets() {
        let rm = RiskManager::new(broker().await, RiskConfig::default(), 1.5);
        let s = signal("EURUSD", 85.0, 1.095, 1.11);
        let booked = RiskParams {
            risk_amount: 450.0,
            lot_size: 0.9,
            ..RiskParams::default()
        };
        rm.update_risk_history(&s, &booked, T0).await.unwrap();

        // 4.5% used of a 5% day: 50 left.
        let params = rm.calculate_risk_params(&s, T0 + 60).await.unwrap();
        assert!((params.risk_amount - 50.0).abs() < 1e-6);
        assert!((params.risk_percent - 0.5).abs() < 1e-6);
        assert!(params.max_allowed);

        rm.update_risk_history(&s, &RiskParams { risk_amount: 50.0, ..RiskParams::default() }, T0 + 120)
            .await
            .unwrap();
        assert!(!rm.calculate_risk_params(&s, T0 + 180).await.unwrap().max_allowed);
        let err = rm.can_open_position(&s, T0 + 180).await.unwrap_err();
        assert!(err.contains("risk limit"));

        // Next day: daily budget is back, weekly keeps the 5%.
        let summary = rm.get_risk_summary(T0 + 86_400).await;
        assert_eq!(summary.daily_risk, 0.0);
        assert!((summary.weekly_risk - 5.0).abs() < 1e-9);
        assert_eq!(summary.total_trades_today, 0);
        assert_eq!(rm.get_risk_history(7, T0 + 86_400).await.len(), 2);
        assert!(rm.can_open_position(&s, T0 + 86_400).await.is_ok());
    }

    #[tokio::test]
    async fn test_position_limits_checked_first() {
        let b = broker().await;
        let config = RiskConfig {
            max_positions_per_symbol: 1,
            ..RiskConfig::default()
        };
        let rm = RiskManager::new(b.clone(), config, 1.5);
        b.open_position(OrderRequest::market("EURUSD", OrderSide::Buy, 0.1)).await.unwrap();

        let limits = rm.check_position_limits().await.unwrap();
        assert_eq!(limits.current_open_positions, 1);
        assert_eq!(limits.max_positions_per_symbol_reached.get("EURUSD"), Some(&true));

        let err = rm.can_open_position(&signal("EURUSD", 85.0, 1.095, 1.11), T0).await.unwrap_err();
        assert!(err.contains("EURUSD"));
        assert!(rm.can_open_position(&signal("GBPUSD", 85.0, 1.095, 1.11), T0).await.is_ok());

        let err = rm.can_open_position(&signal("GBPUSD", 85.0, 1.095, 1.1025), T0).await.unwrap_err();
        assert!(err.contains("Risk/reward"));
    }

    #[tokio::test]
    async fn test_day_boundary_follows_timezone() {
        let s = signal("EURUSD", 85.0, 1.095, 1.11);
        let booked = RiskParams {
            risk_amount: 450.0,
            ..RiskParams::default()
        };
        // Sunday 23:00 in Istanbul, then Monday 01:00 there (still Sunday in UTC).
        let (before, after) = (T0 - 4 * 3600, T0 - 2 * 3600);

        let utc = RiskManager::new(broker().await, RiskConfig::default(), 1.5);
        utc.update_risk_history(&s, &booked, before).await.unwrap();
        let summary = utc.get_risk_summary(after).await;
        assert!((summary.daily_risk - 4.5).abs() < 1e-9);
        assert_eq!(summary.total_trades_today, 1);

        let local = RiskManager::new(broker().await, RiskConfig::default(), 1.5)
            .with_timezone(chrono_tz::Europe::Istanbul);
        local.update_risk_history(&s, &booked, before).await.unwrap();
        let summary = local.get_risk_summary(after).await;
        assert_eq!(summary.daily_risk, 0.0);
        assert_eq!(summary.weekly_risk, 0.0);
        assert_eq!(summary.total_trades_today, 0);
    }
}
