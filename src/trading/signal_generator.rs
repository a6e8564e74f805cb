// src/trading/signal_generator.rs
//
// Turns a multi-timeframe analysis plus a model prediction into a trade signal
// with entry, stop loss and take profit.

use crate::analysis::engine::SymbolAnalysis;
use crate::config::SignalConfig;
use crate::indicators::pip_size;
use crate::models::{
    Direction, OrderResult, Signal, SignalStatus, Tick, Timeframe, TimeframeDigest,
};
use crate::prediction::Prediction;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;

const MAX_HISTORY: usize = 100;
/// A side has to beat the other by this many points.
const DECISION_MARGIN: f64 = 10.0;

const ATR_TIMEFRAMES: [Timeframe; 4] = [Timeframe::H1, Timeframe::H4, Timeframe::M15, Timeframe::D1];
const PRICE_TIMEFRAMES: [Timeframe; 4] = [Timeframe::H1, Timeframe::M15, Timeframe::H4, Timeframe::D1];

const ATR_SL_MULTIPLIER: f64 = 1.5;
const ATR_TP_MULTIPLIER: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedSignal {
    pub direction: Direction,
    pub strength: f64,
    pub success_probability: f64,
}

/// Weighted vote of the analysis summary and the model prediction.
pub fn combine_signals(
    analysis: &SymbolAnalysis,
    prediction: Option<&Prediction>,
    analysis_weight: f64,
    prediction_weight: f64,
) -> CombinedSignal {
    let summary = &analysis.summary;
    let mut buy = 0.0;
    let mut sell = 0.0;
    match summary.signal {
        Direction::Buy => buy += summary.strength * analysis_weight,
        Direction::Sell => sell += summary.strength * analysis_weight,
        Direction::Neutral => {}
    }
    let confidence = prediction.map_or(0.0, |p| p.confidence);
    match prediction.map(|p| p.direction) {
        Some(Direction::Buy) => buy += confidence * prediction_weight,
        Some(Direction::Sell) => sell += confidence * prediction_weight,
        _ => {}
    }

    let (direction, strength) = if buy > sell + DECISION_MARGIN {
        (Direction::Buy, buy)
    } else if sell > buy + DECISION_MARGIN {
        (Direction::Sell, sell)
    } else {
        (Direction::Neutral, buy.max(sell) / 2.0)
    };
    let success_probability = if direction == Direction::Neutral {
        0.0
    } else {
        summary.success_probability * analysis_weight + confidence * prediction_weight
    };
    CombinedSignal {
        direction,
        strength,
        success_probability,
    }
}

/// Price-action last price (H1, M15, H4, D1), then the tick mid, then the last H1 close.
pub fn entry_price(analysis: &SymbolAnalysis, tick: Option<&Tick>) -> Option<f64> {
    PRICE_TIMEFRAMES
        .iter()
        .filter_map(|tf| analysis.timeframe(*tf))
        .filter_map(|t| t.price_action())
        .map(|pa| pa.last_price)
        .find(|p| *p > 0.0)
        .or_else(|| tick.map(|t| t.mid()).filter(|p| *p > 0.0))
        .or_else(|| {
            analysis
                .timeframe(Timeframe::H1)
                .map(|t| t.last_close)
                .filter(|p| *p > 0.0)
        })
}

fn analysis_atr(analysis: &SymbolAnalysis) -> Option<f64> {
    ATR_TIMEFRAMES
        .iter()
        .filter_map(|tf| analysis.timeframe(*tf))
        .filter_map(|t| t.price_action())
        .map(|pa| pa.atr)
        .find(|atr| atr.is_finite() && *atr > 0.0)
}

/// Nearest support below and resistance above `price` across every timeframe.
pub fn nearest_levels(analysis: &SymbolAnalysis, price: f64) -> (Option<f64>, Option<f64>) {
    let support = analysis
        .timeframes
        .iter()
        .flat_map(|t| t.summary.support_levels.iter().copied())
        .filter(|s| *s < price)
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
    let resistance = analysis
        .timeframes
        .iter()
        .flat_map(|t| t.summary.resistance_levels.iter().copied())
        .filter(|r| *r > price)
        .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.min(r))));
    (support, resistance)
}

/// Stop loss and take profit for a trade at `entry`.
///
/// With an ATR the stop goes just beyond a level closer than 2 ATR (else 1.5 ATR away)
/// and the target at a level closer than 4 ATR (else 3 ATR away), then both are
/// pushed out to at least 0.5 and 1 ATR. Without one, the default pip distances apply.
pub fn calculate_sl_tp(
    symbol: &str,
    direction: Direction,
    entry: f64,
    atr: Option<f64>,
    support: Option<f64>,
    resistance: Option<f64>,
    default_sl_pips: f64,
    default_tp_pips: f64,
) -> (f64, f64) {
    let sign = if direction == Direction::Sell { -1.0 } else { 1.0 };
    let atr = match atr {
        Some(atr) => atr,
        None => {
            let pip = pip_size(symbol);
            return (
                entry - sign * default_sl_pips * pip,
                entry + sign * default_tp_pips * pip,
            );
        }
    };

    // Levels on the protective and target side of the trade.
    let (guard, target) = if sign > 0.0 {
        (support, resistance)
    } else {
        (resistance, support)
    };

    let mut sl = match guard.filter(|g| (entry - g) * sign < 2.0 * atr) {
        Some(level) => level - sign * 0.1 * atr,
        None => entry - sign * atr * ATR_SL_MULTIPLIER,
    };
    let mut tp = match target.filter(|t| (t - entry) * sign < 4.0 * atr) {
        Some(level) => level,
        None => entry + sign * atr * ATR_TP_MULTIPLIER,
    };

    if (entry - sl) * sign < 0.5 * atr {
        sl = entry - sign * 0.5 * atr;
    }
    if (tp - entry) * sign < atr {
        tp = entry + sign * atr;
    }
    (sl, tp)
}

/// Reward over risk for the signal side; 0 when the stop is not behind the entry.
pub fn signal_risk_reward(direction: Direction, entry: f64, stop_loss: f64, take_profit: f64) -> f64 {
    let sign = if direction == Direction::Sell { -1.0 } else { 1.0 };
    let risk = (entry - stop_loss) * sign;
    let reward = (take_profit - entry) * sign;
    if risk <= 0.0 {
        0.0
    } else {
        reward / risk
    }
}

fn utc_day(timestamp: i64) -> Option<chrono::NaiveDate> {
    Utc.timestamp_opt(timestamp, 0).single().map(|d| d.date_naive())
}

// =============================================================================
// Generator
// =============================================================================

pub struct SignalGenerator {
    config: SignalConfig,
    history: VecDeque<Signal>,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Builds a pending signal, or None when the setup is neutral, weak, improbable,
    /// poorly rewarded or the daily signal budget is spent.
    pub fn generate_signal(
        &mut self,
        analysis: &SymbolAnalysis,
        prediction: Option<&Prediction>,
        tick: Option<&Tick>,
        now: i64,
    ) -> Option<Signal> {
        let symbol = analysis.symbol.as_str();
        let today = utc_day(now);
        let issued_today = self
            .history
            .iter()
            .filter(|s| utc_day(s.timestamp) == today)
            .count();
        if issued_today >= self.config.max_signals_per_day {
            log::info!("[Signals] Daily limit of {} reached, skipping {}", self.config.max_signals_per_day, symbol);
            return None;
        }

        let entry = match entry_price(analysis, tick) {
            Some(price) => price,
            None => {
                log::warn!("[Signals] No price for {}", symbol);
                return None;
            }
        };

        let combined = combine_signals(
            analysis,
            prediction,
            self.config.analysis_weight,
            self.config.prediction_weight,
        );
        if combined.direction == Direction::Neutral || combined.strength < self.config.min_strength {
            log::info!(
                "[Signals] Weak or neutral setup for {} ({} {:.1})",
                symbol,
                combined.direction,
                combined.strength
            );
            return None;
        }
        if combined.success_probability < self.config.min_probability {
            log::info!(
                "[Signals] Low probability for {}: {:.1} < {}",
                symbol,
                combined.success_probability,
                self.config.min_probability
            );
            return None;
        }

        let (support, resistance) = nearest_levels(analysis, entry);
        let (stop_loss, take_profit) = calculate_sl_tp(
            symbol,
            combined.direction,
            entry,
            analysis_atr(analysis),
            support,
            resistance,
            self.config.default_sl_pips,
            self.config.default_tp_pips,
        );
        let risk_reward = signal_risk_reward(combined.direction, entry, stop_loss, take_profit);
        if risk_reward < self.config.min_risk_reward {
            log::info!(
                "[Signals] Low risk/reward for {}: {:.2} < {}",
                symbol,
                risk_reward,
                self.config.min_risk_reward
            );
            return None;
        }

        let signal = Signal {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            direction: combined.direction,
            strength: combined.strength,
            success_probability: combined.success_probability,
            entry_price: entry,
            stop_loss,
            take_profit,
            risk_reward,
            timestamp: now,
            status: SignalStatus::Pending,
            timeframes: analysis
                .timeframes
                .iter()
                .map(|t| TimeframeDigest {
                    timeframe: t.timeframe,
                    signal: t.summary.signal,
                    strength: t.summary.strength,
                })
                .collect(),
            key_patterns: analysis
                .timeframes
                .iter()
                .filter(|t| analysis.summary.key_timeframes.contains(&t.timeframe))
                .flat_map(|t| t.summary.key_patterns.iter().take(3).cloned())
                .collect(),
            nearest_support: support,
            nearest_resistance: resistance,
            predicted_change: prediction.map(|p| p.predicted_change * 100.0),
            execution: None,
            status_updated_at: None,
        };

        self.history.push_back(signal.clone());
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
        log::info!(
            "[Signals] {} {} at {:.5} (probability {:.1}%, RR {:.2})",
            symbol,
            signal.direction,
            entry,
            signal.success_probability,
            risk_reward
        );
        Some(signal)
    }

    /// The most recent `limit` signals, oldest first.
    pub fn get_signal_history(&self, limit: usize) -> Vec<Signal> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn get_signal(&self, id: &str) -> Option<&Signal> {
        self.history.iter().find(|s| s.id == id)
    }

    /// Moves a signal to `status`, keeping execution details when given.
    pub fn update_signal_status(
        &mut self,
        id: &str,
        status: SignalStatus,
        execution: Option<OrderResult>,
        now: i64,
    ) -> Result<Signal, String> {
        let signal = self
            .history
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| format!("Signal {} not found", id))?;
        if !signal.status.can_transition_to(status) {
            return Err(format!("Signal {} is already {}", id, signal.status));
        }
        signal.status = status;
        signal.status_updated_at = Some(now);
        if execution.is_some() {
            signal.execution = execution;
        }
        Ok(signal.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::engine::{Confidence, OverallSummary, TimeframeAnalysis, TimeframeSummary};
    use std::collections::BTreeMap;

    pub(crate) fn summary_analysis(symbol: &str, signal: Direction, strength: f64, probability: f64) -> SymbolAnalysis {
        let tf_summary = TimeframeSummary {
            signal,
            confidence: Confidence::High,
            strength,
            buy_signals: 2,
            sell_signals: 0,
            support_levels: vec![1.0950, 1.0990],
            resistance_levels: vec![1.1100, 1.1300],
            key_patterns: vec!["ICT: Liquidity Sweep".to_string()],
        };
        SymbolAnalysis {
            symbol: symbol.to_string(),
            timestamp: 0,
            timeframes: vec![TimeframeAnalysis {
                timeframe: Timeframe::H1,
                data_points: 300,
                last_close: 1.1000,
                reports: BTreeMap::new(),
                summary: tf_summary,
            }],
            news: None,
            summary: OverallSummary {
                signal,
                confidence: Confidence::High,
                strength,
                success_probability: probability,
                buy_weight: 100.0,
                sell_weight: 0.0,
                news_impact: 0.0,
                current_price: Some(1.1000),
                nearest_support: Some(1.0990),
                nearest_resistance: Some(1.1100),
                key_timeframes: vec![Timeframe::H1],
            },
        }
    }

    fn prediction(direction: Direction, confidence: f64) -> Prediction {
        Prediction {
            symbol: "EURUSD".to_string(),
            timeframe: Timeframe::H1,
            direction,
            confidence,
            predicted_change: 0.002,
            last_price: 1.1,
            forecast_1h: 1.1022,
            forecast_4h: 1.1044,
            forecast_24h: 1.1088,
        }
    }

    #[test]
    fn test_combine_requires_margin() {
        let analysis = summary_analysis("EURUSD", Direction::Buy, 80.0, 75.0);
        let c = combine_signals(&analysis, Some(&prediction(Direction::Buy, 60.0)), 0.7, 0.3);
        assert_eq!(c.direction, Direction::Buy);
        assert!((c.strength - 74.0).abs() < 1e-9);
        assert!((c.success_probability - 70.5).abs() < 1e-9);

        // 56 buy vs 30 sell is a clear buy; 28 vs 30 is not.
        let c = combine_signals(&analysis, Some(&prediction(Direction::Sell, 100.0)), 0.7, 0.3);
        assert_eq!(c.direction, Direction::Buy);
        let weak = summary_analysis("EURUSD", Direction::Buy, 40.0, 60.0);
        let c = combine_signals(&weak, Some(&prediction(Direction::Sell, 100.0)), 0.7, 0.3);
        assert_eq!(c.direction, Direction::Neutral);
        assert!((c.strength - 15.0).abs() < 1e-9);
        assert_eq!(c.success_probability, 0.0);
    }

    #[test]
    fn test_sl_tp_uses_levels_and_minimums() {
        // Support 10 pips below with ATR 20 pips: stop 2 pips under it.
        let (sl, tp) = calculate_sl_tp("EURUSD", Direction::Buy, 1.1000, Some(0.0020), Some(1.0990), Some(1.1050), 50.0, 100.0);
        assert!((sl - 1.0988).abs() < 1e-9);
        assert!((tp - 1.1050).abs() < 1e-9);

        // Levels too far away fall back to ATR multiples.
        let (sl, tp) = calculate_sl_tp("EURUSD", Direction::Sell, 1.1000, Some(0.0020), Some(1.0800), Some(1.1200), 50.0, 100.0);
        assert!((sl - 1.1030).abs() < 1e-9);
        assert!((tp - 1.0940).abs() < 1e-9);

        let (sl, tp) = calculate_sl_tp("USDJPY", Direction::Buy, 150.00, None, None, None, 50.0, 100.0);
        assert!((sl - 149.50).abs() < 1e-9);
        assert!((tp - 151.00).abs() < 1e-9);
    }

    #[test]
    fn test_risk_reward_by_side() {
        assert!((signal_risk_reward(Direction::Sell, 1.1, 1.11, 1.08) - 2.0).abs() < 1e-9);
        assert_eq!(signal_risk_reward(Direction::Buy, 1.1, 1.11, 1.12), 0.0);
    }

    #[test]
    fn test_generate_and_track_status() {
        let mut generator = SignalGenerator::new(SignalConfig::default());
        let analysis = summary_analysis("EURUSD", Direction::Buy, 80.0, 75.0);
        // No ATR in the summary: default 50/100 pips gives RR 2.
        let signal = generator
            .generate_signal(&analysis, Some(&prediction(Direction::Buy, 60.0)), None, 1_700_000_000)
            .unwrap();
        assert_eq!(signal.direction, Direction::Buy);
        assert!((signal.entry_price - 1.1).abs() < 1e-9);
        assert!((signal.stop_loss - 1.095).abs() < 1e-9);
        assert!((signal.risk_reward - 2.0).abs() < 1e-6);
        assert_eq!(signal.nearest_support, Some(1.0990));
        assert_eq!(signal.key_patterns, vec!["ICT: Liquidity Sweep".to_string()]);
        assert!((signal.predicted_change.unwrap() - 0.2).abs() < 1e-9);

        let updated = generator
            .update_signal_status(&signal.id, SignalStatus::Rejected, None, 1_700_000_100)
            .unwrap();
        assert_eq!(updated.status, SignalStatus::Rejected);
        assert!(generator
            .update_signal_status(&signal.id, SignalStatus::Executed, None, 1_700_000_200)
            .is_err());
        assert_eq!(generator.get_signal_history(10).len(), 1);
    }

    #[test]
    fn test_filters_and_daily_limit() {
        let mut generator = SignalGenerator::new(SignalConfig {
            max_signals_per_day: 1,
            ..SignalConfig::default()
        });
        let improbable = summary_analysis("EURUSD", Direction::Buy, 80.0, 40.0);
        assert!(generator.generate_signal(&improbable, None, None, 0).is_none());

        let good = summary_analysis("EURUSD", Direction::Buy, 80.0, 90.0);
        assert!(generator.generate_signal(&good, None, None, 0).is_some());
        assert!(generator.generate_signal(&good, None, None, 60).is_none());
        assert!(generator.generate_signal(&good, None, None, 86_400).is_some());
    }
}
