// src/analysis/engine.rs
//
// Multi-timeframe analysis: every strategy on every timeframe, a per-timeframe
// vote, and a weighted overall view with a success probability.

use super::{
    news::NewsAnalysis, price_action::PriceActionDetails, IctStrategy, PriceActionStrategy,
    SmcStrategy, StrategyDetails, StrategyReport, TechnicalStrategy, LEVEL_MERGE_THRESHOLD,
};
use crate::indicators::{merge_levels, Trend};
use crate::models::{Bar, Direction, Timeframe};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

/// Order in which timeframes are tried for the current price.
const PRICE_TIMEFRAMES: [Timeframe; 5] = [
    Timeframe::H1,
    Timeframe::M15,
    Timeframe::M5,
    Timeframe::H4,
    Timeframe::D1,
];

fn timeframe_weight(tf: Timeframe) -> f64 {
    match tf {
        Timeframe::M5 => 0.05,
        Timeframe::M15 => 0.10,
        Timeframe::H1 => 0.20,
        Timeframe::H4 => 0.30,
        Timeframe::D1 => 0.35,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TimeframeSummary {
    pub signal: Direction,
    pub confidence: Confidence,
    /// Mean strategy strength, 0..100.
    pub strength: f64,
    pub buy_signals: usize,
    pub sell_signals: usize,
    pub support_levels: Vec<f64>,
    pub resistance_levels: Vec<f64>,
    /// Patterns prefixed with their strategy, e.g. `SMC: Bullish Break of Structure (BOS)`.
    pub key_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeframeAnalysis {
    pub timeframe: Timeframe,
    pub data_points: usize,
    pub last_close: f64,
    /// Keyed by strategy name.
    pub reports: BTreeMap<String, StrategyReport>,
    pub summary: TimeframeSummary,
}

impl TimeframeAnalysis {
    pub fn price_action(&self) -> Option<&PriceActionDetails> {
        self.reports.values().find_map(|r| match &r.details {
            StrategyDetails::PriceAction(d) => Some(d),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallSummary {
    pub signal: Direction,
    pub confidence: Confidence,
    /// 0..100
    pub strength: f64,
    /// 0..100
    pub success_probability: f64,
    /// Percent.
    pub buy_weight: f64,
    /// Percent.
    pub sell_weight: f64,
    pub news_impact: f64,
    pub current_price: Option<f64>,
    pub nearest_support: Option<f64>,
    pub nearest_resistance: Option<f64>,
    pub key_timeframes: Vec<Timeframe>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolAnalysis {
    pub symbol: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Ascending by timeframe.
    pub timeframes: Vec<TimeframeAnalysis>,
    pub news: Option<NewsAnalysis>,
    pub summary: OverallSummary,
}

impl SymbolAnalysis {
    pub fn timeframe(&self, tf: Timeframe) -> Option<&TimeframeAnalysis> {
        self.timeframes.iter().find(|t| t.timeframe == tf)
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct AnalysisEngine {
    strategies: Vec<Box<dyn TechnicalStrategy>>,
}

impl Default for AnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisEngine {
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(IctStrategy),
            Box::new(SmcStrategy),
            Box::new(PriceActionStrategy),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn TechnicalStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Analyzes every non-empty timeframe in parallel and combines the results.
    /// CPU bound; call from a blocking context.
    pub fn analyze(
        &self,
        symbol: &str,
        frames: &BTreeMap<Timeframe, Vec<Bar>>,
        news: Option<NewsAnalysis>,
        timestamp: i64,
    ) -> SymbolAnalysis {
        let results: Vec<Result<TimeframeAnalysis, String>> = frames
            .par_iter()
            .filter(|(_, bars)| !bars.is_empty())
            .map(|(tf, bars)| self.analyze_timeframe(*tf, bars))
            .collect();

        let mut timeframes = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(tf) => timeframes.push(tf),
                Err(e) => log::warn!("[Analysis] {}: {}", symbol, e),
            }
        }
        for tf in frames.iter().filter(|(_, b)| b.is_empty()).map(|(tf, _)| tf) {
            log::warn!("[Analysis] No data for {} {}", symbol, tf);
        }
        timeframes.sort_by_key(|t| t.timeframe);

        let summary = create_summary(&timeframes, news.as_ref());
        log::info!(
            "[Analysis] {}: {} (strength {:.0}, probability {:.0}) over {} timeframes",
            symbol,
            summary.signal,
            summary.strength,
            summary.success_probability,
            timeframes.len()
        );

        SymbolAnalysis {
            symbol: symbol.to_string(),
            timestamp,
            timeframes,
            news,
            summary,
        }
    }

    fn analyze_timeframe(&self, tf: Timeframe, bars: &[Bar]) -> Result<TimeframeAnalysis, String> {
        let mut reports = BTreeMap::new();
        let mut ordered = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let report = strategy
                .analyze(bars)
                .map_err(|e| format!("{} failed on {}: {}", strategy.name(), tf, e))?;
            ordered.push((strategy.prefix(), report.clone()));
            reports.insert(strategy.name().to_string(), report);
        }
        let last_close = bars.last().map(|b| b.close).unwrap_or_default();

        Ok(TimeframeAnalysis {
            timeframe: tf,
            data_points: bars.len(),
            last_close,
            reports,
            summary: create_timeframe_summary(&ordered),
        })
    }
}

// =============================================================================
// Summaries
// =============================================================================

/// Majority vote of the strategies on one timeframe.
pub fn create_timeframe_summary(reports: &[(&str, StrategyReport)]) -> TimeframeSummary {
    let buy = reports.iter().filter(|(_, r)| r.signal == Direction::Buy).count();
    let sell = reports.iter().filter(|(_, r)| r.signal == Direction::Sell).count();

    let signal = if buy > sell {
        Direction::Buy
    } else if sell > buy {
        Direction::Sell
    } else {
        Direction::Neutral
    };
    let confidence = if buy == 3 || sell == 3 {
        Confidence::High
    } else if buy == 2 || sell == 2 {
        Confidence::Medium
    } else {
        Confidence::Low
    };
    let strength = if reports.is_empty() {
        0.0
    } else {
        reports.iter().map(|(_, r)| r.strength).sum::<f64>() / reports.len() as f64
    };

    let support: Vec<f64> = reports.iter().flat_map(|(_, r)| r.support_levels.iter().copied()).collect();
    let resistance: Vec<f64> = reports
        .iter()
        .flat_map(|(_, r)| r.resistance_levels.iter().copied())
        .collect();
    let key_patterns = reports
        .iter()
        .flat_map(|(prefix, r)| r.patterns.iter().map(move |p| format!("{}: {}", prefix, p)))
        .collect();

    TimeframeSummary {
        signal,
        confidence,
        strength,
        buy_signals: buy,
        sell_signals: sell,
        support_levels: merge_levels(&support, LEVEL_MERGE_THRESHOLD),
        resistance_levels: merge_levels(&resistance, LEVEL_MERGE_THRESHOLD),
        key_patterns,
    }
}

fn current_price(timeframes: &[TimeframeAnalysis]) -> Option<f64> {
    PRICE_TIMEFRAMES
        .iter()
        .find_map(|tf| timeframes.iter().find(|t| t.timeframe == *tf))
        .or_else(|| timeframes.last())
        .map(|t| t.last_close)
}

/// Weighted vote across timeframes, nudged by news.
pub fn create_summary(timeframes: &[TimeframeAnalysis], news: Option<&NewsAnalysis>) -> OverallSummary {
    let total_weight: f64 = timeframes.iter().map(|t| timeframe_weight(t.timeframe)).sum();
    let weight = |tf: Timeframe| {
        if total_weight > 0.0 {
            timeframe_weight(tf) / total_weight
        } else {
            0.0
        }
    };

    let mut buy_weight = 0.0;
    let mut sell_weight = 0.0;
    for t in timeframes {
        match t.summary.signal {
            Direction::Buy => buy_weight += weight(t.timeframe),
            Direction::Sell => sell_weight += weight(t.timeframe),
            Direction::Neutral => {}
        }
    }

    let news_impact = news.map(|n| n.impact).unwrap_or(0.0);
    if news_impact > 0.0 {
        buy_weight += 0.1 * news_impact.min(1.0);
    } else if news_impact < 0.0 {
        sell_weight += 0.1 * news_impact.abs().min(1.0);
    }

    let (signal, raw) = if buy_weight > sell_weight + 0.1 {
        (Direction::Buy, buy_weight)
    } else if sell_weight > buy_weight + 0.1 {
        (Direction::Sell, sell_weight)
    } else {
        (Direction::Neutral, buy_weight.max(sell_weight))
    };
    let strength = (raw * 100.0).min(100.0);
    let confidence = if strength > 70.0 {
        Confidence::High
    } else if strength > 40.0 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    let price = current_price(timeframes);
    let (nearest_support, nearest_resistance) = match price {
        Some(p) => {
            let support = timeframes
                .iter()
                .flat_map(|t| t.summary.support_levels.iter().copied())
                .filter(|s| *s < p)
                .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
            let resistance = timeframes
                .iter()
                .flat_map(|t| t.summary.resistance_levels.iter().copied())
                .filter(|r| *r > p)
                .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.min(r))));
            (support, resistance)
        }
        None => (None, None),
    };

    let key_timeframes = timeframes
        .iter()
        .filter(|t| {
            t.summary.signal != Direction::Neutral && t.summary.confidence != Confidence::Low
        })
        .map(|t| t.timeframe)
        .collect();

    OverallSummary {
        signal,
        confidence,
        strength,
        success_probability: success_probability(timeframes, news_impact, signal, strength),
        buy_weight: buy_weight * 100.0,
        sell_weight: sell_weight * 100.0,
        news_impact,
        current_price: price,
        nearest_support,
        nearest_resistance,
        key_timeframes,
    }
}

/// Strength plus timeframe confirmations, corrected for news and the
/// higher-timeframe price action trend. Clamped to 0..100.
pub fn success_probability(
    timeframes: &[TimeframeAnalysis],
    news_impact: f64,
    signal: Direction,
    strength: f64,
) -> f64 {
    let confirmations = timeframes.iter().filter(|t| t.summary.signal == signal).count();
    let confirmation_bonus = (confirmations as f64 * 5.0).min(20.0);

    let with_news = (signal == Direction::Buy && news_impact > 0.0)
        || (signal == Direction::Sell && news_impact < 0.0);
    let against_news = (signal == Direction::Buy && news_impact < 0.0)
        || (signal == Direction::Sell && news_impact > 0.0);
    let news_correction = if with_news {
        (news_impact.abs() * 10.0).min(10.0)
    } else if against_news {
        -(news_impact.abs() * 10.0).min(15.0)
    } else {
        0.0
    };

    let higher = [Timeframe::D1, Timeframe::H4]
        .iter()
        .find_map(|tf| timeframes.iter().find(|t| t.timeframe == *tf));
    let trend_correction = match higher.and_then(|t| t.price_action()) {
        Some(pa) => {
            let (trend, ts) = (pa.trend.trend, pa.trend.strength);
            let aligned = (signal == Direction::Buy && trend == Trend::Bullish)
                || (signal == Direction::Sell && trend == Trend::Bearish);
            let opposed = (signal == Direction::Buy && trend == Trend::Bearish)
                || (signal == Direction::Sell && trend == Trend::Bullish);
            if aligned {
                (ts * 0.15).min(15.0)
            } else if opposed {
                -(ts * 0.2).min(20.0)
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    (strength + confirmation_bonus + news_correction + trend_correction).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ict::IctDetails;
    use crate::indicators::test_support::bars_from;

    fn report(signal: Direction, strength: f64, pattern: &str) -> StrategyReport {
        StrategyReport {
            signal,
            strength,
            patterns: vec![pattern.to_string()],
            support_levels: vec![1.0950],
            resistance_levels: vec![1.1050],
            details: StrategyDetails::Ict(IctDetails::default()),
        }
    }

    fn frame(tf: Timeframe, signal: Direction) -> TimeframeAnalysis {
        let reports = [
            ("ICT", report(signal, 60.0, "a")),
            ("SMC", report(signal, 60.0, "b")),
            ("PA", report(Direction::Neutral, 30.0, "c")),
        ];
        TimeframeAnalysis {
            timeframe: tf,
            data_points: 100,
            last_close: 1.1,
            reports: BTreeMap::new(),
            summary: create_timeframe_summary(&reports),
        }
    }

    #[test]
    fn test_timeframe_vote() {
        let summary = frame(Timeframe::H1, Direction::Buy).summary;
        assert_eq!(summary.signal, Direction::Buy);
        assert_eq!(summary.confidence, Confidence::Medium);
        assert!((summary.strength - 50.0).abs() < 1e-9);
        assert_eq!(summary.key_patterns, vec!["ICT: a", "SMC: b", "PA: c"]);
        assert_eq!(summary.support_levels, vec![1.0950]);
    }

    #[test]
    fn test_weighted_summary_normalizes_present_timeframes() {
        let frames = vec![frame(Timeframe::H1, Direction::Buy), frame(Timeframe::H4, Direction::Sell)];
        let summary = create_summary(&frames, None);
        // H1 0.2 vs H4 0.3 normalized to 0.4 / 0.6
        assert_eq!(summary.signal, Direction::Sell);
        assert!((summary.strength - 60.0).abs() < 1e-9);
        assert_eq!(summary.confidence, Confidence::Medium);
        assert_eq!(summary.nearest_support, Some(1.0950));
        assert_eq!(summary.nearest_resistance, Some(1.1050));
        assert_eq!(summary.key_timeframes, vec![Timeframe::H1, Timeframe::H4]);
        // 60 + one confirmation
        assert!((summary.success_probability - 65.0).abs() < 1e-9);
    }

    #[test]
    fn test_news_moves_probability() {
        let frames = vec![frame(Timeframe::D1, Direction::Buy)];
        let mut news = NewsAnalysis::default();
        news.impact = -40.0;
        let summary = create_summary(&frames, Some(&news));
        // 1.0 buy vs 0.1 sell
        assert_eq!(summary.signal, Direction::Buy);
        assert!((summary.strength - 100.0).abs() < 1e-9);
        // 100 + 5 - 15 penalty
        assert!((summary.success_probability - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_engine_runs_all_timeframes() {
        let mut frames = BTreeMap::new();
        frames.insert(Timeframe::H1, bars_from(250, 0.0005, |i| 1.1 + (i as f64 * 0.1).sin() * 0.01));
        frames.insert(Timeframe::H4, bars_from(250, 0.0005, |i| 1.1 + (i as f64 * 0.05).sin() * 0.02));
        frames.insert(Timeframe::D1, Vec::new());
        let analysis = AnalysisEngine::new().analyze("EURUSD", &frames, None, 0);
        assert_eq!(analysis.timeframes.len(), 2);
        assert_eq!(analysis.timeframes[0].timeframe, Timeframe::H1);
        assert_eq!(analysis.timeframes[0].reports.len(), 3);
        assert!(analysis.timeframe(Timeframe::H4).unwrap().price_action().is_some());
        assert!(analysis.summary.current_price.is_some());
        assert!((0.0..=100.0).contains(&analysis.summary.success_probability));
    }
}
