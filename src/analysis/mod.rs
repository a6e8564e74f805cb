// src/analysis/mod.rs

//! Rule-based market analysis.
//!
//! Three price-structure strategies (ICT, SMC, price action) score each timeframe,
//! the news analyzer scores the calendar, and the [`engine::AnalysisEngine`]
//! combines them into one multi-timeframe view per symbol.

pub mod engine;
pub mod ict;
pub mod news;
pub mod price_action;
pub mod smc;

pub use engine::{AnalysisEngine, OverallSummary, SymbolAnalysis, TimeframeSummary};
pub use ict::IctStrategy;
pub use news::{NewsAnalysis, NewsAnalyzer};
pub use price_action::PriceActionStrategy;
pub use smc::SmcStrategy;

use crate::models::{Bar, Direction};
use serde::Serialize;

/// Relative distance under which two levels are merged.
pub const LEVEL_MERGE_THRESHOLD: f64 = 0.0005;

// =============================================================================
// Shared Result Types
// =============================================================================

/// A price band with a relative strength (order blocks, gaps, zones).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Zone {
    pub top: f64,
    pub bottom: f64,
    /// Bar index the zone was formed at.
    pub index: usize,
    pub strength: f64,
}

impl Zone {
    pub fn contains(&self, price: f64) -> bool {
        self.bottom <= price && price <= self.top
    }

    pub fn overlaps(&self, other: &Zone) -> bool {
        self.bottom <= other.top && self.top >= other.bottom
    }
}

/// Strategy-specific findings, kept for display and for downstream consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyDetails {
    Ict(ict::IctDetails),
    Smc(smc::SmcDetails),
    PriceAction(price_action::PriceActionDetails),
}

/// Output of one strategy on one timeframe.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyReport {
    pub signal: Direction,
    /// 0..100
    pub strength: f64,
    pub patterns: Vec<String>,
    pub support_levels: Vec<f64>,
    pub resistance_levels: Vec<f64>,
    pub details: StrategyDetails,
}

/// A price-structure strategy evaluated on a single bar series.
pub trait TechnicalStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Short label used to prefix pattern names in summaries.
    fn prefix(&self) -> &'static str;

    fn analyze(&self, bars: &[Bar]) -> Result<StrategyReport, String>;
}

// =============================================================================
// Helpers
// =============================================================================

/// Turns accumulated buy/sell scores into a signal. The winning side needs a lead
/// greater than `margin`; strength is `score * 10` capped at 100.
pub(crate) fn decide(buy_score: f64, sell_score: f64, margin: f64) -> (Direction, f64) {
    if buy_score > sell_score + margin {
        (Direction::Buy, (buy_score * 10.0).min(100.0))
    } else if sell_score > buy_score + margin {
        (Direction::Sell, (sell_score * 10.0).min(100.0))
    } else {
        (Direction::Neutral, 0.0)
    }
}

/// Adds 2 to the matching side for every pattern naming a direction.
pub(crate) fn score_named_patterns(patterns: &[String], buy: &mut f64, sell: &mut f64) {
    for pattern in patterns {
        if pattern.contains("Bullish") {
            *buy += 2.0;
        } else if pattern.contains("Bearish") {
            *sell += 2.0;
        }
    }
}

/// Appends a pattern once.
pub(crate) fn push_unique(patterns: &mut Vec<String>, pattern: &str) {
    if !patterns.iter().any(|p| p == pattern) {
        patterns.push(pattern.to_string());
    }
}

/// Sorts by strength (descending) and keeps the first `n`.
pub(crate) fn strongest<T, F: Fn(&T) -> f64>(mut items: Vec<T>, n: usize, strength: F) -> Vec<T> {
    items.sort_by(|a, b| strength(b).total_cmp(&strength(a)));
    items.truncate(n);
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_requires_margin() {
        assert_eq!(decide(5.0, 2.0, 2.0), (Direction::Buy, 50.0));
        assert_eq!(decide(4.0, 2.0, 2.0), (Direction::Neutral, 0.0));
        assert_eq!(decide(0.0, 15.0, 2.0), (Direction::Sell, 100.0));
    }

    #[test]
    fn test_strongest_keeps_top_n() {
        let kept = strongest(vec![1.0, 5.0, 3.0, 4.0], 2, |v| *v);
        assert_eq!(kept, vec![5.0, 4.0]);
    }

    #[test]
    fn test_zone_overlap() {
        let a = Zone { top: 1.2, bottom: 1.1, index: 0, strength: 1.0 };
        let b = Zone { top: 1.3, bottom: 1.2, index: 1, strength: 1.0 };
        let c = Zone { top: 1.0, bottom: 0.9, index: 2, strength: 1.0 };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.contains(1.15));
    }
}
