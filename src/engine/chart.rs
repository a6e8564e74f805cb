// src/engine/chart.rs
//
// Candlestick data for the dashboard chart: the latest bars of one timeframe
// with two moving averages and the analysed support/resistance levels.

use crate::analysis::engine::TimeframeAnalysis;
use crate::indicators::{closes, ema_series, rolling_mean};
use crate::models::{Bar, Timeframe};
use serde::Serialize;

/// Candles kept per chart.
pub const CHART_BARS: usize = 120;
const FAST_EMA: usize = 20;
const SLOW_SMA: usize = 50;
/// Levels further than this share of the visible range outside it are dropped.
const LEVEL_MARGIN: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub name: String,
    /// One value per candle; None during warm-up.
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub indicators: Vec<ChartSeries>,
    pub support: Vec<f64>,
    pub resistance: Vec<f64>,
}

/// Timeframe a scan is stepped and charted on: the shortest one of at least
/// H1, else the longest configured.
pub fn step_timeframe(timeframes: &[Timeframe]) -> Timeframe {
    timeframes
        .iter()
        .copied()
        .filter(|tf| *tf >= Timeframe::H1)
        .min()
        .or_else(|| timeframes.iter().copied().max())
        .unwrap_or(Timeframe::H1)
}

pub fn build_chart(
    symbol: &str,
    timeframe: Timeframe,
    bars: &[Bar],
    analysis: Option<&TimeframeAnalysis>,
) -> Option<ChartData> {
    if bars.is_empty() {
        return None;
    }
    let start = bars.len().saturating_sub(CHART_BARS);
    let visible = &bars[start..];

    // Averages run over the full history so the visible window starts warm.
    let close = closes(bars);
    let series = |name: String, values: Vec<f64>| ChartSeries {
        name,
        values: values[start..].iter().map(|v| v.is_finite().then_some(*v)).collect(),
    };
    let indicators = vec![
        series(format!("EMA {}", FAST_EMA), ema_series(&close, FAST_EMA)),
        series(format!("SMA {}", SLOW_SMA), rolling_mean(&close, SLOW_SMA)),
    ];

    let high = visible.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = visible.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let margin = (high - low) * LEVEL_MARGIN;
    let in_view = |levels: &[f64]| -> Vec<f64> {
        levels
            .iter()
            .copied()
            .filter(|l| *l >= low - margin && *l <= high + margin)
            .collect()
    };
    let (support, resistance) = match analysis {
        Some(a) => (in_view(&a.summary.support_levels), in_view(&a.summary.resistance_levels)),
        None => (Vec::new(), Vec::new()),
    };

    Some(ChartData {
        symbol: symbol.to_string(),
        timeframe,
        candles: visible
            .iter()
            .map(|b| Candle {
                time: b.time,
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
            })
            .collect(),
        indicators,
        support,
        resistance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 1.1 + (i as f64 * 0.2).sin() * 0.003;
                Bar::new(3600 * i as i64, c, c + 0.001, c - 0.001, c)
            })
            .collect()
    }

    #[test]
    fn test_chart_keeps_latest_bars() {
        let chart = build_chart("EURUSD", Timeframe::H1, &bars(200), None).unwrap();
        assert_eq!(chart.candles.len(), CHART_BARS);
        assert_eq!(chart.candles[0].time, 3600 * 80);
        assert_eq!(chart.indicators.len(), 2);
        for series in &chart.indicators {
            assert_eq!(series.values.len(), CHART_BARS);
            assert!(series.values.iter().all(|v| v.is_some()));
        }
        assert!(chart.support.is_empty());
    }

    #[test]
    fn test_short_history_has_warmup_gaps() {
        let chart = build_chart("EURUSD", Timeframe::H1, &bars(60), None).unwrap();
        assert_eq!(chart.candles.len(), 60);
        let sma = &chart.indicators[1];
        assert_eq!(sma.values[SLOW_SMA - 2], None);
        assert!(sma.values[SLOW_SMA - 1].is_some());
        assert!(build_chart("EURUSD", Timeframe::H1, &[], None).is_none());
    }

    #[test]
    fn test_step_timeframe() {
        assert_eq!(step_timeframe(&[Timeframe::M5, Timeframe::H1, Timeframe::H4]), Timeframe::H1);
        assert_eq!(step_timeframe(&[Timeframe::M5, Timeframe::M15]), Timeframe::M15);
        assert_eq!(step_timeframe(&[]), Timeframe::H1);
    }
}
