// src/indicators.rs
//
// Price math and technical indicators over bar slices.
// Series functions return one value per input element, NaN during warm-up.

use crate::models::{Bar, Direction};
use serde::{Deserialize, Serialize};

// =============================================================================
// Pip and Position Math
// =============================================================================

/// Pips per unit of price (100 for JPY quotes, else 10000).
pub fn pip_factor(symbol: &str) -> f64 {
    if symbol.to_uppercase().ends_with("JPY") {
        100.0
    } else {
        10_000.0
    }
}

/// Price distance of one pip, with metals quoted in 0.1 steps.
pub fn pip_size(symbol: &str) -> f64 {
    let upper = symbol.to_uppercase();
    if upper.contains("JPY") {
        0.01
    } else if upper.contains("XAU") {
        0.1
    } else {
        0.0001
    }
}

pub fn calculate_pips(symbol: &str, price_difference: f64) -> f64 {
    price_difference * pip_factor(symbol)
}

pub fn price_from_pips(symbol: &str, pips: f64, base_price: f64) -> f64 {
    base_price + pips / pip_factor(symbol)
}

/// Lot size risking `risk_percentage` of the balance over `stop_loss_pips`.
/// Floored to 0.01 lots, never below the 0.01 minimum.
pub fn lot_size(balance: f64, risk_percentage: f64, stop_loss_pips: f64, value_per_pip: f64) -> f64 {
    if balance <= 0.0 || risk_percentage <= 0.0 || stop_loss_pips <= 0.0 || value_per_pip <= 0.0 {
        return 0.01;
    }
    let risk_amount = balance * risk_percentage / 100.0;
    let lots = (risk_amount / (stop_loss_pips * value_per_pip) * 100.0).floor() / 100.0;
    lots.max(0.01)
}

/// Reward over risk. Infinite when the stop sits on the entry.
pub fn risk_reward_ratio(entry: f64, stop_loss: f64, take_profit: f64) -> f64 {
    let risk = (entry - stop_loss).abs();
    let reward = (take_profit - entry).abs();
    if risk == 0.0 {
        return f64::INFINITY;
    }
    reward / risk
}

// =============================================================================
// Series Helpers
// =============================================================================

pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

pub fn highs(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.high).collect()
}

pub fn lows(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.low).collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with `ddof` degrees of freedom removed.
pub fn std_dev(values: &[f64], ddof: usize) -> f64 {
    if values.len() <= ddof {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - ddof) as f64;
    var.sqrt()
}

/// Simple mean of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    Some(mean(&values[values.len() - period..]))
}

/// Trailing mean per position; NaN until `period` values are available.
/// Each window is summed on its own so equal windows give equal means.
pub fn rolling_mean(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    for i in (period.saturating_sub(1))..values.len() {
        out[i] = mean(&values[i + 1 - period..=i]);
    }
    out
}

fn rolling_extreme(values: &[f64], period: usize, pick: fn(f64, f64) -> f64) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    for i in (period - 1)..values.len() {
        out[i] = values[i + 1 - period..=i]
            .iter()
            .copied()
            .fold(values[i], pick);
    }
    out
}

pub fn rolling_max(values: &[f64], period: usize) -> Vec<f64> {
    rolling_extreme(values, period, f64::max)
}

pub fn rolling_min(values: &[f64], period: usize) -> Vec<f64> {
    rolling_extreme(values, period, f64::min)
}

/// Exponential moving average, seeded with the first value (no bias adjustment).
pub fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let alpha = 2.0 / (span as f64 + 1.0);
    for (i, v) in values.iter().enumerate() {
        if i == 0 {
            out.push(*v);
        } else {
            let prev = out[i - 1];
            out.push(alpha * v + (1.0 - alpha) * prev);
        }
    }
    out
}

/// Least-squares slope of `values` against their index.
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

// =============================================================================
// Volatility
// =============================================================================

/// True range per bar. The first bar has no previous close and uses high - low.
pub fn true_ranges(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, b)| {
            let hl = b.high - b.low;
            if i == 0 {
                hl
            } else {
                let pc = bars[i - 1].close;
                hl.max((b.high - pc).abs()).max((b.low - pc).abs())
            }
        })
        .collect()
}

/// Simple-mean ATR of the last `period` bars; 0 when there are fewer bars.
pub fn atr(bars: &[Bar], period: usize) -> f64 {
    if period == 0 || bars.len() < period {
        return 0.0;
    }
    let tr = true_ranges(bars);
    mean(&tr[tr.len() - period..])
}

/// Mean high-low range over all bars.
pub fn average_range(bars: &[Bar]) -> f64 {
    if bars.is_empty() {
        return 0.0;
    }
    bars.iter().map(|b| b.range()).sum::<f64>() / bars.len() as f64
}

// =============================================================================
// Oscillators
// =============================================================================

/// RSI with simple-mean gains and losses. Undefined (NaN) over a flat window.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    if closes.len() < period + 1 || period == 0 {
        return out;
    }
    let mut gains = vec![0.0; closes.len()];
    let mut losses = vec![0.0; closes.len()];
    for i in 1..closes.len() {
        let d = closes[i] - closes[i - 1];
        if d > 0.0 {
            gains[i] = d;
        } else {
            losses[i] = -d;
        }
    }
    for i in period..closes.len() {
        let g = mean(&gains[i + 1 - period..=i]);
        let l = mean(&losses[i + 1 - period..=i]);
        out[i] = if l == 0.0 && g == 0.0 {
            f64::NAN
        } else if l == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + g / l)
        };
    }
    out
}

/// Latest RSI; 50 when history is too short.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    rsi_series(closes, period)
        .last()
        .copied()
        .filter(|v| !v.is_nan())
        .unwrap_or(50.0)
}

/// Stochastic %K and %D series.
pub fn stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> (Vec<f64>, Vec<f64>) {
    let low_n = rolling_min(&lows(bars), k_period);
    let high_n = rolling_max(&highs(bars), k_period);
    let k: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let span = high_n[i] - low_n[i];
            if span.is_nan() || span == 0.0 {
                f64::NAN
            } else {
                100.0 * (b.close - low_n[i]) / span
            }
        })
        .collect();
    let d = rolling_mean_skip_nan(&k, d_period);
    (k, d)
}

fn rolling_mean_skip_nan(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        if window.iter().all(|v| !v.is_nan()) {
            out[i] = mean(window);
        }
    }
    out
}

/// Commodity Channel Index using the rolling mean of absolute deviations.
pub fn cci_series(bars: &[Bar], period: usize) -> Vec<f64> {
    let tp: Vec<f64> = bars.iter().map(|b| (b.high + b.low + b.close) / 3.0).collect();
    let tp_sma = rolling_mean(&tp, period);
    let abs_dev: Vec<f64> = tp.iter().zip(&tp_sma).map(|(t, s)| (t - s).abs()).collect();
    let mean_dev = rolling_mean_skip_nan(&abs_dev, period);
    tp.iter()
        .enumerate()
        .map(|(i, t)| {
            let md = mean_dev[i];
            if md.is_nan() || md == 0.0 {
                f64::NAN
            } else {
                (t - tp_sma[i]) / (0.015 * md)
            }
        })
        .collect()
}

/// MACD line, signal line and histogram.
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let sig = ema_series(&line, signal);
    let hist = line.iter().zip(&sig).map(|(m, s)| m - s).collect();
    Macd {
        macd: line,
        signal: sig,
        histogram: hist,
    }
}

/// Bollinger bands of the last `period` closes (sample std).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<Bands> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let middle = mean(window);
    let sd = std_dev(window, 1);
    Some(Bands {
        upper: middle + k * sd,
        middle,
        lower: middle - k * sd,
    })
}

// =============================================================================
// Simple Signals
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
}

/// Regression slope over the last `period` closes, with a ±0.0001 dead band.
pub fn detect_trend(bars: &[Bar], period: usize) -> Trend {
    if bars.len() < period || period < 2 {
        return Trend::Sideways;
    }
    let closes = closes(&bars[bars.len() - period..]);
    let slope = linear_slope(&closes);
    if slope > 0.0001 {
        Trend::Bullish
    } else if slope < -0.0001 {
        Trend::Bearish
    } else {
        Trend::Sideways
    }
}

/// Fast/slow SMA cross on the last bar.
pub fn ma_crossover(closes: &[f64], fast: usize, slow: usize) -> Direction {
    if closes.len() < slow + 2 {
        return Direction::Neutral;
    }
    let f = rolling_mean(closes, fast);
    let s = rolling_mean(closes, slow);
    let n = closes.len();
    if f[n - 2] <= s[n - 2] && f[n - 1] > s[n - 1] {
        Direction::Buy
    } else if f[n - 2] >= s[n - 2] && f[n - 1] < s[n - 1] {
        Direction::Sell
    } else {
        Direction::Neutral
    }
}

/// Close outside the bands fades back toward the middle.
pub fn bollinger_signal(closes: &[f64], period: usize, k: f64) -> Direction {
    match (bollinger(closes, period, k), closes.last()) {
        (Some(b), Some(&c)) if c > b.upper => Direction::Sell,
        (Some(b), Some(&c)) if c < b.lower => Direction::Buy,
        _ => Direction::Neutral,
    }
}

/// MACD line crossing its signal line on the last bar.
pub fn macd_signal(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Direction {
    if closes.len() < slow + signal {
        return Direction::Neutral;
    }
    let m = macd(closes, fast, slow, signal);
    let n = closes.len();
    if m.macd[n - 2] <= m.signal[n - 2] && m.macd[n - 1] > m.signal[n - 1] {
        Direction::Buy
    } else if m.macd[n - 2] >= m.signal[n - 2] && m.macd[n - 1] < m.signal[n - 1] {
        Direction::Sell
    } else {
        Direction::Neutral
    }
}

// =============================================================================
// Candles and Levels
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandlePattern {
    pub index: usize,
    pub name: String,
    pub direction: Trend,
    pub strong: bool,
}

/// Classic single and two-candle patterns over the last `window` bars.
/// Needs at least 20 bars of context.
pub fn candle_patterns(bars: &[Bar], window: usize) -> Vec<CandlePattern> {
    let mut patterns = Vec::new();
    if bars.len() < 20 {
        return patterns;
    }
    let start = bars.len().saturating_sub(window);
    for idx in start..bars.len() {
        let bar = &bars[idx];
        let body = bar.body();
        let upper = bar.upper_shadow();
        let lower = bar.lower_shadow();
        let bullish = bar.is_bullish();
        let mut push = |name: &str, direction: Trend, strong: bool| {
            patterns.push(CandlePattern {
                index: idx,
                name: name.to_string(),
                direction,
                strong,
            })
        };

        if body < 0.1 * bar.range() {
            push("Doji", Trend::Sideways, false);
            continue;
        }
        if lower > 2.0 * body && upper < 0.3 * body {
            if bullish {
                push("Hammer", Trend::Bullish, true);
            } else {
                push("Hanging Man", Trend::Bearish, true);
            }
            continue;
        }
        if idx > 0 {
            let prev = &bars[idx - 1];
            if bullish && !prev.is_bullish() {
                if bar.open <= prev.close && bar.close >= prev.open && body > prev.body() {
                    push("Bullish Engulfing", Trend::Bullish, true);
                    continue;
                }
            } else if !bullish && prev.is_bullish()
                && bar.open >= prev.close
                && bar.close <= prev.open
                && body > prev.body()
            {
                push("Bearish Engulfing", Trend::Bearish, true);
                continue;
            }
        }
        if upper > 2.0 * body && lower < 0.3 * body {
            if bullish {
                push("Inverted Hammer", Trend::Bullish, false);
            } else {
                push("Shooting Star", Trend::Bearish, true);
            }
        }
    }
    patterns
}

/// Collapses levels closer than `threshold` (relative) into their midpoint.
/// Output is sorted ascending.
pub fn merge_levels(levels: &[f64], threshold: f64) -> Vec<f64> {
    let mut sorted: Vec<f64> = levels.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return sorted;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut merged = vec![sorted[0]];
    for level in sorted.into_iter().skip(1) {
        let last = merged.len() - 1;
        let base = merged[last];
        if base != 0.0 && (level - base).abs() / base.abs() <= threshold {
            merged[last] = (base + level) / 2.0;
        } else {
            merged.push(level);
        }
    }
    merged
}

/// Local extremes dominating `window` bars on each side.
pub fn find_support_resistance(bars: &[Bar], window: usize, threshold: f64) -> (Vec<f64>, Vec<f64>) {
    let mut support = Vec::new();
    let mut resistance = Vec::new();
    if bars.len() < 20 || bars.len() <= 2 * window {
        return (support, resistance);
    }
    for i in window..bars.len() - window {
        let around = (1..=window).flat_map(|j| [i - j, i + j]);
        if around.clone().all(|k| bars[i].low <= bars[k].low) {
            support.push(bars[i].low);
        }
        if around.clone().all(|k| bars[i].high >= bars[k].high) {
            resistance.push(bars[i].high);
        }
    }
    (merge_levels(&support, threshold), merge_levels(&resistance, threshold))
}

/// High strictly above the two bars on each side.
pub fn is_swing_high(bars: &[Bar], i: usize) -> bool {
    if i < 2 || i + 2 >= bars.len() {
        return false;
    }
    let h = bars[i].high;
    h > bars[i - 1].high && h > bars[i - 2].high && h > bars[i + 1].high && h > bars[i + 2].high
}

/// Low strictly below the two bars on each side.
pub fn is_swing_low(bars: &[Bar], i: usize) -> bool {
    if i < 2 || i + 2 >= bars.len() {
        return false;
    }
    let l = bars[i].low;
    l < bars[i - 1].low && l < bars[i - 2].low && l < bars[i + 1].low && l < bars[i + 2].low
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::Bar;

    /// Deterministic bars following `f(i)` as the close, with a fixed wick size.
    pub fn bars_from<F: Fn(usize) -> f64>(n: usize, wick: f64, f: F) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = f(i);
                let open = if i == 0 { close } else { f(i - 1) };
                Bar::new(
                    i as i64 * 3600,
                    open,
                    open.max(close) + wick,
                    open.min(close) - wick,
                    close,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::bars_from;
    use super::*;

    #[test]
    fn test_pip_math() {
        assert_eq!(calculate_pips("EURUSD", 0.0050).round(), 50.0);
        assert_eq!(calculate_pips("USDJPY", 0.50).round(), 50.0);
        assert!((price_from_pips("EURUSD", 20.0, 1.1000) - 1.1020).abs() < 1e-9);
        assert_eq!(pip_size("XAUUSD"), 0.1);
        assert_eq!(pip_size("GBPJPY"), 0.01);
    }

    #[test]
    fn test_lot_size_floors_and_minimum() {
        // 10k * 1% = 100 risk over 50 pips at $10/pip = 0.2 lots
        assert!((lot_size(10_000.0, 1.0, 50.0, 10.0) - 0.2).abs() < 1e-9);
        assert_eq!(lot_size(100.0, 1.0, 500.0, 10.0), 0.01);
        assert_eq!(lot_size(10_000.0, 1.0, 0.0, 10.0), 0.01);
    }

    #[test]
    fn test_risk_reward() {
        assert!((risk_reward_ratio(1.1000, 1.0950, 1.1100) - 2.0).abs() < 1e-9);
        assert!(risk_reward_ratio(1.1, 1.1, 1.2).is_infinite());
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..30).map(|i| 1.0 + i as f64 * 0.01).collect();
        assert_eq!(rsi(&rising, 14), 100.0);
        assert_eq!(rsi(&rising[..5], 14), 50.0);
        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        assert!(rsi(&falling, 14) < 1e-9);
    }

    #[test]
    fn test_ema_seeds_with_first_value() {
        let e = ema_series(&[1.0, 2.0, 3.0], 3);
        assert_eq!(e[0], 1.0);
        assert!((e[1] - 1.5).abs() < 1e-12);
        assert!((e[2] - 2.25).abs() < 1e-12);
    }

    #[test]
    fn test_atr_constant_range() {
        let bars = bars_from(30, 0.001, |_| 1.1);
        assert!((atr(&bars, 14) - 0.002).abs() < 1e-12);
        assert_eq!(atr(&bars[..5], 14), 0.0);
    }

    #[test]
    fn test_detect_trend() {
        let up = bars_from(40, 0.0005, |i| 1.0 + i as f64 * 0.001);
        assert_eq!(detect_trend(&up, 20), Trend::Bullish);
        let flat = bars_from(40, 0.0005, |_| 1.0);
        assert_eq!(detect_trend(&flat, 20), Trend::Sideways);
    }

    #[test]
    fn test_merge_levels() {
        let merged = merge_levels(&[1.1002, 1.1000, 1.2000], 0.0005);
        assert_eq!(merged.len(), 2);
        assert!((merged[0] - 1.1001).abs() < 1e-9);
        assert_eq!(merged[1], 1.2);
        assert!(merge_levels(&[], 0.0005).is_empty());
    }

    #[test]
    fn test_linear_slope() {
        assert!((linear_slope(&[1.0, 3.0, 5.0, 7.0]) - 2.0).abs() < 1e-12);
        assert_eq!(linear_slope(&[4.0]), 0.0);
    }

    #[test]
    fn test_doji_detected() {
        let mut bars = bars_from(25, 0.001, |i| 1.0 + i as f64 * 0.001);
        let last = bars.len() - 1;
        bars[last] = Bar::new(0, 1.05, 1.06, 1.04, 1.0501);
        let patterns = candle_patterns(&bars, 1);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].name, "Doji");
    }

    #[test]
    fn test_bollinger_signal_fades_breakout() {
        let mut closes = vec![1.0; 19];
        closes.push(1.5);
        assert_eq!(bollinger_signal(&closes, 20, 2.0), Direction::Sell);
    }

    #[test]
    fn test_swing_detection() {
        let highs = [1.0, 1.1, 1.2, 1.3, 1.5, 1.3, 1.2, 1.1, 1.0];
        let bars: Vec<Bar> = highs
            .iter()
            .enumerate()
            .map(|(i, h)| Bar::new(i as i64, h - 0.05, *h, h - 0.1, h - 0.05))
            .collect();
        assert!(is_swing_high(&bars, 4));
        assert!(!is_swing_high(&bars, 3));
        assert!(!is_swing_low(&bars, 4));
    }
}
