// src/analysis/price_action.rs
//
// Classic price action: moving-average trend, candlestick patterns, support and
// resistance, pivot points, momentum oscillators and chart patterns.

use super::{push_unique, StrategyDetails, StrategyReport, TechnicalStrategy, LEVEL_MERGE_THRESHOLD};
use crate::indicators::{
    atr, cci_series, closes, highs, linear_slope, lows, merge_levels, rolling_max, rolling_mean,
    rolling_min, rsi_series, stochastic, Trend,
};
use crate::models::{Bar, Direction};
use serde::Serialize;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Slope {
    Up,
    Down,
    #[default]
    Flat,
}

impl Slope {
    fn of(delta: f64) -> Self {
        if delta > 0.0 {
            Slope::Up
        } else if delta < 0.0 {
            Slope::Down
        } else {
            Slope::Flat
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaCross {
    GoldenCross,
    DeathCross,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendAnalysis {
    pub trend: Trend,
    /// 0..100
    pub strength: f64,
    pub ma20: Slope,
    pub ma50: Slope,
    pub ma200: Slope,
    pub higher_highs: bool,
    pub higher_lows: bool,
    pub lower_highs: bool,
    pub lower_lows: bool,
    pub crossover: Option<MaCross>,
}

impl Default for TrendAnalysis {
    fn default() -> Self {
        Self {
            trend: Trend::Sideways,
            strength: 0.0,
            ma20: Slope::Flat,
            ma50: Slope::Flat,
            ma200: Slope::Flat,
            higher_highs: false,
            higher_lows: false,
            lower_highs: false,
            lower_lows: false,
            crossover: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandleSignal {
    pub index: usize,
    pub pattern: String,
    /// Sideways marks indecision.
    pub signal: Trend,
    pub strength: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PivotSet {
    pub pp: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CamarillaSet {
    pub pp: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
    pub s4: f64,
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
    pub r4: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Pivots {
    pub classic: PivotSet,
    pub fibonacci: PivotSet,
    pub woodie: PivotSet,
    pub camarilla: CamarillaSet,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MomentumSignal {
    pub indicator: &'static str,
    pub value: f64,
    pub signal: Direction,
    pub strength: f64,
}

/// Latest oscillator readings; None when undefined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Momentum {
    pub rsi: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub cci: Option<f64>,
    pub signals: Vec<MomentumSignal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceActionDetails {
    pub last_price: f64,
    /// 14-bar average true range.
    pub atr: f64,
    pub trend: TrendAnalysis,
    pub candle_patterns: Vec<CandleSignal>,
    pub pivots: Pivots,
    pub momentum: Momentum,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PriceActionStrategy;

impl TechnicalStrategy for PriceActionStrategy {
    fn name(&self) -> &'static str {
        "price_action"
    }

    fn prefix(&self) -> &'static str {
        "PA"
    }

    fn analyze(&self, bars: &[Bar]) -> Result<StrategyReport, String> {
        let last_price = bars
            .last()
            .map(|b| b.close)
            .ok_or_else(|| "Price action analysis needs at least one bar".to_string())?;

        let trend = analyze_trend(bars);
        let candle_patterns = identify_candle_patterns(bars);
        let (support, resistance) = find_support_resistance(bars);
        let pivots = calculate_pivots(bars);
        let momentum = calculate_momentum(bars);
        let patterns = identify_price_patterns(bars, &support, &resistance, trend.trend);

        let details = PriceActionDetails {
            last_price,
            atr: atr(bars, 14),
            trend,
            candle_patterns,
            pivots,
            momentum,
        };
        let (signal, strength) = score(&details, &patterns);

        Ok(StrategyReport {
            signal,
            strength,
            patterns,
            support_levels: support,
            resistance_levels: resistance,
            details: StrategyDetails::PriceAction(details),
        })
    }
}

// =============================================================================
// Trend
// =============================================================================

/// Recent 5-bar extremes sampled every 5 bars going back, up to 3 of them.
fn sampled_extremes(values: &[f64], rolling: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut found = Vec::new();
    for i in (5..n.saturating_sub(5)).step_by(5) {
        let idx = n - i;
        if rolling[idx] == values[idx] {
            found.push(values[idx]);
            if found.len() >= 3 {
                break;
            }
        }
    }
    found
}

pub fn analyze_trend(bars: &[Bar]) -> TrendAnalysis {
    let mut result = TrendAnalysis::default();
    let n = bars.len();
    if n < 200 {
        return result;
    }

    let c = closes(bars);
    let ma20 = rolling_mean(&c, 20);
    let ma50 = rolling_mean(&c, 50);
    let ma200 = rolling_mean(&c, 200);
    let last = n - 1;

    result.ma20 = Slope::of(ma20[last] - ma20[n - 10]);
    result.ma50 = Slope::of(ma50[last] - ma50[n - 10]);
    result.ma200 = Slope::of(ma200[last] - ma200[n - 10]);

    if ma20[last - 1] <= ma50[last - 1] && ma20[last] > ma50[last] {
        result.crossover = Some(MaCross::GoldenCross);
    } else if ma20[last - 1] >= ma50[last - 1] && ma20[last] < ma50[last] {
        result.crossover = Some(MaCross::DeathCross);
    }

    let h = highs(bars);
    let l = lows(bars);
    let swing_highs = sampled_extremes(&h, &rolling_max(&h, 5));
    let swing_lows = sampled_extremes(&l, &rolling_min(&l, 5));
    if swing_highs.len() >= 2 {
        let (first, oldest) = (swing_highs[0], swing_highs[swing_highs.len() - 1]);
        result.higher_highs = first > oldest;
        result.lower_highs = first < oldest;
    }
    if swing_lows.len() >= 2 {
        let (first, oldest) = (swing_lows[0], swing_lows[swing_lows.len() - 1]);
        result.higher_lows = first > oldest;
        result.lower_lows = first < oldest;
    }

    let close = c[last];
    let (m20, m50, m200) = (ma20[last], ma50[last], ma200[last]);
    let (trend, strength) = if close > m20 && m20 > m50 && result.higher_highs && result.higher_lows
    {
        (Trend::Bullish, 80.0)
    } else if close > m20 && result.ma20 == Slope::Up {
        (Trend::Bullish, 60.0)
    } else if result.ma20 == Slope::Up && result.higher_lows {
        (Trend::Bullish, 40.0)
    } else if close < m20 && m20 < m50 && result.lower_highs && result.lower_lows {
        (Trend::Bearish, 80.0)
    } else if close < m20 && result.ma20 == Slope::Down {
        (Trend::Bearish, 60.0)
    } else if result.ma20 == Slope::Down && result.lower_highs {
        (Trend::Bearish, 40.0)
    } else {
        (Trend::Sideways, 20.0)
    };
    result.trend = trend;
    result.strength = strength;

    let aligned = match trend {
        Trend::Bullish => m20 > m50 && m50 > m200,
        Trend::Bearish => m20 < m50 && m50 < m200,
        Trend::Sideways => false,
    };
    if aligned {
        result.strength = (result.strength + 20.0).min(100.0);
    }

    result
}

// =============================================================================
// Candles
// =============================================================================

/// Single and two-candle patterns on the last 5 bars, strongest first.
pub fn identify_candle_patterns(bars: &[Bar]) -> Vec<CandleSignal> {
    let mut patterns = Vec::new();
    if bars.len() < 10 {
        return patterns;
    }

    for idx in bars.len() - 5..bars.len() {
        let cur = &bars[idx];
        let body = cur.body();
        let upper = cur.upper_shadow();
        let lower = cur.lower_shadow();
        let bullish = cur.is_bullish();
        let mut push = |pattern: &str, signal: Trend, strength: f64| {
            patterns.push(CandleSignal {
                index: idx,
                pattern: pattern.to_string(),
                signal,
                strength,
            })
        };

        if body < 0.1 * cur.range() {
            push("Doji", Trend::Sideways, 50.0);
        } else if lower > 2.0 * body && upper < 0.3 * body {
            if bullish {
                push("Hammer", Trend::Bullish, 70.0);
            } else {
                push("Hanging Man", Trend::Bearish, 70.0);
            }
        } else if upper > 2.0 * body && lower < 0.3 * body {
            if bullish {
                push("Inverted Hammer", Trend::Bullish, 60.0);
            } else {
                push("Shooting Star", Trend::Bearish, 70.0);
            }
        } else if body > 0.7 * cur.range() {
            if bullish {
                push("Bullish Marubozu", Trend::Bullish, 80.0);
            } else {
                push("Bearish Marubozu", Trend::Bearish, 80.0);
            }
        }

        let prev = &bars[idx - 1];
        let prev_body = prev.body();
        let prev_bullish = prev.is_bullish();
        let engulfing = body > prev_body
            && ((bullish && !prev_bullish && cur.open <= prev.close && cur.close >= prev.open)
                || (!bullish && prev_bullish && cur.open >= prev.close && cur.close <= prev.open));
        let harami = prev_body > body
            && ((bullish && !prev_bullish && cur.high <= prev.open && cur.low >= prev.close)
                || (!bullish && prev_bullish && cur.high <= prev.close && cur.low >= prev.open));
        if engulfing {
            if bullish {
                push("Bullish Engulfing", Trend::Bullish, 90.0);
            } else {
                push("Bearish Engulfing", Trend::Bearish, 90.0);
            }
        } else if harami {
            if bullish {
                push("Bullish Harami", Trend::Bullish, 60.0);
            } else {
                push("Bearish Harami", Trend::Bearish, 60.0);
            }
        }
    }

    patterns.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    patterns
}

// =============================================================================
// Levels
// =============================================================================

/// Histogram bins (100 over the high/low range) busier than the 90th percentile.
/// Returns (price, is_support).
pub fn find_price_clusters(bars: &[Bar]) -> Vec<(f64, bool)> {
    const BINS: usize = 100;
    let last_price = match bars.last() {
        Some(b) => b.close,
        None => return Vec::new(),
    };
    let prices: Vec<f64> = bars.iter().flat_map(|b| [b.high, b.low]).collect();
    let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max > min) {
        return Vec::new();
    }

    let width = (max - min) / BINS as f64;
    let mut hist = [0usize; BINS];
    for p in &prices {
        let bin = (((p - min) / width) as usize).min(BINS - 1);
        hist[bin] += 1;
    }

    let mut sorted = hist;
    sorted.sort_unstable();
    let rank = 0.9 * (BINS - 1) as f64;
    let lo = rank.floor() as usize;
    let frac = rank - lo as f64;
    let threshold = sorted[lo] as f64 + frac * (sorted[lo + 1] as f64 - sorted[lo] as f64);

    hist.iter()
        .enumerate()
        .filter(|(_, &count)| count as f64 > threshold)
        .map(|(i, _)| {
            let price = min + width * (i as f64 + 0.5);
            (price, price < last_price)
        })
        .collect()
}

/// Round-number levels ending in 00 or 50 at one digit below the price magnitude,
/// within 10% of the last price.
fn round_number_levels(last_price: f64) -> Vec<f64> {
    if last_price <= 0.0 {
        return Vec::new();
    }
    let base = 10f64.powi(last_price.log10().trunc() as i32 - 1);
    let range = 0.1 * last_price;
    let from = ((last_price - range) / base) as i64;
    let to = ((last_price + range) / base) as i64;
    (from..=to)
        .filter(|m| m % 50 == 0)
        .map(|m| m as f64 * base)
        .collect()
}

/// Returns (support, resistance): the 7 nearest of each, support descending and
/// resistance ascending. Needs at least 50 bars.
pub fn find_support_resistance(bars: &[Bar]) -> (Vec<f64>, Vec<f64>) {
    let mut support = Vec::new();
    let mut resistance = Vec::new();
    if bars.len() < 50 {
        return (support, resistance);
    }

    for i in 10..bars.len() - 10 {
        if (1..6).all(|j| bars[i].high > bars[i - j].high && bars[i].high > bars[i + j].high) {
            resistance.push(bars[i].high);
        }
        if (1..6).all(|j| bars[i].low < bars[i - j].low && bars[i].low < bars[i + j].low) {
            support.push(bars[i].low);
        }
    }

    for (price, is_support) in find_price_clusters(bars) {
        if is_support {
            support.push(price);
        } else {
            resistance.push(price);
        }
    }

    let last_price = bars[bars.len() - 1].close;
    for level in round_number_levels(last_price) {
        if level < last_price {
            support.push(level);
        } else {
            resistance.push(level);
        }
    }

    let mut support = merge_levels(&support, LEVEL_MERGE_THRESHOLD);
    support.reverse();
    support.truncate(7);
    let mut resistance = merge_levels(&resistance, LEVEL_MERGE_THRESHOLD);
    resistance.truncate(7);
    (support, resistance)
}

/// Pivot levels from the most recent bar.
pub fn calculate_pivots(bars: &[Bar]) -> Pivots {
    let bar = match bars.last() {
        Some(b) => b,
        None => return Pivots::default(),
    };
    let (high, low, close) = (bar.high, bar.low, bar.close);
    let range = high - low;
    let pp = (high + low + close) / 3.0;

    let classic = PivotSet {
        pp,
        s1: 2.0 * pp - high,
        s2: pp - range,
        s3: low - 2.0 * (high - pp),
        r1: 2.0 * pp - low,
        r2: pp + range,
        r3: high + 2.0 * (pp - low),
    };
    let fibonacci = PivotSet {
        pp,
        s1: pp - 0.382 * range,
        s2: pp - 0.618 * range,
        s3: pp - range,
        r1: pp + 0.382 * range,
        r2: pp + 0.618 * range,
        r3: pp + range,
    };
    let wp = (high + low + 2.0 * close) / 4.0;
    let woodie = PivotSet {
        pp: wp,
        s1: 2.0 * wp - high,
        s2: wp - range,
        s3: classic.s1 - range,
        r1: 2.0 * wp - low,
        r2: wp + range,
        r3: classic.r1 + range,
    };
    let cm = range * 1.1;
    let camarilla = CamarillaSet {
        pp,
        s1: close - cm / 12.0,
        s2: close - cm / 6.0,
        s3: close - cm / 4.0,
        s4: close - cm / 2.0,
        r1: close + cm / 12.0,
        r2: close + cm / 6.0,
        r3: close + cm / 4.0,
        r4: close + cm / 2.0,
    };

    Pivots {
        classic,
        fibonacci,
        woodie,
        camarilla,
    }
}

// =============================================================================
// Momentum
// =============================================================================

fn defined(v: f64) -> Option<f64> {
    if v.is_nan() {
        None
    } else {
        Some(v)
    }
}

/// RSI(14), Stochastic(14, 3) and CCI(20) with overbought/oversold signals.
pub fn calculate_momentum(bars: &[Bar]) -> Momentum {
    let mut result = Momentum {
        rsi: None,
        stoch_k: None,
        stoch_d: None,
        cci: None,
        signals: Vec::new(),
    };
    let n = bars.len();
    if n < 20 {
        return result;
    }

    let rsi = rsi_series(&closes(bars), 14)[n - 1];
    let (k, d) = stochastic(bars, 14, 3);
    let cci = cci_series(bars, 20)[n - 1];
    let (k_last, d_last) = (k[n - 1], d[n - 1]);

    let mut signal = |indicator: &'static str, value: f64, dir: Direction, strength: f64| {
        result.signals.push(MomentumSignal {
            indicator,
            value,
            signal: dir,
            strength,
        })
    };

    if rsi < 30.0 {
        signal("RSI", rsi, Direction::Buy, 70.0);
    } else if rsi > 70.0 {
        signal("RSI", rsi, Direction::Sell, 70.0);
    }

    if k_last < 20.0 && d_last < 20.0 {
        signal("Stochastic", k_last, Direction::Buy, 60.0);
    } else if k_last > 80.0 && d_last > 80.0 {
        signal("Stochastic", k_last, Direction::Sell, 60.0);
    }

    if k[n - 2] < d[n - 2] && k_last > d_last {
        signal("Stochastic Crossover", k_last, Direction::Buy, 50.0);
    } else if k[n - 2] > d[n - 2] && k_last < d_last {
        signal("Stochastic Crossover", k_last, Direction::Sell, 50.0);
    }

    if cci < -100.0 {
        signal("CCI", cci, Direction::Buy, 60.0);
    } else if cci > 100.0 {
        signal("CCI", cci, Direction::Sell, 60.0);
    }

    result.rsi = defined(rsi);
    result.stoch_k = defined(k_last);
    result.stoch_d = defined(d_last);
    result.cci = defined(cci);
    result
}

// =============================================================================
// Chart Patterns and Scoring
// =============================================================================

pub fn identify_price_patterns(
    bars: &[Bar],
    support: &[f64],
    resistance: &[f64],
    trend: Trend,
) -> Vec<String> {
    let mut patterns = Vec::new();
    let n = bars.len();
    if n < 50 {
        return patterns;
    }
    let last_price = bars[n - 1].close;

    let closest_support = support
        .iter()
        .copied()
        .filter(|s| *s < last_price)
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
    let closest_resistance = resistance
        .iter()
        .copied()
        .filter(|r| *r > last_price)
        .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.min(r))));

    if let Some(s) = closest_support {
        if (last_price - s) / last_price < 0.005 {
            push_unique(&mut patterns, "Price at Support");
            if trend == Trend::Bullish {
                push_unique(&mut patterns, "Bullish Bounce from Support");
            }
        }
    }
    if let Some(r) = closest_resistance {
        if (r - last_price) / last_price < 0.005 {
            push_unique(&mut patterns, "Price at Resistance");
            if trend == Trend::Bearish {
                push_unique(&mut patterns, "Bearish Rejection from Resistance");
            }
        }
    }

    let h = highs(bars);
    let l = lows(bars);
    let highs5 = rolling_max(&h, 5);
    let lows5 = rolling_min(&l, 5);
    for i in 5..50.min(n - 5) {
        let at = n - i;
        let near = |values: &[f64]| {
            (5..i).any(|j| ((values[n - j] - values[at]) / values[at]).abs() < 0.005)
        };
        if h[at] == highs5[at] && near(&h) && trend == Trend::Bearish {
            push_unique(&mut patterns, "Double Top");
            break;
        }
        if l[at] == lows5[at] && near(&l) && trend == Trend::Bullish {
            push_unique(&mut patterns, "Double Bottom");
            break;
        }
    }

    let change = |values: &[f64], back: usize| (values[n - 1] - values[n - back]) / values[n - back];
    let high_change = change(&h, 20);
    let low_change = change(&l, 20);
    let consolidating = change(&h, 5).abs() < 0.005 && change(&l, 5).abs() < 0.005;
    if high_change > 0.02 && consolidating {
        if trend == Trend::Bullish {
            push_unique(&mut patterns, "Bullish Flag/Pennant");
        }
    } else if low_change < -0.02 && consolidating && trend == Trend::Bearish {
        push_unique(&mut patterns, "Bearish Flag/Pennant");
    }

    let high_slope = linear_slope(&h[n - 20..]);
    let low_slope = linear_slope(&l[n - 20..]);
    if high_slope < -0.0001 && low_slope > 0.0001 {
        push_unique(&mut patterns, "Symmetrical Triangle");
    } else if high_slope.abs() < 0.0001 && low_slope > 0.0001 {
        push_unique(&mut patterns, "Ascending Triangle");
    } else if high_slope < -0.0001 && low_slope.abs() < 0.0001 {
        push_unique(&mut patterns, "Descending Triangle");
    }

    patterns
}

fn score(d: &PriceActionDetails, patterns: &[String]) -> (Direction, f64) {
    let mut buy = 0.0;
    let mut sell = 0.0;

    match d.trend.trend {
        Trend::Bullish => buy += d.trend.strength / 20.0,
        Trend::Bearish => sell += d.trend.strength / 20.0,
        Trend::Sideways => {}
    }
    for candle in &d.candle_patterns {
        match candle.signal {
            Trend::Bullish => buy += candle.strength / 20.0,
            Trend::Bearish => sell += candle.strength / 20.0,
            Trend::Sideways => {}
        }
    }
    for m in &d.momentum.signals {
        match m.signal {
            Direction::Buy => buy += m.strength / 20.0,
            Direction::Sell => sell += m.strength / 20.0,
            Direction::Neutral => {}
        }
    }
    for p in patterns {
        if p.contains("Bullish") || p.contains("Support") || p.contains("Bottom") {
            buy += 2.5;
        } else if p.contains("Bearish") || p.contains("Resistance") || p.contains("Top") {
            sell += 2.5;
        }
    }

    let price = d.last_price;
    if price > 0.0 {
        let c = &d.pivots.classic;
        for (level, weight) in [(c.s1, 1.5), (c.s2, 1.0), (c.s3, 0.5)] {
            let dist = (price - level) / price;
            if 0.0 < dist && dist < 0.005 {
                buy += weight;
            }
        }
        for (level, weight) in [(c.r1, 1.5), (c.r2, 1.0), (c.r3, 0.5)] {
            let dist = (level - price) / price;
            if 0.0 < dist && dist < 0.005 {
                sell += weight;
            }
        }
    }

    if buy > sell + 3.0 {
        (Direction::Buy, (buy * 10.0).min(100.0))
    } else if sell > buy + 3.0 {
        (Direction::Sell, (sell * 10.0).min(100.0))
    } else {
        // weak reading, half weight
        (Direction::Neutral, f64::max(buy, sell) * 5.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::bars_from;

    #[test]
    fn test_classic_pivots() {
        let bars = vec![Bar::new(0, 1.1000, 1.1100, 1.0900, 1.1000)];
        let p = calculate_pivots(&bars);
        assert!((p.classic.pp - 1.1).abs() < 1e-12);
        assert!((p.classic.r1 - 1.11).abs() < 1e-12);
        assert!((p.classic.s2 - 1.08).abs() < 1e-12);
        assert!((p.fibonacci.r1 - (1.1 + 0.382 * 0.02)).abs() < 1e-12);
        assert!((p.camarilla.s4 - (1.1 - 0.011)).abs() < 1e-12);
    }

    #[test]
    fn test_trend_needs_history() {
        let bars = bars_from(150, 0.0002, |i| 1.0 + i as f64 * 0.001);
        let trend = analyze_trend(&bars);
        assert_eq!(trend.trend, Trend::Sideways);
        assert_eq!(trend.strength, 0.0);
    }

    #[test]
    fn test_steady_rise_is_bullish() {
        let bars = bars_from(250, 0.0002, |i| 1.0 + i as f64 * 0.001);
        let trend = analyze_trend(&bars);
        assert_eq!(trend.trend, Trend::Bullish);
        // close above a rising MA20, all averages stacked
        assert_eq!(trend.strength, 80.0);
        assert!(trend.higher_highs);

        let report = PriceActionStrategy.analyze(&bars).unwrap();
        assert_eq!(report.signal, Direction::Buy);
        match report.details {
            StrategyDetails::PriceAction(d) => {
                assert!((d.last_price - 1.249).abs() < 1e-9);
                assert!(d.atr > 0.0);
                assert!(d
                    .candle_patterns
                    .iter()
                    .all(|c| c.pattern == "Bullish Marubozu"));
            }
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_engulfing_and_harami() {
        let mut bars = bars_from(12, 0.0005, |_| 1.1);
        bars[10] = Bar::new(10, 1.1010, 1.1012, 1.0995, 1.1000);
        bars[11] = Bar::new(11, 1.0998, 1.1030, 1.0996, 1.1025);
        let found = identify_candle_patterns(&bars);
        assert_eq!(found[0].pattern, "Bullish Engulfing");
        assert_eq!(found[0].strength, 90.0);

        bars[11] = Bar::new(11, 1.1002, 1.1006, 1.1001, 1.1005);
        let found = identify_candle_patterns(&bars);
        assert!(found.iter().any(|c| c.pattern == "Bullish Harami"));
    }

    #[test]
    fn test_flat_market_has_no_momentum_signals() {
        let bars = bars_from(60, 0.001, |_| 1.1);
        let momentum = calculate_momentum(&bars);
        assert!(momentum.signals.is_empty());
        assert!(momentum.rsi.is_none());
    }

    #[test]
    fn test_flat_market_is_neutral() {
        let bars = bars_from(250, 0.001, |_| 1.1);
        let report = PriceActionStrategy.analyze(&bars).unwrap();
        assert_eq!(report.signal, Direction::Neutral);
        assert!(report.patterns.contains(&"Price at Support".to_string()));
        assert!(report.patterns.contains(&"Price at Resistance".to_string()));
    }

    #[test]
    fn test_round_numbers() {
        let levels = round_number_levels(5.2);
        assert_eq!(levels.len(), 1);
        assert!((levels[0] - 5.0).abs() < 1e-12);
        assert!(round_number_levels(1.2345).is_empty());
    }
}
