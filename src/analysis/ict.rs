// src/analysis/ict.rs
//
// Inner Circle Trader concepts: liquidity pools, order blocks, breaker blocks
// and fair value gaps.

use super::{
    decide, push_unique, score_named_patterns, strongest, StrategyDetails, StrategyReport,
    TechnicalStrategy, Zone, LEVEL_MERGE_THRESHOLD,
};
use crate::indicators::{average_range, is_swing_high, is_swing_low, merge_levels};
use crate::models::Bar;
use serde::Serialize;

/// A resting liquidity level at a swing point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidityLevel {
    pub price: f64,
    pub index: usize,
    /// Earlier bars (up to 50 back) within 0.1% of this level.
    pub equal_points: usize,
    pub strength: f64,
}

/// Both sides of a structure (bullish/bearish blocks, gaps).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sided<T> {
    pub bullish: Vec<T>,
    pub bearish: Vec<T>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IctDetails {
    /// Swing lows, where sell stops rest below.
    pub buy_side_liquidity: Vec<LiquidityLevel>,
    /// Swing highs, where buy stops rest above.
    pub sell_side_liquidity: Vec<LiquidityLevel>,
    pub order_blocks: Sided<Zone>,
    pub breaker_blocks: Sided<Zone>,
    pub fair_value_gaps: Sided<Zone>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IctStrategy;

impl TechnicalStrategy for IctStrategy {
    fn name(&self) -> &'static str {
        "ict"
    }

    fn prefix(&self) -> &'static str {
        "ICT"
    }

    fn analyze(&self, bars: &[Bar]) -> Result<StrategyReport, String> {
        let last_price = bars
            .last()
            .map(|b| b.close)
            .ok_or_else(|| "ICT analysis needs at least one bar".to_string())?;

        let (buy_side, sell_side) = find_liquidity_levels(bars);
        let details = IctDetails {
            buy_side_liquidity: buy_side,
            sell_side_liquidity: sell_side,
            order_blocks: find_order_blocks(bars),
            breaker_blocks: find_breaker_blocks(bars),
            fair_value_gaps: find_fair_value_gaps(bars),
        };

        let patterns = identify_patterns(bars, &details);
        let (support, resistance) = support_resistance(last_price, &details);
        let (signal, strength) = score(last_price, &details, &patterns);

        Ok(StrategyReport {
            signal,
            strength,
            patterns,
            support_levels: support,
            resistance_levels: resistance,
            details: StrategyDetails::Ict(details),
        })
    }
}

// =============================================================================
// Structure Detection
// =============================================================================

fn equal_points(bars: &[Bar], i: usize, value: fn(&Bar) -> f64) -> usize {
    let base = value(&bars[i]);
    if base == 0.0 {
        return 0;
    }
    (i.saturating_sub(50)..i)
        .filter(|&j| ((value(&bars[j]) - base) / base).abs() < 0.001)
        .count()
}

/// Returns (buy side, sell side), top 5 of each by strength.
pub fn find_liquidity_levels(bars: &[Bar]) -> (Vec<LiquidityLevel>, Vec<LiquidityLevel>) {
    let mut buy_side = Vec::new();
    let mut sell_side = Vec::new();
    if bars.len() < 30 {
        return (buy_side, sell_side);
    }

    for i in 5..bars.len() - 5 {
        if is_swing_high(bars, i) {
            let eq = equal_points(bars, i, |b| b.high);
            sell_side.push(LiquidityLevel {
                price: bars[i].high,
                index: i,
                equal_points: eq,
                strength: 1.0 + eq as f64 * 0.2,
            });
        }
        if is_swing_low(bars, i) {
            let eq = equal_points(bars, i, |b| b.low);
            buy_side.push(LiquidityLevel {
                price: bars[i].low,
                index: i,
                equal_points: eq,
                strength: 1.0 + eq as f64 * 0.2,
            });
        }
    }

    (
        strongest(buy_side, 5, |l| l.strength),
        strongest(sell_side, 5, |l| l.strength),
    )
}

/// The last opposite candle (within 3 bars) before a candle ranging more than
/// twice the average. A down candle before a strong rally is a bullish block.
pub fn find_order_blocks(bars: &[Bar]) -> Sided<Zone> {
    let mut blocks = Sided::default();
    if bars.len() < 20 {
        return blocks;
    }
    let avg_range = average_range(bars);
    if avg_range <= 0.0 {
        return blocks;
    }
    let threshold = 2.0 * avg_range;

    for i in 3..bars.len() - 1 {
        let bar = &bars[i];
        if bar.range() <= threshold {
            continue;
        }
        let strength = bar.range() / avg_range;
        if bar.is_bullish() {
            if let Some(j) = (i - 3..i).find(|&j| bars[j].is_bearish() && bars[j].low < bar.low) {
                blocks.bullish.push(Zone {
                    top: bars[j].open,
                    bottom: bars[j].close,
                    index: j,
                    strength,
                });
            }
        } else if bar.is_bearish() {
            if let Some(j) = (i - 3..i).find(|&j| bars[j].is_bullish() && bars[j].high > bar.high) {
                blocks.bearish.push(Zone {
                    top: bars[j].close,
                    bottom: bars[j].open,
                    index: j,
                    strength,
                });
            }
        }
    }

    Sided {
        bullish: strongest(blocks.bullish, 3, |z| z.strength),
        bearish: strongest(blocks.bearish, 3, |z| z.strength),
    }
}

/// First opposite candle within 20 bars after a failed swing (lower high or higher low).
pub fn find_breaker_blocks(bars: &[Bar]) -> Sided<Zone> {
    let mut blocks = Sided::default();
    if bars.len() < 50 {
        return blocks;
    }

    let mut highs = Vec::new();
    let mut lows = Vec::new();
    for i in 5..bars.len() - 5 {
        if is_swing_high(bars, i) {
            highs.push((i, bars[i].high));
        }
        if is_swing_low(bars, i) {
            lows.push((i, bars[i].low));
        }
    }

    for w in highs.windows(2) {
        let ((_, prev), (start, cur)) = (w[0], w[1]);
        if cur < prev {
            let end = (start + 20).min(bars.len() - 1);
            if let Some(j) = (start..end).find(|&j| bars[j].is_bullish()) {
                blocks.bullish.push(Zone {
                    top: bars[j].close,
                    bottom: bars[j].open,
                    index: j,
                    strength: 1.0 + (prev - cur) / prev,
                });
            }
        }
    }

    for w in lows.windows(2) {
        let ((_, prev), (start, cur)) = (w[0], w[1]);
        if cur > prev {
            let end = (start + 20).min(bars.len() - 1);
            if let Some(j) = (start..end).find(|&j| bars[j].is_bearish()) {
                blocks.bearish.push(Zone {
                    top: bars[j].open,
                    bottom: bars[j].close,
                    index: j,
                    strength: 1.0 + (cur - prev) / prev,
                });
            }
        }
    }

    let bullish_len = blocks.bullish.len();
    let bearish_len = blocks.bearish.len();
    Sided {
        bullish: strongest(blocks.bullish, bullish_len, |z| z.strength),
        bearish: strongest(blocks.bearish, bearish_len, |z| z.strength),
    }
}

/// Three-candle imbalances wider than 0.3x the average range. Top 3 per side.
pub fn find_fair_value_gaps(bars: &[Bar]) -> Sided<Zone> {
    let mut gaps = Sided::default();
    if bars.len() < 10 {
        return gaps;
    }
    let avg_range = average_range(bars);
    if avg_range <= 0.0 {
        return gaps;
    }
    let min_gap = 0.3 * avg_range;

    for i in 1..bars.len() - 1 {
        let (before, after) = (&bars[i - 1], &bars[i + 1]);
        if before.high < after.low {
            let size = after.low - before.high;
            if size > min_gap {
                gaps.bullish.push(Zone {
                    top: after.low,
                    bottom: before.high,
                    index: i,
                    strength: size / avg_range,
                });
            }
        }
        if before.low > after.high {
            let size = before.low - after.high;
            if size > min_gap {
                gaps.bearish.push(Zone {
                    top: before.low,
                    bottom: after.high,
                    index: i,
                    strength: size / avg_range,
                });
            }
        }
    }

    Sided {
        bullish: strongest(gaps.bullish, 3, |z| z.strength),
        bearish: strongest(gaps.bearish, 3, |z| z.strength),
    }
}

// =============================================================================
// Patterns, Levels and Scoring
// =============================================================================

fn identify_patterns(bars: &[Bar], d: &IctDetails) -> Vec<String> {
    let mut patterns = Vec::new();
    let last_price = match bars.last() {
        Some(b) => b.close,
        None => return patterns,
    };
    let avg_range = average_range(bars);

    if bars.len() > 100 {
        let recent: Vec<&LiquidityLevel> = d
            .buy_side_liquidity
            .iter()
            .filter(|l| l.index + 60 > bars.len())
            .collect();
        if recent.len() >= 2 {
            let min_gap = recent
                .windows(2)
                .map(|w| (w[0].price - w[1].price).abs())
                .fold(f64::INFINITY, f64::min);
            if min_gap < 0.5 * avg_range {
                push_unique(&mut patterns, "Liquidity Sweep Pattern (Buy Side)");
            }
        }
    }

    let bullish_blocks = &d.order_blocks.bullish;
    if bullish_blocks.len() >= 2 {
        let top = bullish_blocks.iter().map(|b| b.top).fold(f64::MIN, f64::max);
        let bottom = bullish_blocks.iter().map(|b| b.bottom).fold(f64::MAX, f64::min);
        if top - bottom < 2.0 * avg_range {
            push_unique(&mut patterns, "Internal Price Delivery Area (Bullish)");
        }
    }

    if d.fair_value_gaps
        .bullish
        .iter()
        .any(|g| d.order_blocks.bullish.iter().any(|b| g.overlaps(b)))
    {
        push_unique(&mut patterns, "Bullish Order Block with Fair Value Gap");
    }
    if d.fair_value_gaps
        .bearish
        .iter()
        .any(|g| d.order_blocks.bearish.iter().any(|b| g.overlaps(b)))
    {
        push_unique(&mut patterns, "Bearish Order Block with Fair Value Gap");
    }

    let near = |level: f64, price: f64| level != 0.0 && ((level - price) / level).abs() < 0.002;
    if d.buy_side_liquidity
        .iter()
        .any(|l| d.order_blocks.bullish.iter().any(|b| near(l.price, b.bottom)))
    {
        push_unique(&mut patterns, "Bullish Order Block at Buy Side Liquidity");
    }
    if d.sell_side_liquidity
        .iter()
        .any(|l| d.order_blocks.bearish.iter().any(|b| near(l.price, b.top)))
    {
        push_unique(&mut patterns, "Bearish Order Block at Sell Side Liquidity");
    }

    if d.fair_value_gaps
        .bullish
        .iter()
        .any(|g| last_price < g.bottom && (g.bottom - last_price) / last_price < 0.005)
    {
        push_unique(&mut patterns, "Price Approaching Bullish Fair Value Gap");
    }
    if d.fair_value_gaps
        .bearish
        .iter()
        .any(|g| last_price > g.top && (last_price - g.top) / last_price < 0.005)
    {
        push_unique(&mut patterns, "Price Approaching Bearish Fair Value Gap");
    }

    patterns
}

fn support_resistance(last_price: f64, d: &IctDetails) -> (Vec<f64>, Vec<f64>) {
    let mut support: Vec<f64> = d
        .buy_side_liquidity
        .iter()
        .filter(|l| l.price < last_price)
        .map(|l| l.price)
        .collect();
    let mut resistance: Vec<f64> = d
        .sell_side_liquidity
        .iter()
        .filter(|l| l.price > last_price)
        .map(|l| l.price)
        .collect();

    for block in d.order_blocks.bullish.iter().filter(|b| b.top < last_price) {
        support.push(block.top);
        support.push(block.bottom);
    }
    for block in d.order_blocks.bearish.iter().filter(|b| b.bottom > last_price) {
        resistance.push(block.top);
        resistance.push(block.bottom);
    }

    (
        merge_levels(&support, LEVEL_MERGE_THRESHOLD),
        merge_levels(&resistance, LEVEL_MERGE_THRESHOLD),
    )
}

fn score(last_price: f64, d: &IctDetails, patterns: &[String]) -> (crate::models::Direction, f64) {
    let mut buy = 0.0;
    let mut sell = 0.0;

    for level in &d.buy_side_liquidity {
        let diff = (last_price - level.price) / last_price;
        if -0.005 < diff && diff < 0.002 {
            buy += 2.0 * level.strength;
        } else if (0.002..0.01).contains(&diff) {
            buy += level.strength;
        }
    }
    for level in &d.sell_side_liquidity {
        let diff = (level.price - last_price) / last_price;
        if -0.005 < diff && diff < 0.002 {
            sell += 2.0 * level.strength;
        } else if (0.002..0.01).contains(&diff) {
            sell += level.strength;
        }
    }

    for block in &d.order_blocks.bullish {
        let above = (last_price - block.top) / last_price;
        if block.contains(last_price) {
            buy += 3.0 * block.strength;
        } else if 0.0 < above && above < 0.005 {
            buy += 1.5 * block.strength;
        }
    }
    for block in &d.order_blocks.bearish {
        let below = (block.bottom - last_price) / last_price;
        if block.contains(last_price) {
            sell += 3.0 * block.strength;
        } else if 0.0 < below && below < 0.005 {
            sell += 1.5 * block.strength;
        }
    }

    for gap in &d.fair_value_gaps.bullish {
        if last_price < gap.bottom && (gap.bottom - last_price) / last_price < 0.005 {
            buy += 2.0 * gap.strength;
        } else if gap.contains(last_price) {
            buy += gap.strength;
        }
    }
    for gap in &d.fair_value_gaps.bearish {
        if last_price > gap.top && (last_price - gap.top) / last_price < 0.005 {
            sell += 2.0 * gap.strength;
        } else if gap.contains(last_price) {
            sell += gap.strength;
        }
    }

    score_named_patterns(patterns, &mut buy, &mut sell);
    decide(buy, sell, 2.0)
}
