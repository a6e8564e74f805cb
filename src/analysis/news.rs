// src/analysis/news.rs
//
// Economic calendar and social sentiment scoring for a symbol's currencies.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const KNOWN_CURRENCIES: [&str; 10] = [
    "USD", "EUR", "GBP", "JPY", "AUD", "NZD", "CAD", "CHF", "XAU", "XAG",
];

// =============================================================================
// Inputs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Impact {
    #[default]
    Low,
    Medium,
    High,
}

impl Impact {
    pub fn factor(&self) -> f64 {
        match self {
            Impact::Low => 1.0,
            Impact::Medium => 2.0,
            Impact::High => 4.0,
        }
    }
}

/// One economic calendar entry. Values are kept as published text ("0.3%", "215K").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub datetime: DateTime<Utc>,
    pub currency: String,
    pub event: String,
    #[serde(default)]
    pub impact: Impact,
    #[serde(default)]
    pub actual: Option<String>,
    #[serde(default)]
    pub forecast: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

/// An aggregated social media sample for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialPost {
    pub datetime: DateTime<Utc>,
    pub sentiment: SentimentLabel,
    /// -1..1
    pub sentiment_score: f64,
    #[serde(default = "default_tweet_count")]
    pub tweet_count: u64,
}

fn default_tweet_count() -> u64 {
    1
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEvent {
    #[serde(flatten)]
    pub event: CalendarEvent,
    pub is_past: bool,
    pub is_better: bool,
    pub is_worse: bool,
    /// Signed toward the base currency.
    pub event_impact: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalendarSummary {
    pub recent_events: Vec<ScoredEvent>,
    pub total_events: usize,
    pub high_impact_events: usize,
    pub bullish_events: usize,
    pub bearish_events: usize,
    /// -100..100
    pub total_impact: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SocialSummary {
    /// -100..100
    pub sentiment: f64,
    pub volume: u64,
    pub bullish_ratio: f64,
    pub bearish_ratio: f64,
    pub neutral_ratio: f64,
    pub trending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpcomingEvent {
    pub datetime: DateTime<Utc>,
    pub currency: String,
    pub event: String,
    pub impact: Impact,
    pub forecast: Option<String>,
    pub previous: Option<String>,
    pub hours_until: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewsAnalysis {
    pub symbol: String,
    pub currencies: Vec<String>,
    pub news: CalendarSummary,
    pub social: SocialSummary,
    /// -100..100, positive favours the base currency.
    pub impact: f64,
    pub next_events: Vec<UpcomingEvent>,
}

// =============================================================================
// Analyzer
// =============================================================================

#[derive(Debug, Clone)]
pub struct NewsAnalyzer {
    pub news_weight: f64,
    pub social_weight: f64,
}

impl Default for NewsAnalyzer {
    fn default() -> Self {
        Self {
            news_weight: 0.7,
            social_weight: 0.3,
        }
    }
}

impl NewsAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scores `events` (the calendar around `now`) and `social` samples for `symbol`.
    pub fn analyze(
        &self,
        symbol: &str,
        events: &[CalendarEvent],
        social: &[SocialPost],
        now: DateTime<Utc>,
    ) -> NewsAnalysis {
        let currencies = extract_currencies(symbol);
        let news = analyze_calendar(&currencies, events, now);
        let social = analyze_social(social, now);
        let next_events = upcoming_events(&currencies, events, now);
        let impact = (news.total_impact * self.news_weight + social.sentiment * self.social_weight)
            .clamp(-100.0, 100.0);

        if !news.recent_events.is_empty() {
            log::debug!(
                "[News] {}: {} events, impact {:.1}",
                symbol,
                news.total_events,
                impact
            );
        }

        NewsAnalysis {
            symbol: symbol.to_string(),
            currencies,
            news,
            social,
            impact,
            next_events,
        }
    }
}

/// Known currency codes in the symbol, base first.
pub fn extract_currencies(symbol: &str) -> Vec<String> {
    let symbol = symbol.to_uppercase();
    let known = |code: &str| KNOWN_CURRENCIES.contains(&code);
    let mut result = Vec::new();
    if symbol.len() == 6 && symbol.is_ascii() {
        let (base, quote) = symbol.split_at(3);
        if known(base) {
            result.push(base.to_string());
        }
        if known(quote) {
            result.push(quote.to_string());
        }
    } else if symbol.starts_with("XAU") || symbol.starts_with("XAG") {
        let (metal, quote) = symbol.split_at(3);
        result.push(metal.to_string());
        if known(quote) {
            result.push(quote.to_string());
        }
    }
    result
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-+]?\d*\.\d+|[-+]?\d+").expect("number pattern is valid"))
}

/// First number in a published value, ignoring units and percent signs.
pub fn parse_numeric(value: &str) -> Option<f64> {
    let cleaned = value.replace('%', "");
    number_regex()
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

fn lower_is_better(event: &str) -> bool {
    let name = event.to_lowercase();
    ["unemployment", "jobless", "deficit"]
        .iter()
        .any(|term| name.contains(term))
}

/// Events from one day before to one day after `now`.
pub fn analyze_calendar(
    currencies: &[String],
    events: &[CalendarEvent],
    now: DateTime<Utc>,
) -> CalendarSummary {
    let mut result = CalendarSummary::default();
    let Some(base) = currencies.first() else {
        return result;
    };
    let (from, to) = (now - Duration::days(1), now + Duration::days(1));

    for event in events
        .iter()
        .filter(|e| e.datetime >= from && e.datetime <= to)
        .filter(|e| currencies.contains(&e.currency))
    {
        result.total_events += 1;
        if event.impact == Impact::High {
            result.high_impact_events += 1;
        }

        let is_past = event.datetime < now;
        let mut is_better = false;
        let mut is_worse = false;
        if is_past {
            let actual = event.actual.as_deref().and_then(parse_numeric);
            let forecast = event.forecast.as_deref().and_then(parse_numeric);
            if let (Some(a), Some(f)) = (actual, forecast) {
                if lower_is_better(&event.event) {
                    is_better = a < f;
                    is_worse = a > f;
                } else {
                    is_better = a > f;
                    is_worse = a < f;
                }
            }
        }

        let mut impact = 0.0;
        if is_better {
            impact = event.impact.factor();
            result.bullish_events += 1;
        } else if is_worse {
            impact = -event.impact.factor();
            result.bearish_events += 1;
        }
        // good news for the quote currency is bad for the pair
        if &event.currency != base {
            impact = -impact;
        }

        result.total_impact += impact;
        result.recent_events.push(ScoredEvent {
            event: event.clone(),
            is_past,
            is_better,
            is_worse,
            event_impact: impact,
        });
    }

    result.total_impact = if result.high_impact_events > 0 {
        let max_impact = result.high_impact_events as f64 * 4.0;
        (result.total_impact * 100.0 / max_impact).clamp(-100.0, 100.0)
    } else {
        0.0
    };
    result
}

/// Samples from the last three days.
pub fn analyze_social(posts: &[SocialPost], now: DateTime<Utc>) -> SocialSummary {
    let mut result = SocialSummary::default();
    let window: Vec<&SocialPost> = posts
        .iter()
        .filter(|p| p.datetime >= now - Duration::days(3))
        .collect();
    if window.is_empty() {
        return result;
    }

    let total = window.len() as f64;
    let count = |label: SentimentLabel| window.iter().filter(|p| p.sentiment == label).count() as f64;
    result.volume = window.iter().map(|p| p.tweet_count).sum();
    result.bullish_ratio = count(SentimentLabel::Positive) / total;
    result.bearish_ratio = count(SentimentLabel::Negative) / total;
    result.neutral_ratio = count(SentimentLabel::Neutral) / total;

    let avg = window.iter().map(|p| p.sentiment_score).sum::<f64>() / total;
    if avg.is_finite() {
        result.sentiment = (avg * 100.0).trunc();
    }

    let recent = window
        .iter()
        .filter(|p| p.datetime > now - Duration::hours(6))
        .count();
    if recent > 0 && result.volume > 0 {
        result.trending = recent as f64 / result.volume as f64 > 0.3;
    }
    result
}

/// Up to five high-impact events in the next 48 hours, soonest first.
pub fn upcoming_events(
    currencies: &[String],
    events: &[CalendarEvent],
    now: DateTime<Utc>,
) -> Vec<UpcomingEvent> {
    let end = now + Duration::days(2);
    let mut upcoming: Vec<&CalendarEvent> = events
        .iter()
        .filter(|e| e.datetime >= now && e.datetime <= end)
        .filter(|e| e.impact == Impact::High && currencies.contains(&e.currency))
        .collect();
    upcoming.sort_by_key(|e| e.datetime);

    upcoming
        .into_iter()
        .take(5)
        .map(|e| UpcomingEvent {
            datetime: e.datetime,
            currency: e.currency.clone(),
            event: e.event.clone(),
            impact: e.impact,
            forecast: e.forecast.clone(),
            previous: e.previous.clone(),
            hours_until: (e.datetime - now).num_seconds() as f64 / 3600.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 8, 15, 0, 0).unwrap()
    }

    fn event(hours: i64, currency: &str, name: &str, impact: Impact, actual: &str, forecast: &str) -> CalendarEvent {
        CalendarEvent {
            datetime: now() + Duration::hours(hours),
            currency: currency.to_string(),
            event: name.to_string(),
            impact,
            actual: Some(actual.to_string()).filter(|s| !s.is_empty()),
            forecast: Some(forecast.to_string()).filter(|s| !s.is_empty()),
            previous: None,
        }
    }

    #[test]
    fn test_extract_currencies() {
        assert_eq!(extract_currencies("EURUSD"), vec!["EUR", "USD"]);
        assert_eq!(extract_currencies("XAUUSD"), vec!["XAU", "USD"]);
        assert_eq!(extract_currencies("XAUUSDm"), vec!["XAU"]);
        assert!(extract_currencies("US30").is_empty());
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("0.3%"), Some(0.3));
        assert_eq!(parse_numeric("215K"), Some(215.0));
        assert_eq!(parse_numeric("-1.5"), Some(-1.5));
        assert_eq!(parse_numeric("n/a"), None);
    }

    #[test]
    fn test_quote_currency_news_is_inverted() {
        let events = vec![
            // USD beat: bad for EURUSD
            event(-2, "USD", "Non-Farm Payrolls", Impact::High, "275K", "200K"),
            // outside the window
            event(-40, "EUR", "CPI", Impact::High, "3.0%", "2.0%"),
        ];
        let summary = analyze_calendar(&extract_currencies("EURUSD"), &events, now());
        assert_eq!(summary.total_events, 1);
        assert_eq!(summary.bullish_events, 1);
        assert_eq!(summary.recent_events[0].event_impact, -4.0);
        assert_eq!(summary.total_impact, -100.0);
    }

    #[test]
    fn test_unemployment_lower_is_better() {
        let events = vec![event(-1, "EUR", "Unemployment Rate", Impact::Medium, "6.4%", "6.6%")];
        let summary = analyze_calendar(&extract_currencies("EURUSD"), &events, now());
        assert!(summary.recent_events[0].is_better);
        // no high impact events: not normalized
        assert_eq!(summary.total_impact, 0.0);
    }

    #[test]
    fn test_blend_and_upcoming() {
        let events = vec![
            event(-3, "EUR", "GDP", Impact::High, "0.5%", "0.2%"),
            event(30, "EUR", "ECB Rate Decision", Impact::High, "", "4.5%"),
            event(10, "USD", "CPI", Impact::High, "", "3.1%"),
            event(5, "USD", "Retail Sales", Impact::Low, "", "0.2%"),
        ];
        let social = vec![SocialPost {
            datetime: now() - Duration::hours(1),
            sentiment: SentimentLabel::Positive,
            sentiment_score: 0.5,
            tweet_count: 10,
        }];
        let analysis = NewsAnalyzer::new().analyze("EURUSD", &events, &social, now());
        // GDP beat (+4) over two high impact events in the window, blended with sentiment 50
        let expected = (4.0 * 100.0 / 8.0) * 0.7 + 50.0 * 0.3;
        assert!((analysis.impact - expected).abs() < 1e-9);
        assert_eq!(analysis.next_events.len(), 2);
        assert_eq!(analysis.next_events[0].event, "CPI");
        assert!((analysis.next_events[0].hours_until - 10.0).abs() < 1e-9);
    }
}
