// src/data/mod.rs
//
// Market data access for the engine: a bar cache in front of the broker,
// CSV snapshots of fetched history, and the news/social inputs read from disk.

use crate::analysis::news::{CalendarEvent, SocialPost};
use crate::connectors::replay::read_csv_bars;
use crate::models::{Bar, SymbolInfo, Tick, Timeframe};
use crate::traits::SharedBroker;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

pub fn cache_key(symbol: &str, tf: Timeframe) -> String {
    format!("{}_{}", symbol.to_uppercase(), tf)
}

pub struct DataManager {
    broker: SharedBroker,
    data_dir: PathBuf,
    bars_per_request: usize,
    save_market_data: bool,
    cache: RwLock<HashMap<String, Vec<Bar>>>,
}

impl DataManager {
    pub fn new<P: AsRef<Path>>(broker: SharedBroker, data_dir: P, bars_per_request: usize, save_market_data: bool) -> Self {
        Self {
            broker,
            data_dir: data_dir.as_ref().to_path_buf(),
            bars_per_request: bars_per_request.max(1),
            save_market_data,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn historical_dir(&self) -> PathBuf {
        self.data_dir.join("historical")
    }

    // =========================================================================
    // Broker-backed data
    // =========================================================================

    /// The last `count` bars (default `bars_per_request`). Served from the cache
    /// when it holds enough bars and `use_cache` is set, otherwise fetched.
    pub async fn get_historical_data(
        &self,
        symbol: &str,
        tf: Timeframe,
        count: Option<usize>,
        use_cache: bool,
    ) -> Result<Vec<Bar>, String> {
        let count = count.unwrap_or(self.bars_per_request);
        let key = cache_key(symbol, tf);
        if use_cache {
            let cache = self.cache.read().await;
            if let Some(bars) = cache.get(&key).filter(|b| b.len() >= count) {
                return Ok(bars[bars.len() - count..].to_vec());
            }
        }

        let bars = self.broker.historical_data(symbol, tf, count).await?;
        self.cache.write().await.insert(key, bars.clone());
        Ok(bars)
    }

    /// Cached bars without touching the broker.
    pub async fn cached(&self, symbol: &str, tf: Timeframe) -> Option<Vec<Bar>> {
        self.cache.read().await.get(&cache_key(symbol, tf)).cloned()
    }

    pub async fn get_latest_tick(&self, symbol: &str) -> Result<Tick, String> {
        self.broker.last_tick(symbol).await
    }

    pub async fn symbols_info(&self) -> Result<Vec<SymbolInfo>, String> {
        self.broker.symbols_info().await
    }

    pub async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, String> {
        self.broker.symbol_info(symbol).await
    }

    /// Refreshes every symbol and timeframe from the broker concurrently. A
    /// failed pair is logged and reported as false without stopping the rest.
    pub async fn update_market_data(&self, symbols: &[String], timeframes: &[Timeframe]) -> BTreeMap<String, bool> {
        let fetches = symbols.iter().flat_map(|symbol| {
            timeframes
                .iter()
                .map(move |&tf| async move { (cache_key(symbol, tf), self.refresh(symbol, tf).await) })
        });
        let results: BTreeMap<String, bool> = join_all(fetches).await.into_iter().collect();
        let updated = results.values().filter(|ok| **ok).count();
        log::debug!("[Data] Updated {}/{} series", updated, results.len());
        results
    }

    async fn refresh(&self, symbol: &str, tf: Timeframe) -> bool {
        match self.get_historical_data(symbol, tf, None, false).await {
            Ok(bars) if bars.is_empty() => {
                log::warn!("[Data] No bars for {}", cache_key(symbol, tf));
                false
            }
            Ok(bars) => {
                if self.save_market_data {
                    if let Err(e) = self.save_historical_data(symbol, tf, &bars) {
                        log::warn!("[Data] {}", e);
                    }
                }
                true
            }
            Err(e) => {
                log::warn!("[Data] Failed to update {}: {}", cache_key(symbol, tf), e);
                false
            }
        }
    }

    // =========================================================================
    // CSV snapshots
    // =========================================================================

    /// Writes bars to `historical/{symbol}_{tf}_{YYYYMMDD}.csv`, dated by the last bar.
    pub fn save_historical_data(&self, symbol: &str, tf: Timeframe, bars: &[Bar]) -> Result<PathBuf, String> {
        let last = bars
            .last()
            .ok_or_else(|| format!("No bars to save for {}", cache_key(symbol, tf)))?;
        let date = Utc
            .timestamp_opt(last.time, 0)
            .single()
            .ok_or_else(|| format!("Invalid bar time {}", last.time))?
            .format("%Y%m%d");
        let dir = self.historical_dir();
        fs::create_dir_all(&dir).map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
        let path = dir.join(format!("{}_{}.csv", cache_key(symbol, tf), date));

        let mut writer =
            csv::Writer::from_path(&path).map_err(|e| format!("Failed to create {}: {}", path.display(), e))?;
        for bar in bars {
            writer
                .serialize(bar)
                .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
        }
        writer
            .flush()
            .map_err(|e| format!("Failed to flush {}: {}", path.display(), e))?;
        Ok(path)
    }

    /// Reads the newest snapshot of a series, keeping bars within `[from, to]`.
    pub fn load_historical_data(
        &self,
        symbol: &str,
        tf: Timeframe,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<Bar>, String> {
        let prefix = format!("{}_", cache_key(symbol, tf));
        let dir = self.historical_dir();
        let entries = fs::read_dir(&dir).map_err(|e| format!("Failed to read {}: {}", dir.display(), e))?;
        let latest = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension().is_some_and(|ext| ext == "csv")
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix))
            })
            .max()
            .ok_or_else(|| format!("No saved data for {}", cache_key(symbol, tf)))?;

        let bars = read_csv_bars(&latest)?;
        Ok(bars
            .into_iter()
            .filter(|b| from.map_or(true, |f| b.time >= f) && to.map_or(true, |t| b.time <= t))
            .collect())
    }

    // =========================================================================
    // News and sentiment
    // =========================================================================

    /// Calendar events from `news/*.jsonl` between two instants, sorted by time.
    pub fn get_news_data(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<CalendarEvent>, String> {
        let dir = self.data_dir.join("news");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|e| format!("Failed to read {}: {}", dir.display(), e))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        paths.sort();

        let mut events = Vec::new();
        for path in paths {
            let records: Vec<CalendarEvent> = read_jsonl(&path)?;
            events.extend(records.into_iter().filter(|e| e.datetime >= from && e.datetime <= to));
        }
        events.sort_by_key(|e| e.datetime);
        Ok(events)
    }

    /// Social sentiment samples from `social/{symbol}.jsonl`.
    pub fn get_social_sentiment(&self, symbol: &str) -> Result<Vec<SocialPost>, String> {
        let path = self
            .data_dir
            .join("social")
            .join(format!("{}.jsonl", symbol.to_uppercase()));
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_jsonl(&path)
    }
}

/// Parses one JSON record per line. Blank and malformed lines are skipped.
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, String> {
    let file = File::open(path).map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => log::warn!("[Data] Skipping {}:{}: {}", path.display(), n + 1, e),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaperBrokerConfig;
    use crate::connectors::PaperBroker;
    use std::sync::Arc;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "test_{}_{}",
            name,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn hourly(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let p = 1.1 + i as f64 * 0.0001;
                Bar::new(1_700_000_000 + i as i64 * 3600, p, p + 0.0005, p - 0.0005, p + 0.0001)
            })
            .collect()
    }

    async fn manager(dir: &Path, save: bool) -> DataManager {
        let broker = PaperBroker::new(PaperBrokerConfig::default());
        broker.load_bars("EURUSD", Timeframe::H1, hourly(50)).await;
        broker.set_clock(1_700_000_000 + 50 * 3600).await;
        DataManager::new(Arc::new(broker), dir, 20, save)
    }

    #[tokio::test]
    async fn test_update_caches_and_reports_failures() {
        let dir = temp_dir("data_update");
        let dm = manager(&dir, true).await;
        let symbols = vec!["EURUSD".to_string(), "NOPE".to_string()];
        let results = dm.update_market_data(&symbols, &[Timeframe::H1]).await;
        assert_eq!(results.get("EURUSD_H1"), Some(&true));
        assert_eq!(results.get("NOPE_H1"), Some(&false));

        let cached = dm.cached("EURUSD", Timeframe::H1).await.unwrap();
        assert_eq!(cached.len(), 20);
        let five = dm.get_historical_data("EURUSD", Timeframe::H1, Some(5), true).await.unwrap();
        assert_eq!(five.last(), cached.last());

        let loaded = dm.load_historical_data("EURUSD", Timeframe::H1, None, None).unwrap();
        assert_eq!(loaded, cached);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_load_filters_by_time() {
        let dir = temp_dir("data_filter");
        let dm = manager(&dir, false).await;
        let bars = hourly(10);
        dm.save_historical_data("EURUSD", Timeframe::H1, &bars).unwrap();
        let loaded = dm
            .load_historical_data("EURUSD", Timeframe::H1, Some(bars[3].time), Some(bars[6].time))
            .unwrap();
        assert_eq!(loaded.len(), 4);
        assert!(dm.load_historical_data("GBPUSD", Timeframe::H1, None, None).is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_news_and_social_files() {
        let dir = temp_dir("data_news");
        let dm = manager(&dir, false).await;
        fs::create_dir_all(dir.join("news")).unwrap();
        fs::write(
            dir.join("news").join("calendar.jsonl"),
            concat!(
                r#"{"datetime":"2024-01-05T13:30:00Z","currency":"USD","event":"Non-Farm Payrolls","impact":"High","actual":"216K","forecast":"170K"}"#,
                "\n",
                "not json\n",
                r#"{"datetime":"2024-02-01T13:30:00Z","currency":"EUR","event":"CPI","impact":"Medium"}"#,
                "\n"
            ),
        )
        .unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let events = dm.get_news_data(from, to).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "Non-Farm Payrolls");

        assert!(dm.get_social_sentiment("EURUSD").unwrap().is_empty());
        let _ = fs::remove_dir_all(&dir);
    }
}
