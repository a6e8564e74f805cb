// src/connectors/replay.rs
//
// Bar files for backtests. JSONL files hold one `BarRecord` per line; CSV files
// are named `{SYMBOL}_{TF}[_suffix].csv` with a `time,open,high,low,close,...`
// header. `BarReplay` merges any number of files into one stream ordered by bar
// close time. `RecordingBroker` tees bars fetched from a live broker into a
// JSONL file that `BarReplay` can read back.

use crate::models::{
    AccountInfo, Bar, Deal, OrderRequest, OrderResult, OrderSide, PendingOrder, PendingOrderRequest,
    Position, SymbolInfo, Tick, Timeframe,
};
use crate::traits::{Broker, SharedBroker};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tokio::sync::Mutex;

/// One bar of one symbol/timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar: Bar,
}

impl BarRecord {
    pub fn close_time(&self) -> i64 {
        self.bar.time + self.timeframe.seconds()
    }
}

/// Symbol and timeframe from a `{SYMBOL}_{TF}[_suffix].csv` file name.
pub fn parse_csv_name(path: &Path) -> Result<(String, Timeframe), String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| format!("Bad file name: {}", path.display()))?;
    let mut parts = stem.split('_');
    let symbol = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("No symbol in file name: {}", path.display()))?;
    let tf = parts
        .next()
        .ok_or_else(|| format!("No timeframe in file name: {}", path.display()))?
        .parse::<Timeframe>()?;
    Ok((symbol.to_uppercase(), tf))
}

pub fn read_csv_bars(path: &Path) -> Result<Vec<Bar>, String> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
    let mut bars = Vec::new();
    for row in reader.deserialize::<Bar>() {
        bars.push(row.map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?);
    }
    bars.sort_by_key(|b| b.time);
    Ok(bars)
}

// =============================================================================
// BarReplay
// =============================================================================

enum Source {
    Jsonl { reader: BufReader<File>, buffer: String },
    Csv { records: VecDeque<BarRecord> },
}

impl Source {
    fn open(path: &Path) -> Result<Self, String> {
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv {
            let (symbol, timeframe) = parse_csv_name(path)?;
            let records = read_csv_bars(path)?
                .into_iter()
                .map(|bar| BarRecord {
                    symbol: symbol.clone(),
                    timeframe,
                    bar,
                })
                .collect();
            Ok(Source::Csv { records })
        } else {
            let file = File::open(path).map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
            Ok(Source::Jsonl {
                reader: BufReader::new(file),
                buffer: String::new(),
            })
        }
    }

    fn next_record(&mut self) -> Option<BarRecord> {
        match self {
            Source::Csv { records } => records.pop_front(),
            Source::Jsonl { reader, buffer } => loop {
                buffer.clear();
                match reader.read_line(buffer) {
                    Ok(0) => return None,
                    Ok(_) => {
                        let line = buffer.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<BarRecord>(line) {
                            Ok(record) => return Some(record),
                            Err(e) => {
                                log::warn!("Failed to parse bar record: {}", e);
                                continue;
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("Error reading bar file: {}", e);
                        return None;
                    }
                }
            },
        }
    }
}

/// Merges bar files into one stream ordered by bar close time.
/// Ties go to the file listed first.
pub struct BarReplay {
    sources: Vec<Source>,
    heads: Vec<Option<BarRecord>>,
}

impl BarReplay {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self, String> {
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            sources.push(Source::open(path.as_ref())?);
        }
        let heads = sources.iter().map(|_| None).collect();
        Ok(Self { sources, heads })
    }
}

impl Iterator for BarReplay {
    type Item = BarRecord;

    fn next(&mut self) -> Option<BarRecord> {
        for (source, head) in self.sources.iter_mut().zip(self.heads.iter_mut()) {
            if head.is_none() {
                *head = source.next_record();
            }
        }

        let mut best: Option<(usize, i64)> = None;
        for (i, head) in self.heads.iter().enumerate() {
            if let Some(record) = head {
                let t = record.close_time();
                if best.map_or(true, |(_, b)| t < b) {
                    best = Some((i, t));
                }
            }
        }
        best.and_then(|(i, _)| self.heads[i].take())
    }
}

/// Loads every bar of the given files, grouped by symbol and timeframe,
/// sorted and deduplicated by time.
pub fn load_bar_files<P: AsRef<Path>>(paths: &[P]) -> Result<BTreeMap<(String, Timeframe), Vec<Bar>>, String> {
    let mut out: BTreeMap<(String, Timeframe), Vec<Bar>> = BTreeMap::new();
    for record in BarReplay::open(paths)? {
        out.entry((record.symbol.to_uppercase(), record.timeframe))
            .or_default()
            .push(record.bar);
    }
    for bars in out.values_mut() {
        bars.sort_by_key(|b| b.time);
        bars.dedup_by_key(|b| b.time);
    }
    Ok(out)
}

/// Aggregates ascending bars into `tf` buckets aligned to the epoch.
/// The last bucket may be incomplete.
pub fn resample(bars: &[Bar], tf: Timeframe) -> Vec<Bar> {
    let span = tf.seconds();
    let mut out: Vec<Bar> = Vec::new();
    for bar in bars {
        let start = bar.time - bar.time.rem_euclid(span);
        match out.last_mut() {
            Some(last) if last.time == start => {
                last.high = last.high.max(bar.high);
                last.low = last.low.min(bar.low);
                last.close = bar.close;
                last.tick_volume += bar.tick_volume;
            }
            _ => out.push(Bar { time: start, ..*bar }),
        }
    }
    out
}

/// Deterministic price path for demos: a slow trend with two overlapping
/// cycles around `base`, `count` bars of `tf` starting at `start`.
pub fn synthetic_bars(base: f64, tf: Timeframe, start: i64, count: usize) -> Vec<Bar> {
    let scale = base * 0.002;
    let price = |i: usize| {
        let x = i as f64;
        base + scale * (x / 400.0 + (x / 24.0).sin() * 2.0 + (x / 7.0).sin() * 0.6)
    };
    (0..count)
        .map(|i| {
            let open = if i == 0 { price(0) } else { price(i - 1) };
            let close = price(i);
            let wick = scale * 0.15;
            let mut bar = Bar::new(
                start + i as i64 * tf.seconds(),
                open,
                open.max(close) + wick,
                open.min(close) - wick,
                close,
            );
            bar.tick_volume = 100.0;
            bar
        })
        .collect()
}

// =============================================================================
// RecordingBroker
// =============================================================================

/// Wraps a broker and appends every bar it returns to a JSONL file.
/// Bars already written are skipped, so repeated scans only add new bars.
pub struct RecordingBroker {
    inner: SharedBroker,
    writer: Mutex<BufWriter<File>>,
    last_written: Mutex<HashMap<(String, Timeframe), i64>>,
}

impl RecordingBroker {
    pub fn new<P: AsRef<Path>>(inner: SharedBroker, output_path: P) -> Result<Self, String> {
        let path = output_path.as_ref();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("Failed to open recording file {}: {}", path.display(), e))?;
        Ok(Self {
            inner,
            writer: Mutex::new(BufWriter::new(file)),
            last_written: Mutex::new(HashMap::new()),
        })
    }

    pub async fn flush(&self) -> Result<(), String> {
        self.writer
            .lock()
            .await
            .flush()
            .map_err(|e| format!("Failed to flush recording: {}", e))
    }

    async fn record(&self, symbol: &str, tf: Timeframe, bars: &[Bar]) {
        let key = (symbol.to_uppercase(), tf);
        let mut last = self.last_written.lock().await;
        let from = last.get(&key).copied().unwrap_or(i64::MIN);
        let mut writer = self.writer.lock().await;
        for bar in bars.iter().filter(|b| b.time > from) {
            let record = BarRecord {
                symbol: key.0.clone(),
                timeframe: tf,
                bar: *bar,
            };
            match serde_json::to_string(&record) {
                Ok(json) => {
                    if let Err(e) = writeln!(writer, "{}", json) {
                        log::error!("Failed to write bar to recording file: {}", e);
                        return;
                    }
                }
                Err(e) => log::error!("Failed to serialize bar record: {}", e),
            }
        }
        if let Some(newest) = bars.iter().map(|b| b.time).max() {
            last.insert(key, newest.max(from));
        }
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn connect(&self) -> Result<(), String> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), String> {
        self.flush().await?;
        self.inner.disconnect().await
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    async fn server_time(&self) -> Result<i64, String> {
        self.inner.server_time().await
    }

    async fn account_info(&self) -> Result<AccountInfo, String> {
        self.inner.account_info().await
    }

    async fn positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, String> {
        self.inner.positions(symbol).await
    }

    async fn position(&self, ticket: u64) -> Result<Option<Position>, String> {
        self.inner.position(ticket).await
    }

    async fn orders(&self, symbol: Option<&str>) -> Result<Vec<PendingOrder>, String> {
        self.inner.orders(symbol).await
    }

    async fn order_history(&self, from: i64, to: i64) -> Result<Vec<PendingOrder>, String> {
        self.inner.order_history(from, to).await
    }

    async fn trade_history(&self, from: i64, to: i64) -> Result<Vec<Deal>, String> {
        self.inner.trade_history(from, to).await
    }

    async fn historical_data(&self, symbol: &str, tf: Timeframe, count: usize) -> Result<Vec<Bar>, String> {
        let bars = self.inner.historical_data(symbol, tf, count).await?;
        self.record(symbol, tf, &bars).await;
        Ok(bars)
    }

    async fn last_tick(&self, symbol: &str) -> Result<Tick, String> {
        self.inner.last_tick(symbol).await
    }

    async fn symbols_info(&self) -> Result<Vec<SymbolInfo>, String> {
        self.inner.symbols_info().await
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, String> {
        self.inner.symbol_info(symbol).await
    }

    async fn open_position(&self, request: OrderRequest) -> Result<OrderResult, String> {
        self.inner.open_position(request).await
    }

    async fn close_position(&self, ticket: u64, volume: Option<f64>) -> Result<OrderResult, String> {
        self.inner.close_position(ticket, volume).await
    }

    async fn modify_position(
        &self,
        ticket: u64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), String> {
        self.inner.modify_position(ticket, stop_loss, take_profit).await
    }

    async fn place_pending_order(&self, request: PendingOrderRequest) -> Result<OrderResult, String> {
        self.inner.place_pending_order(request).await
    }

    async fn cancel_order(&self, ticket: u64) -> Result<(), String> {
        self.inner.cancel_order(ticket).await
    }

    async fn calculate_margin(&self, symbol: &str, side: OrderSide, volume: f64) -> Result<f64, String> {
        self.inner.calculate_margin(symbol, side, volume).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaperBrokerConfig;
    use crate::connectors::PaperBroker;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "test_{}_{}",
            name,
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_csv_name() {
        let (symbol, tf) = parse_csv_name(Path::new("data/EURUSD_H1_20240105.csv")).unwrap();
        assert_eq!(symbol, "EURUSD");
        assert_eq!(tf, Timeframe::H1);
        assert!(parse_csv_name(Path::new("EURUSD.csv")).is_err());
        assert!(parse_csv_name(Path::new("EURUSD_H2.csv")).is_err());
    }

    #[test]
    fn test_csv_source_reads_bars() {
        let dir = temp_dir("replay_csv");
        let path = dir.join("gbpusd_M15.csv");
        std::fs::write(
            &path,
            "time,open,high,low,close,tick_volume,spread\n900,1.27,1.28,1.26,1.275,10,2\n0,1.26,1.27,1.25,1.27,12,2\n",
        )
        .unwrap();
        let records: Vec<BarRecord> = BarReplay::open(&[&path]).unwrap().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].symbol, "GBPUSD");
        assert_eq!(records[0].bar.time, 0);
        assert_eq!(records[1].bar.tick_volume, 10.0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_recording_broker_writes_new_bars_once() {
        let dir = temp_dir("recording");
        let paper = Arc::new(PaperBroker::new(PaperBrokerConfig::default()));
        let bars: Vec<Bar> = (0..5)
            .map(|i| Bar::new(i * 3600, 1.1, 1.11, 1.09, 1.1 + i as f64 * 0.001))
            .collect();
        paper.load_bars("EURUSD", Timeframe::H1, bars).await;
        paper.set_clock(3 * 3600).await;

        let path = dir.join("recorded.jsonl");
        let recorder = RecordingBroker::new(paper.clone(), &path).unwrap();
        assert_eq!(recorder.historical_data("EURUSD", Timeframe::H1, 10).await.unwrap().len(), 3);
        paper.set_clock(5 * 3600).await;
        assert_eq!(recorder.historical_data("EURUSD", Timeframe::H1, 10).await.unwrap().len(), 5);
        recorder.flush().await.unwrap();

        let loaded = load_bar_files(&[&path]).unwrap();
        let series = &loaded[&("EURUSD".to_string(), Timeframe::H1)];
        assert_eq!(series.len(), 5);
        let lines = std::fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, 5);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_resample_to_h1() {
        let bars = synthetic_bars(1.1, Timeframe::M15, 1_704_067_200, 9);
        let hourly = resample(&bars, Timeframe::H1);
        assert_eq!(hourly.len(), 3);
        assert_eq!(hourly[0].time, 1_704_067_200);
        assert_eq!(hourly[0].open, bars[0].open);
        assert_eq!(hourly[0].close, bars[3].close);
        let high = bars[..4].iter().map(|b| b.high).fold(f64::MIN, f64::max);
        assert_eq!(hourly[0].high, high);
        assert_eq!(hourly[2].close, bars[8].close);
        assert_eq!(hourly[0].tick_volume, 400.0);
    }
}
