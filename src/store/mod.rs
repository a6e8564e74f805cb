// src/store/mod.rs
//
// Append-only JSON-lines tables under `{data_dir}/db/`. Each table is loaded
// into memory on open; inserts append a line, updates rewrite the file.

use crate::config::local_time;
use crate::models::{Deal, OrderSide, Signal, SignalStatus};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Lots below this count as fully closed.
const VOLUME_EPSILON: f64 = 1e-9;

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: u64,
    pub ticket: u64,
    pub signal_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub open_time: i64,
    pub close_time: Option<i64>,
    pub status: TradeStatus,
    /// Lots closed so far by partial or full closing deals.
    #[serde(default)]
    pub closed_volume: f64,
    pub profit_loss: Option<f64>,
    #[serde(default)]
    pub swap: f64,
    #[serde(default)]
    pub notes: String,
}

impl TradeRecord {
    /// A fresh open trade; the id is assigned on insert.
    pub fn opened(
        ticket: u64,
        signal_id: Option<String>,
        symbol: &str,
        side: OrderSide,
        volume: f64,
        entry_price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        open_time: i64,
    ) -> Self {
        Self {
            id: 0,
            ticket,
            signal_id,
            symbol: symbol.to_string(),
            side,
            volume,
            entry_price,
            exit_price: None,
            stop_loss,
            take_profit,
            open_time,
            close_time: None,
            status: TradeStatus::Open,
            closed_volume: 0.0,
            profit_loss: None,
            swap: 0.0,
            notes: String::new(),
        }
    }
}

/// Daily trading statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub date: NaiveDate,
    pub trades_count: usize,
    pub win_count: usize,
    pub loss_count: usize,
    pub profit_loss: f64,
    pub win_rate: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformanceRecord {
    pub id: u64,
    pub symbol: String,
    pub model_name: String,
    pub timestamp: i64,
    pub accuracy: f64,
    pub direction_accuracy: f64,
    pub mse: f64,
    pub mae: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: u64,
    pub timestamp: i64,
    pub level: String,
    pub message: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramMessageRecord {
    pub id: u64,
    pub message_id: i64,
    pub chat_id: i64,
    pub username: Option<String>,
    pub text: String,
    pub timestamp: i64,
    pub is_command: bool,
    pub command: Option<String>,
    pub responded: bool,
    pub response_text: Option<String>,
}

// =============================================================================
// Filters
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub symbol: Option<String>,
    pub status: Option<SignalStatus>,
    /// Unix seconds, inclusive.
    pub since: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub symbol: Option<String>,
    pub status: Option<TradeStatus>,
    pub signal_id: Option<String>,
    pub since: Option<i64>,
}

// =============================================================================
// Table
// =============================================================================

struct Table<T> {
    path: PathBuf,
    rows: Vec<T>,
}

impl<T: Serialize + DeserializeOwned> Table<T> {
    fn open(path: PathBuf) -> Result<Self, String> {
        let mut rows = Vec::new();
        if path.exists() {
            let file = File::open(&path).map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
            for (n, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
                if line.trim().is_empty() {
                    continue;
                }
                let row = serde_json::from_str(&line)
                    .map_err(|e| format!("Failed to parse {}:{}: {}", path.display(), n + 1, e))?;
                rows.push(row);
            }
        }
        Ok(Self { path, rows })
    }

    fn append(&mut self, row: T) -> Result<(), String> {
        let line = serde_json::to_string(&row).map_err(|e| format!("Failed to serialize row: {}", e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| format!("Failed to open {}: {}", self.path.display(), e))?;
        writeln!(file, "{}", line).map_err(|e| format!("Failed to write {}: {}", self.path.display(), e))?;
        self.rows.push(row);
        Ok(())
    }

    fn rewrite(&self) -> Result<(), String> {
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let file = File::create(&tmp).map_err(|e| format!("Failed to create {}: {}", tmp.display(), e))?;
            let mut writer = BufWriter::new(file);
            for row in &self.rows {
                let line = serde_json::to_string(row).map_err(|e| format!("Failed to serialize row: {}", e))?;
                writeln!(writer, "{}", line).map_err(|e| format!("Failed to write {}: {}", tmp.display(), e))?;
            }
            writer
                .flush()
                .map_err(|e| format!("Failed to flush {}: {}", tmp.display(), e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| format!("Failed to replace {}: {}", self.path.display(), e))
    }

    /// Applies `f` to the first row matching `pred` and persists. False when none matched.
    fn update<P, F>(&mut self, pred: P, f: F) -> Result<bool, String>
    where
        P: Fn(&T) -> bool,
        F: FnOnce(&mut T),
    {
        match self.rows.iter_mut().find(|r| pred(r)) {
            Some(row) => {
                f(row);
                self.rewrite()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Newest-first rows matching `pred`, at most `limit`.
    fn newest<P: Fn(&T) -> bool>(&self, pred: P, limit: usize) -> Vec<&T> {
        self.rows.iter().rev().filter(|r| pred(r)).take(limit).collect()
    }
}

fn next_id<T>(rows: &[T], id: impl Fn(&T) -> u64) -> u64 {
    rows.iter().map(id).max().unwrap_or(0) + 1
}

struct Tables {
    signals: Table<Signal>,
    trades: Table<TradeRecord>,
    performance: Table<PerformanceRecord>,
    model_performance: Table<ModelPerformanceRecord>,
    logs: Table<LogRecord>,
    telegram_messages: Table<TelegramMessageRecord>,
}

// =============================================================================
// Store
// =============================================================================

pub struct Store {
    dir: PathBuf,
    /// Calendar used to bucket closed trades into days.
    tz: Tz,
    tables: Mutex<Tables>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, String> {
        let dir = data_dir.as_ref().join("db");
        fs::create_dir_all(&dir).map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
        let table = |name: &str| dir.join(format!("{}.jsonl", name));
        let tables = Tables {
            signals: Table::open(table("signals"))?,
            trades: Table::open(table("trades"))?,
            performance: Table::open(table("performance"))?,
            model_performance: Table::open(table("model_performance"))?,
            logs: Table::open(table("logs"))?,
            telegram_messages: Table::open(table("telegram_messages"))?,
        };
        log::info!(
            "[Store] Opened {} ({} signals, {} trades)",
            dir.display(),
            tables.signals.rows.len(),
            tables.trades.rows.len()
        );
        Ok(Self {
            dir,
            tz: chrono_tz::UTC,
            tables: Mutex::new(tables),
        })
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // -------------------------------------------------------------------------
    // Signals
    // -------------------------------------------------------------------------

    pub async fn add_signal(&self, signal: &Signal) -> Result<(), String> {
        self.tables.lock().await.signals.append(signal.clone())
    }

    /// Replaces the stored copy of a signal. False when the id is unknown.
    pub async fn update_signal(&self, signal: &Signal) -> Result<bool, String> {
        let mut tables = self.tables.lock().await;
        tables
            .signals
            .update(|s| s.id == signal.id, |s| *s = signal.clone())
    }

    pub async fn get_signal(&self, id: &str) -> Option<Signal> {
        let tables = self.tables.lock().await;
        tables.signals.rows.iter().find(|s| s.id == id).cloned()
    }

    pub async fn get_signals(&self, filter: &SignalFilter, limit: usize) -> Vec<Signal> {
        let tables = self.tables.lock().await;
        tables
            .signals
            .newest(
                |s| {
                    filter.symbol.as_deref().map_or(true, |sym| s.symbol == sym)
                        && filter.status.map_or(true, |st| s.status == st)
                        && filter.since.map_or(true, |t| s.timestamp >= t)
                },
                limit,
            )
            .into_iter()
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Trades
    // -------------------------------------------------------------------------

    /// Inserts a trade and returns its id.
    pub async fn add_trade(&self, mut trade: TradeRecord) -> Result<u64, String> {
        let mut tables = self.tables.lock().await;
        trade.id = next_id(&tables.trades.rows, |t| t.id);
        let id = trade.id;
        tables.trades.append(trade)?;
        Ok(id)
    }

    pub async fn update_trade<F: FnOnce(&mut TradeRecord)>(&self, id: u64, f: F) -> Result<bool, String> {
        self.tables.lock().await.trades.update(|t| t.id == id, f)
    }

    /// Books a closing deal against the open trade with the deal's position
    /// ticket. The trade stays open until the closed volume covers what was
    /// opened. Returns the trade's status afterwards, or None when no open
    /// trade matches.
    pub async fn close_trade_from_deal(&self, deal: &Deal) -> Result<Option<TradeStatus>, String> {
        let mut status = None;
        self.tables.lock().await.trades.update(
            |t| t.ticket == deal.position_ticket && t.status == TradeStatus::Open,
            |t| {
                t.closed_volume += deal.volume;
                t.exit_price = Some(deal.close_price);
                t.profit_loss = Some(t.profit_loss.unwrap_or(0.0) + deal.profit);
                if !deal.comment.is_empty() {
                    t.notes = deal.comment.clone();
                }
                if t.closed_volume >= t.volume - VOLUME_EPSILON {
                    t.status = TradeStatus::Closed;
                    t.close_time = Some(deal.close_time);
                }
                status = Some(t.status);
            },
        )?;
        Ok(status)
    }

    pub async fn get_trade(&self, id: u64) -> Option<TradeRecord> {
        let tables = self.tables.lock().await;
        tables.trades.rows.iter().find(|t| t.id == id).cloned()
    }

    pub async fn get_trades(&self, filter: &TradeFilter, limit: usize) -> Vec<TradeRecord> {
        let tables = self.tables.lock().await;
        tables
            .trades
            .newest(
                |t| {
                    filter.symbol.as_deref().map_or(true, |sym| t.symbol == sym)
                        && filter.status.map_or(true, |st| t.status == st)
                        && filter
                            .signal_id
                            .as_deref()
                            .map_or(true, |id| t.signal_id.as_deref() == Some(id))
                        && filter.since.map_or(true, |since| t.open_time >= since)
                },
                limit,
            )
            .into_iter()
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Performance
    // -------------------------------------------------------------------------

    /// Recomputes the statistics of trades closed on `date` (in the store's
    /// timezone) and upserts them.
    pub async fn update_performance(&self, date: NaiveDate) -> Result<PerformanceRecord, String> {
        let tz = self.tz;
        let mut tables = self.tables.lock().await;
        let profits: Vec<f64> = tables
            .trades
            .rows
            .iter()
            .filter(|t| t.status == TradeStatus::Closed)
            .filter(|t| {
                t.close_time
                    .is_some_and(|ts| local_time(tz, ts).date_naive() == date)
            })
            .map(|t| t.profit_loss.unwrap_or(0.0))
            .collect();
        let record = performance_from_profits(date, &profits);

        let updated = {
            let r = record.clone();
            tables.performance.update(|p| p.date == date, |p| *p = r)?
        };
        if !updated {
            tables.performance.append(record.clone())?;
        }
        Ok(record)
    }

    /// Daily records within `[from, to]`, oldest first.
    pub async fn get_performance(&self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Vec<PerformanceRecord> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<PerformanceRecord> = tables
            .performance
            .rows
            .iter()
            .filter(|p| from.map_or(true, |f| p.date >= f) && to.map_or(true, |t| p.date <= t))
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.date);
        rows
    }

    // -------------------------------------------------------------------------
    // Models, logs, Telegram
    // -------------------------------------------------------------------------

    pub async fn add_model_performance(&self, mut record: ModelPerformanceRecord) -> Result<u64, String> {
        let mut tables = self.tables.lock().await;
        record.id = next_id(&tables.model_performance.rows, |r| r.id);
        let id = record.id;
        tables.model_performance.append(record)?;
        Ok(id)
    }

    pub async fn get_model_performance(&self, symbol: Option<&str>, limit: usize) -> Vec<ModelPerformanceRecord> {
        let tables = self.tables.lock().await;
        tables
            .model_performance
            .newest(|r| symbol.map_or(true, |s| r.symbol == s), limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn add_log(&self, level: &str, message: &str, source: Option<&str>, timestamp: i64) -> Result<u64, String> {
        let mut tables = self.tables.lock().await;
        let record = LogRecord {
            id: next_id(&tables.logs.rows, |r| r.id),
            timestamp,
            level: level.to_uppercase(),
            message: message.to_string(),
            source: source.map(str::to_string),
        };
        let id = record.id;
        tables.logs.append(record)?;
        Ok(id)
    }

    pub async fn get_logs(&self, level: Option<&str>, limit: usize) -> Vec<LogRecord> {
        let tables = self.tables.lock().await;
        tables
            .logs
            .newest(|r| level.map_or(true, |l| r.level.eq_ignore_ascii_case(l)), limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn add_telegram_message(&self, mut record: TelegramMessageRecord) -> Result<u64, String> {
        let mut tables = self.tables.lock().await;
        record.id = next_id(&tables.telegram_messages.rows, |r| r.id);
        let id = record.id;
        tables.telegram_messages.append(record)?;
        Ok(id)
    }

    /// Records the reply sent for a stored message.
    pub async fn update_telegram_message(&self, id: u64, response_text: &str) -> Result<bool, String> {
        let mut tables = self.tables.lock().await;
        tables.telegram_messages.update(
            |r| r.id == id,
            |r| {
                r.responded = true;
                r.response_text = Some(response_text.to_string());
            },
        )
    }

    pub async fn get_telegram_messages(&self, chat_id: Option<i64>, limit: usize) -> Vec<TelegramMessageRecord> {
        let tables = self.tables.lock().await;
        tables
            .telegram_messages
            .newest(|r| chat_id.map_or(true, |c| r.chat_id == c), limit)
            .into_iter()
            .cloned()
            .collect()
    }
}

pub fn performance_from_profits(date: NaiveDate, profits: &[f64]) -> PerformanceRecord {
    let wins: Vec<f64> = profits.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = profits.iter().copied().filter(|p| *p < 0.0).collect();
    let avg = |v: &[f64]| if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 };
    PerformanceRecord {
        date,
        trades_count: profits.len(),
        win_count: wins.len(),
        loss_count: losses.len(),
        profit_loss: profits.iter().sum(),
        win_rate: if profits.is_empty() {
            0.0
        } else {
            wins.len() as f64 / profits.len() as f64 * 100.0
        },
        average_win: avg(&wins),
        average_loss: avg(&losses),
        largest_win: wins.iter().copied().fold(0.0, f64::max),
        largest_loss: losses.iter().copied().fold(0.0, f64::min),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::{TimeZone, Utc};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "test_{}_{}",
            name,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn signal(id: &str, symbol: &str, timestamp: i64) -> Signal {
        Signal {
            id: id.to_string(),
            symbol: symbol.to_string(),
            direction: Direction::Buy,
            strength: 70.0,
            success_probability: 75.0,
            entry_price: 1.1,
            stop_loss: 1.09,
            take_profit: 1.12,
            risk_reward: 2.0,
            timestamp,
            status: SignalStatus::Pending,
            timeframes: Vec::new(),
            key_patterns: Vec::new(),
            nearest_support: None,
            nearest_resistance: None,
            predicted_change: None,
            execution: None,
            status_updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_signals_persist_and_filter() {
        let dir = temp_dir("store_signals");
        {
            let store = Store::open(&dir).unwrap();
            store.add_signal(&signal("a", "EURUSD", 100)).await.unwrap();
            store.add_signal(&signal("b", "GBPUSD", 200)).await.unwrap();
            let mut c = signal("c", "EURUSD", 300);
            store.add_signal(&c).await.unwrap();
            c.status = SignalStatus::Rejected;
            assert!(store.update_signal(&c).await.unwrap());
        }

        let store = Store::open(&dir).unwrap();
        let all = store.get_signals(&SignalFilter::default(), 10).await;
        assert_eq!(all.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["c", "b", "a"]);
        let eur = store
            .get_signals(
                &SignalFilter {
                    symbol: Some("EURUSD".to_string()),
                    status: Some(SignalStatus::Pending),
                    since: None,
                },
                10,
            )
            .await;
        assert_eq!(eur.len(), 1);
        assert_eq!(eur[0].id, "a");
        assert_eq!(store.get_signal("c").await.unwrap().status, SignalStatus::Rejected);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_trade_close_and_daily_performance() {
        let dir = temp_dir("store_trades");
        let store = Store::open(&dir).unwrap();
        let day = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap().timestamp();

        for (ticket, profit) in [(1000u64, 40.0), (1001, -20.0), (1002, 10.0)] {
            let trade = TradeRecord::opened(ticket, None, "EURUSD", OrderSide::Buy, 0.1, 1.1, None, None, day);
            store.add_trade(trade).await.unwrap();
            let deal = Deal {
                ticket: ticket + 100,
                position_ticket: ticket,
                symbol: "EURUSD".to_string(),
                side: OrderSide::Buy,
                volume: 0.1,
                open_price: 1.1,
                close_price: 1.1 + profit / 10_000.0,
                profit,
                open_time: day,
                close_time: day + 3600,
                comment: String::new(),
            };
            assert_eq!(store.close_trade_from_deal(&deal).await.unwrap(), Some(TradeStatus::Closed));
        }

        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let perf = store.update_performance(date).await.unwrap();
        assert_eq!(perf.trades_count, 3);
        assert_eq!(perf.win_count, 2);
        assert!((perf.profit_loss - 30.0).abs() < 1e-9);
        assert!((perf.largest_loss + 20.0).abs() < 1e-9);
        assert!((perf.average_win - 25.0).abs() < 1e-9);

        store.update_performance(date).await.unwrap();
        assert_eq!(store.get_performance(None, None).await.len(), 1);
        let closed = store
            .get_trades(
                &TradeFilter {
                    status: Some(TradeStatus::Closed),
                    ..Default::default()
                },
                2,
            )
            .await;
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].ticket, 1002);
        let _ = fs::remove_dir_all(&dir);
    }

    fn closing_deal(ticket: u64, volume: f64, profit: f64, close_time: i64) -> Deal {
        Deal {
            ticket: ticket + 100,
            position_ticket: ticket,
            symbol: "EURUSD".to_string(),
            side: OrderSide::Buy,
            volume,
            open_price: 1.1,
            close_price: 1.1 + profit / 10_000.0,
            profit,
            open_time: close_time - 3600,
            close_time,
            comment: String::new(),
        }
    }

    #[tokio::test]
    async fn test_partial_close_keeps_trade_open() {
        let dir = temp_dir("store_partial");
        let store = Store::open(&dir).unwrap();
        let trade = TradeRecord::opened(7, None, "EURUSD", OrderSide::Buy, 0.3, 1.1, None, None, 1_000);
        let id = store.add_trade(trade).await.unwrap();

        let first = closing_deal(7, 0.1, 15.0, 5_000);
        assert_eq!(store.close_trade_from_deal(&first).await.unwrap(), Some(TradeStatus::Open));
        let open = store.get_trade(id).await.unwrap();
        assert_eq!(open.status, TradeStatus::Open);
        assert_eq!(open.close_time, None);
        assert!((open.closed_volume - 0.1).abs() < 1e-12);

        let rest = closing_deal(7, 0.2, -5.0, 9_000);
        assert_eq!(store.close_trade_from_deal(&rest).await.unwrap(), Some(TradeStatus::Closed));
        let closed = store.get_trade(id).await.unwrap();
        assert_eq!(closed.close_time, Some(9_000));
        assert_eq!(closed.profit_loss, Some(10.0));
        assert_eq!(store.close_trade_from_deal(&rest).await.unwrap(), None);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_performance_day_in_store_timezone() {
        let dir = temp_dir("store_tz");
        let store = Store::open(&dir).unwrap().with_timezone(chrono_tz::Europe::Istanbul);
        // 22:30 UTC on March 4 is 01:30 on March 5 in Istanbul.
        let late = Utc.with_ymd_and_hms(2024, 3, 4, 22, 30, 0).unwrap().timestamp();
        let trade = TradeRecord::opened(9, None, "EURUSD", OrderSide::Buy, 0.1, 1.1, None, None, late - 3600);
        store.add_trade(trade).await.unwrap();
        store.close_trade_from_deal(&closing_deal(9, 0.1, 12.0, late)).await.unwrap();

        let utc_day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let local_day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(store.update_performance(utc_day).await.unwrap().trades_count, 0);
        assert_eq!(store.update_performance(local_day).await.unwrap().trades_count, 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_logs_and_messages() {
        let dir = temp_dir("store_logs");
        let store = Store::open(&dir).unwrap();
        store.add_log("info", "started", Some("engine"), 1).await.unwrap();
        store.add_log("error", "scan failed", Some("engine"), 2).await.unwrap();
        let errors = store.get_logs(Some("ERROR"), 10).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "scan failed");

        let id = store
            .add_telegram_message(TelegramMessageRecord {
                id: 0,
                message_id: 5,
                chat_id: 42,
                username: None,
                text: "/status".to_string(),
                timestamp: 3,
                is_command: true,
                command: Some("status".to_string()),
                responded: false,
                response_text: None,
            })
            .await
            .unwrap();
        assert!(store.update_telegram_message(id, "ok").await.unwrap());
        let messages = store.get_telegram_messages(Some(42), 10).await;
        assert!(messages[0].responded);
        let _ = fs::remove_dir_all(&dir);
    }
}
