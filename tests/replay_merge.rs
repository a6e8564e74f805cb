// tests/replay_merge.rs

use chrono::Utc;
use forex_bot::connectors::replay::BarReplay;
use forex_bot::connectors::{load_bar_files, BarRecord};
use forex_bot::models::{Bar, Timeframe};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

fn record(symbol: &str, timeframe: Timeframe, time: i64) -> BarRecord {
    BarRecord {
        symbol: symbol.to_string(),
        timeframe,
        bar: Bar::new(time, 1.1, 1.2, 1.0, 1.15),
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "test_{}_{}",
        name,
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_jsonl(path: &PathBuf, records: &[BarRecord]) {
    let mut f = File::create(path).unwrap();
    for r in records {
        writeln!(f, "{}", serde_json::to_string(r).unwrap()).unwrap();
    }
}

#[test]
fn test_multi_file_merge_by_close_time() {
    let dir = temp_dir("replay_merge");
    let hourly = dir.join("hourly.jsonl");
    let quarter = dir.join("quarter.jsonl");

    // H1 bars close at 3600 and 7200.
    write_jsonl(&hourly, &[record("EURUSD", Timeframe::H1, 0), record("EURUSD", Timeframe::H1, 3600)]);
    // M15 bars close at 2700, 3600 and 5400.
    write_jsonl(
        &quarter,
        &[
            record("GBPUSD", Timeframe::M15, 1800),
            record("GBPUSD", Timeframe::M15, 2700),
            record("GBPUSD", Timeframe::M15, 4500),
        ],
    );

    let order: Vec<(String, i64)> = BarReplay::open(&[&hourly, &quarter])
        .unwrap()
        .map(|r| (r.symbol.clone(), r.close_time()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("GBPUSD".to_string(), 2700),
            // Tie at 3600 goes to the file listed first.
            ("EURUSD".to_string(), 3600),
            ("GBPUSD".to_string(), 3600),
            ("GBPUSD".to_string(), 5400),
            ("EURUSD".to_string(), 7200),
        ]
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_load_mixed_csv_and_jsonl() {
    let dir = temp_dir("replay_mixed");
    let csv_path = dir.join("EURUSD_H1_2024.csv");
    let mut f = File::create(&csv_path).unwrap();
    writeln!(f, "time,open,high,low,close,tick_volume,spread").unwrap();
    writeln!(f, "7200,1.1,1.2,1.0,1.15,10,1").unwrap();
    writeln!(f, "0,1.1,1.2,1.0,1.15,10,1").unwrap();
    drop(f);

    let jsonl_path = dir.join("extra.jsonl");
    let mut f = File::create(&jsonl_path).unwrap();
    writeln!(f, "{}", serde_json::to_string(&record("eurusd", Timeframe::H1, 3600)).unwrap()).unwrap();
    writeln!(f, "not json").unwrap();
    writeln!(f).unwrap();
    writeln!(f, "{}", serde_json::to_string(&record("EURUSD", Timeframe::H1, 7200)).unwrap()).unwrap();
    drop(f);

    let loaded = load_bar_files(&[&csv_path, &jsonl_path]).unwrap();
    assert_eq!(loaded.len(), 1);
    let times: Vec<i64> = loaded[&("EURUSD".to_string(), Timeframe::H1)].iter().map(|b| b.time).collect();
    assert_eq!(times, vec![0, 3600, 7200]);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_missing_file_fails() {
    let dir = temp_dir("replay_missing");
    assert!(load_bar_files(&[dir.join("nope.jsonl")]).is_err());
    let _ = fs::remove_dir_all(&dir);
}
