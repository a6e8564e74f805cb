// src/prediction/mod.rs
//
// Next-bar return forecaster. A ridge regression over lagged returns and a few
// indicator features, fitted in closed form and persisted as JSON per
// symbol/timeframe.

use crate::config::PredictionConfig;
use crate::indicators::{bollinger, closes, macd, mean, rsi_series, true_ranges};
use crate::models::{Bar, Direction, Timeframe};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Bars skipped before the first feature row (Bollinger window).
const WARMUP: usize = 20;
const RSI_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
/// Errors below this count as accurate in `ModelMetrics::accuracy`.
const ACCURACY_BAND: f64 = 0.001;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub mse: f64,
    pub mae: f64,
    /// Share of test rows where the predicted sign matches the actual sign.
    pub direction_accuracy: f64,
    /// Share of test rows with absolute error under 0.1%.
    pub accuracy: f64,
    pub train_samples: usize,
    pub test_samples: usize,
}

/// A fitted model as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeModel {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub lags: usize,
    pub alpha: f64,
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
    /// Coefficients on standardized features.
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub trained_at: i64,
    pub metrics: ModelMetrics,
}

impl RidgeModel {
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        row.iter()
            .zip(&self.feature_means)
            .zip(&self.feature_stds)
            .zip(&self.coefficients)
            .map(|(((x, m), s), c)| (x - m) / s * c)
            .sum::<f64>()
            + self.intercept
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    /// 0..100
    pub confidence: f64,
    /// Predicted next-bar change as a fraction.
    pub predicted_change: f64,
    pub last_price: f64,
    pub forecast_1h: f64,
    pub forecast_4h: f64,
    pub forecast_24h: f64,
}

// =============================================================================
// Features
// =============================================================================

/// Feature row for bar `i`: `lags` returns (newest first), RSI/100, MACD
/// histogram relative to price, Bollinger %B and ATR relative to price.
fn feature_row(
    bars: &[Bar],
    closes: &[f64],
    rsi: &[f64],
    hist: &[f64],
    tr: &[f64],
    i: usize,
    lags: usize,
) -> Vec<f64> {
    let mut row = Vec::with_capacity(lags + 4);
    for l in 0..lags {
        let (cur, prev) = (closes[i - l], closes[i - l - 1]);
        row.push(if prev != 0.0 { cur / prev - 1.0 } else { 0.0 });
    }
    let price = bars[i].close;
    row.push(if rsi[i].is_nan() { 0.5 } else { rsi[i] / 100.0 });
    row.push(if price != 0.0 { hist[i] / price } else { 0.0 });
    let percent_b = bollinger(&closes[..=i], WARMUP, 2.0)
        .filter(|b| b.upper > b.lower)
        .map(|b| (price - b.lower) / (b.upper - b.lower))
        .unwrap_or(0.5);
    row.push(percent_b);
    let atr = mean(&tr[i + 1 - ATR_PERIOD..=i]);
    row.push(if price != 0.0 { atr / price } else { 0.0 });
    row
}

/// Feature rows for every bar from the warmup on, with the index of the first row.
pub fn feature_matrix(bars: &[Bar], lags: usize) -> (usize, Vec<Vec<f64>>) {
    let start = WARMUP.max(lags + 1);
    if bars.len() <= start {
        return (start, Vec::new());
    }
    let c = closes(bars);
    let rsi = rsi_series(&c, RSI_PERIOD);
    let hist = macd(&c, 12, 26, 9).histogram;
    let tr = true_ranges(bars);
    let rows = (start..bars.len())
        .map(|i| feature_row(bars, &c, &rsi, &hist, &tr, i, lags))
        .collect();
    (start, rows)
}

/// Rows paired with the next bar's fractional change.
pub fn training_set(bars: &[Bar], lags: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    let (start, mut rows) = feature_matrix(bars, lags);
    if rows.is_empty() {
        return (rows, Vec::new());
    }
    rows.pop();
    let targets = (start..bars.len() - 1)
        .map(|i| {
            let (cur, next) = (bars[i].close, bars[i + 1].close);
            if cur != 0.0 {
                next / cur - 1.0
            } else {
                0.0
            }
        })
        .collect();
    (rows, targets)
}

// =============================================================================
// Ridge Regression
// =============================================================================

struct Fit {
    means: Vec<f64>,
    stds: Vec<f64>,
    coefficients: Vec<f64>,
    intercept: f64,
}

fn to_array(rows: &[Vec<f64>]) -> Result<Array2<f64>, String> {
    let cols = rows.first().map(|r| r.len()).unwrap_or(0);
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), cols), flat)
        .map_err(|e| format!("Failed to shape feature matrix: {}", e))
}

/// Closed-form ridge on standardized features: (X'X + aI) b = X'y.
fn fit_ridge(rows: &[Vec<f64>], targets: &[f64], alpha: f64) -> Result<Fit, String> {
    if rows.is_empty() {
        return Err("No training rows".to_string());
    }
    let x = to_array(rows)?;
    let y = Array1::from(targets.to_vec());
    let means = x
        .mean_axis(Axis(0))
        .ok_or_else(|| "Empty feature matrix".to_string())?;
    let stds = x.std_axis(Axis(0), 0.0).mapv(|s| if s < 1e-12 { 1.0 } else { s });
    let y_mean = y.mean().unwrap_or(0.0);

    let xs = (&x - &means) / &stds;
    let yc = &y - y_mean;

    let mut a = xs.t().dot(&xs);
    for i in 0..a.nrows() {
        a[[i, i]] += alpha;
    }
    let b = xs.t().dot(&yc);
    let coefficients = cholesky_solve(&a, &b)?;

    Ok(Fit {
        means: means.to_vec(),
        stds: stds.to_vec(),
        coefficients: coefficients.to_vec(),
        intercept: y_mean,
    })
}

fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, String> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return Err("Matrix not positive definite".to_string());
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * z[j]).sum();
        z[i] = (b[i] - sum) / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (z[i] - sum) / l[[i, i]];
    }
    Ok(x)
}

fn score(model: &RidgeModel, rows: &[Vec<f64>], targets: &[f64]) -> (f64, f64, f64, f64) {
    if rows.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let n = rows.len() as f64;
    let (mut se, mut ae, mut hits, mut close) = (0.0, 0.0, 0.0, 0.0);
    for (row, y) in rows.iter().zip(targets) {
        let p = model.predict_row(row);
        let err = p - y;
        se += err * err;
        ae += err.abs();
        if p.signum() == y.signum() {
            hits += 1.0;
        }
        if err.abs() < ACCURACY_BAND {
            close += 1.0;
        }
    }
    (se / n, ae / n, hits / n, close / n)
}

/// Direction and 0..100 confidence for a predicted change.
pub fn interpret(change: f64, threshold: f64) -> (Direction, f64) {
    let scaled = if threshold > 0.0 {
        change.abs() / threshold * 50.0
    } else {
        0.0
    };
    if change > threshold {
        (Direction::Buy, scaled.min(100.0))
    } else if change < -threshold {
        (Direction::Sell, scaled.min(100.0))
    } else {
        (Direction::Neutral, scaled)
    }
}

// =============================================================================
// Predictor
// =============================================================================

pub struct Predictor {
    config: PredictionConfig,
    models: HashMap<String, RidgeModel>,
}

impl Predictor {
    pub fn new(config: PredictionConfig) -> Self {
        Self {
            config,
            models: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    fn key(symbol: &str, tf: Timeframe) -> String {
        format!("{}_{}", symbol, tf)
    }

    fn model_path(&self, symbol: &str, tf: Timeframe) -> PathBuf {
        PathBuf::from(&self.config.model_dir).join(format!("{}.json", Self::key(symbol, tf)))
    }

    /// Fits a model on `bars`, scores it on the last 20% and saves it.
    pub fn train(&mut self, symbol: &str, tf: Timeframe, bars: &[Bar]) -> Result<ModelMetrics, String> {
        if bars.len() < self.config.min_training_bars {
            return Err(format!(
                "Not enough bars to train {} {}: {} < {}",
                symbol,
                tf,
                bars.len(),
                self.config.min_training_bars
            ));
        }
        let (rows, targets) = training_set(bars, self.config.lags);
        let split = rows.len() * 4 / 5;
        if split == 0 || split == rows.len() {
            return Err(format!("Not enough feature rows to train {} {}", symbol, tf));
        }

        let fit = fit_ridge(&rows[..split], &targets[..split], self.config.ridge_alpha)?;
        let mut model = RidgeModel {
            symbol: symbol.to_string(),
            timeframe: tf,
            lags: self.config.lags,
            alpha: self.config.ridge_alpha,
            feature_means: fit.means,
            feature_stds: fit.stds,
            coefficients: fit.coefficients,
            intercept: fit.intercept,
            trained_at: chrono::Utc::now().timestamp(),
            metrics: ModelMetrics::default(),
        };
        let (mse, mae, direction_accuracy, accuracy) = score(&model, &rows[split..], &targets[split..]);
        model.metrics = ModelMetrics {
            mse,
            mae,
            direction_accuracy,
            accuracy,
            train_samples: split,
            test_samples: rows.len() - split,
        };

        log::info!(
            "[Predictor] Trained {} {}: mse {:.3e}, direction accuracy {:.1}%",
            symbol,
            tf,
            mse,
            direction_accuracy * 100.0
        );
        self.save(&model)?;
        let metrics = model.metrics.clone();
        self.models.insert(Self::key(symbol, tf), model);
        Ok(metrics)
    }

    fn save(&self, model: &RidgeModel) -> Result<(), String> {
        let path = self.model_path(&model.symbol, model.timeframe);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create model dir {}: {}", dir.display(), e))?;
        }
        let json = serde_json::to_string_pretty(model)
            .map_err(|e| format!("Failed to serialize model: {}", e))?;
        std::fs::write(&path, json).map_err(|e| format!("Failed to write {}: {}", path.display(), e))
    }

    /// Loads a stored model into the cache. Ok(false) when no file exists.
    pub fn load(&mut self, symbol: &str, tf: Timeframe) -> Result<bool, String> {
        let path = self.model_path(symbol, tf);
        if !path.exists() {
            return Ok(false);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let model: RidgeModel = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;
        if model.coefficients.len() != model.lags + 4 {
            return Err(format!("Model {} has {} coefficients", path.display(), model.coefficients.len()));
        }
        log::info!("[Predictor] Loaded model {}", path.display());
        self.models.insert(Self::key(symbol, tf), model);
        Ok(true)
    }

    pub fn model(&self, symbol: &str, tf: Timeframe) -> Option<&RidgeModel> {
        self.models.get(&Self::key(symbol, tf))
    }

    fn ensure_model(&mut self, symbol: &str, tf: Timeframe, bars: &[Bar]) -> Result<(), String> {
        if self.models.contains_key(&Self::key(symbol, tf)) || self.load(symbol, tf)? {
            return Ok(());
        }
        log::info!("[Predictor] No model for {} {}, training", symbol, tf);
        self.train(symbol, tf, bars).map(|_| ())
    }

    /// Forecast from the latest bar in `bars` (on the configured timeframe).
    pub fn predict(&mut self, symbol: &str, bars: &[Bar]) -> Result<Prediction, String> {
        let tf = self.config.timeframe;
        self.ensure_model(symbol, tf, bars)?;
        let model = self
            .models
            .get(&Self::key(symbol, tf))
            .ok_or_else(|| format!("No model for {} {}", symbol, tf))?;

        let (_, rows) = feature_matrix(bars, model.lags);
        let row = rows
            .last()
            .ok_or_else(|| format!("Not enough bars to predict {} {}", symbol, tf))?;
        let last_price = bars.last().map(|b| b.close).unwrap_or_default();
        let change = model.predict_row(row);
        let (direction, confidence) = interpret(change, self.config.direction_threshold);

        Ok(Prediction {
            symbol: symbol.to_string(),
            timeframe: tf,
            direction,
            confidence,
            predicted_change: change,
            last_price,
            forecast_1h: last_price * (1.0 + change),
            forecast_4h: last_price * (1.0 + change * 2.0),
            forecast_24h: last_price * (1.0 + change * 4.0),
        })
    }

    /// Re-scores a stored model on the last 20% of `bars`.
    pub fn evaluate(&mut self, symbol: &str, bars: &[Bar]) -> Result<ModelMetrics, String> {
        let tf = self.config.timeframe;
        if !self.models.contains_key(&Self::key(symbol, tf)) && !self.load(symbol, tf)? {
            return Err(format!("No stored model for {} {}", symbol, tf));
        }
        let model = self
            .models
            .get(&Self::key(symbol, tf))
            .ok_or_else(|| format!("No model for {} {}", symbol, tf))?;
        let (rows, targets) = training_set(bars, model.lags);
        let split = rows.len() * 4 / 5;
        let (mse, mae, direction_accuracy, accuracy) = score(model, &rows[split..], &targets[split..]);
        Ok(ModelMetrics {
            mse,
            mae,
            direction_accuracy,
            accuracy,
            train_samples: split,
            test_samples: rows.len() - split,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::bars_from;

    fn config(dir: &std::path::Path) -> PredictionConfig {
        PredictionConfig {
            model_dir: dir.to_string_lossy().to_string(),
            ..PredictionConfig::default()
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "test_{}_{}",
            name,
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    fn wave(n: usize) -> Vec<Bar> {
        bars_from(n, 0.0005, |i| 1.1 + 0.01 * (i as f64 * 0.3).sin())
    }

    #[test]
    fn test_interpret_band() {
        let (d, c) = interpret(0.003, 0.001);
        assert_eq!(d, Direction::Buy);
        assert_eq!(c, 100.0);
        let (d, c) = interpret(-0.0015, 0.001);
        assert_eq!(d, Direction::Sell);
        assert!((c - 75.0).abs() < 1e-9);
        let (d, c) = interpret(0.0005, 0.001);
        assert_eq!(d, Direction::Neutral);
        assert!((c - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_feature_rows_align_with_targets() {
        let bars = wave(60);
        let (rows, targets) = training_set(&bars, 10);
        assert_eq!(rows.len(), targets.len());
        assert_eq!(rows.len(), 60 - 21);
        assert_eq!(rows[0].len(), 14);
    }

    #[test]
    fn test_ridge_recovers_linear_target() {
        let rows: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let targets: Vec<f64> = rows.iter().map(|r| 2.0 * r[0] - r[1] + 3.0).collect();
        let fit = fit_ridge(&rows, &targets, 1e-9).unwrap();
        let coef: Vec<f64> = fit.coefficients.iter().zip(&fit.stds).map(|(c, s)| c / s).collect();
        assert!((coef[0] - 2.0).abs() < 1e-4);
        assert!((coef[1] + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_train_predict_and_reload() {
        let dir = temp_dir("predictor");
        let bars = wave(300);

        let mut predictor = Predictor::new(config(&dir));
        let metrics = predictor.train("EURUSD", Timeframe::H1, &bars).unwrap();
        assert!(metrics.test_samples > 0);
        assert!(metrics.direction_accuracy > 0.6);
        assert!(dir.join("EURUSD_H1.json").exists());
        let first = predictor.predict("EURUSD", &bars).unwrap();

        let mut fresh = Predictor::new(config(&dir));
        let second = fresh.predict("EURUSD", &bars).unwrap();
        assert!((first.predicted_change - second.predicted_change).abs() < 1e-12);
        assert!((second.forecast_4h - second.last_price * (1.0 + 2.0 * second.predicted_change)).abs() < 1e-12);

        let eval = fresh.evaluate("EURUSD", &bars).unwrap();
        assert_eq!(eval.test_samples, metrics.test_samples);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_train_requires_history() {
        let dir = temp_dir("predictor_short");
        let mut predictor = Predictor::new(config(&dir));
        assert!(predictor.train("EURUSD", Timeframe::H1, &wave(50)).is_err());
        assert!(predictor.evaluate("EURUSD", &wave(50)).is_err());
    }
}
