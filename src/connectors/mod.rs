// src/connectors/mod.rs

pub mod bridge;
pub mod paper;
pub mod replay;

pub use bridge::BridgeBroker;
pub use paper::PaperBroker;
pub use replay::{load_bar_files, resample, synthetic_bars, BarRecord, RecordingBroker};

use std::future::Future;
use std::time::Duration;

/// Trade server return code for a completed request.
pub const RETCODE_DONE: u32 = 10009;
pub const RETCODE_PLACED: u32 = 10008;

/// Human-readable text for a trade server return code.
pub fn retcode_description(code: u32) -> String {
    let text = match code {
        10004 => "Requote",
        10006 => "Request rejected",
        10007 => "Request canceled by trader",
        10008 => "Order placed",
        10009 => "Request completed",
        10010 => "Only part of the request was completed",
        10011 => "Request processing error",
        10012 => "Request canceled by timeout",
        10013 => "Invalid request",
        10014 => "Invalid volume in the request",
        10015 => "Invalid price in the request",
        10016 => "Invalid stops in the request",
        10017 => "Trade is disabled",
        10018 => "Market is closed",
        10019 => "There is not enough money to complete the request",
        10020 => "Prices changed",
        10021 => "There are no quotes to process the request",
        10022 => "Invalid order expiration date in the request",
        10023 => "Order state changed",
        10024 => "Too frequent requests",
        10025 => "No changes in request",
        10026 => "Autotrading disabled by server",
        10027 => "Autotrading disabled by client terminal",
        10028 => "Request locked for processing",
        10029 => "Order or position frozen",
        10030 => "Invalid order filling type",
        10031 => "No connection with the trade server",
        10032 => "Operation is allowed only for live accounts",
        10033 => "The number of pending orders has reached the limit",
        10034 => "The volume of orders and positions for the symbol has reached the limit",
        10035 => "Incorrect or prohibited order type",
        10036 => "Position with the specified identifier has already been closed",
        other => return format!("Unknown return code: {}", other),
    };
    text.to_string()
}

/// Retry policy for transient broker failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
            backoff: 2.0,
        }
    }
}

/// Runs `op` until it succeeds or the attempts are used up, sleeping
/// `delay * backoff^n` between tries. Returns the last error.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut delay = policy.delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.attempts.max(1) => {
                return Err(format!("{} failed after {} attempts: {}", what, attempt, e));
            }
            Err(e) => {
                log::warn!("{} failed (attempt {}/{}): {}", what, attempt, policy.attempts, e);
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(policy.backoff);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retcode_description() {
        assert_eq!(retcode_description(RETCODE_DONE), "Request completed");
        assert_eq!(retcode_description(10019), "There is not enough money to complete the request");
        assert_eq!(retcode_description(1), "Unknown return code: 1");
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
            backoff: 2.0,
        };
        let result = with_retry(policy, "flaky", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("timeout".to_string())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let policy = RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(1),
            backoff: 1.0,
        };
        let result: Result<(), String> = with_retry(policy, "down", || async { Err("refused".to_string()) }).await;
        let err = result.unwrap_err();
        assert!(err.contains("after 2 attempts"));
        assert!(err.contains("refused"));
    }
}
