// src/notifier/mod.rs

//! Operator notifications. Message bodies are Markdown and shared by every
//! notifier so the log output matches what Telegram shows.

pub mod telegram;

pub use telegram::{CommandRouter, TelegramNotifier};

use crate::models::{Direction, OrderResult, Signal};
use crate::traits::Notifier;
use crate::trading::RiskParams;
use async_trait::async_trait;

fn direction_marker(direction: Direction) -> &'static str {
    match direction {
        Direction::Buy => "🟢",
        Direction::Sell => "🔴",
        Direction::Neutral => "⚪",
    }
}

fn upper(direction: Direction) -> String {
    direction.to_string().to_uppercase()
}

pub fn format_signal_confirmation(signal: &Signal, risk: &RiskParams, timeout_secs: u64) -> String {
    format!(
        "🚨 *NEW TRADE SIGNAL* 🚨\n\n\
         {} *{}* - {}\n\n\
         *Entry:* {:.5}\n\
         *Stop Loss:* {:.5}\n\
         *Take Profit:* {:.5}\n\
         *Success Probability:* {:.1}%\n\
         *Risk/Reward:* {:.2}\n\
         *Lots:* {:.2}\n\
         *Risk:* {:.2} ({:.2}%)\n\n\
         Confirm: /confirm {}\n\
         Reject: /reject {}\n\n\
         ⏰ Reply within {} minutes",
        direction_marker(signal.direction),
        signal.symbol,
        upper(signal.direction),
        signal.entry_price,
        signal.stop_loss,
        signal.take_profit,
        signal.success_probability,
        signal.risk_reward,
        risk.lot_size,
        risk.risk_amount,
        risk.risk_percent,
        signal.id,
        signal.id,
        timeout_secs / 60
    )
}

pub fn format_signal_info(signal: &Signal) -> String {
    let mut text = format!(
        "ℹ️ *Signal* {} *{}* - {}\n\n\
         *Entry:* {:.5}\n\
         *Stop Loss:* {:.5}\n\
         *Take Profit:* {:.5}\n\
         *Success Probability:* {:.1}%\n\
         *Risk/Reward:* {:.2}",
        direction_marker(signal.direction),
        signal.symbol,
        upper(signal.direction),
        signal.entry_price,
        signal.stop_loss,
        signal.take_profit,
        signal.success_probability,
        signal.risk_reward
    );
    if !signal.key_patterns.is_empty() {
        text.push_str("\n\n*Patterns:*");
        for pattern in signal.key_patterns.iter().take(5) {
            text.push_str(&format!("\n• {}", pattern));
        }
    }
    text
}

pub fn format_trade_notification(signal: &Signal, result: &OrderResult) -> String {
    format!(
        "✅ *Position Opened*\n\n\
         *{}* - {}\n\
         Entry: {:.5}\n\
         Stop Loss: {:.5}\n\
         Take Profit: {:.5}\n\
         Lots: {:.2}\n\
         Ticket: {}",
        signal.symbol,
        upper(signal.direction),
        result.price,
        signal.stop_loss,
        signal.take_profit,
        result.volume,
        result.ticket
    )
}

pub fn format_expiry(signal: &Signal) -> String {
    format!(
        "⏰ *Signal Expired*\n\n*{}* - {}\nSignal ID: {}",
        signal.symbol,
        upper(signal.direction),
        signal.id
    )
}

/// Writes notifications to the log. Used when Telegram is not configured and in backtests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_message(&self, text: &str) -> Result<(), String> {
        log::info!("[Notify] {}", text);
        Ok(())
    }

    async fn send_signal_confirmation(
        &self,
        signal: &Signal,
        risk: &RiskParams,
        timeout_secs: u64,
    ) -> Result<(), String> {
        self.send_message(&format_signal_confirmation(signal, risk, timeout_secs)).await
    }

    async fn send_signal_info(&self, signal: &Signal) -> Result<(), String> {
        self.send_message(&format_signal_info(signal)).await
    }

    async fn send_trade_notification(&self, signal: &Signal, result: &OrderResult) -> Result<(), String> {
        self.send_message(&format_trade_notification(signal, result)).await
    }

    async fn send_expiry(&self, signal: &Signal) -> Result<(), String> {
        self.send_message(&format_expiry(signal)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalStatus;

    fn signal() -> Signal {
        Signal {
            id: "abc".to_string(),
            symbol: "GBPUSD".to_string(),
            direction: Direction::Sell,
            strength: 65.0,
            success_probability: 72.5,
            entry_price: 1.27,
            stop_loss: 1.275,
            take_profit: 1.26,
            risk_reward: 2.0,
            timestamp: 0,
            status: SignalStatus::Pending,
            timeframes: Vec::new(),
            key_patterns: vec!["SMC: Premium Zone".to_string()],
            nearest_support: None,
            nearest_resistance: None,
            predicted_change: None,
            execution: None,
            status_updated_at: None,
        }
    }

    #[test]
    fn test_confirmation_text() {
        let risk = RiskParams {
            lot_size: 0.3,
            risk_amount: 150.0,
            risk_percent: 1.5,
            ..RiskParams::default()
        };
        let text = format_signal_confirmation(&signal(), &risk, 300);
        assert!(text.contains("*GBPUSD* - SELL"));
        assert!(text.contains("/confirm abc"));
        assert!(text.contains("*Lots:* 0.30"));
        assert!(text.contains("5 minutes"));
    }

    #[test]
    fn test_info_lists_patterns() {
        assert!(format_signal_info(&signal()).contains("• SMC: Premium Zone"));
    }
}
