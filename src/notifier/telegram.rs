// src/notifier/telegram.rs
//
// Telegram Bot API client, command parsing and the command router that turns
// operator messages and button presses into desk actions.

use super::{format_expiry, format_signal_confirmation, format_signal_info, format_trade_notification};
use crate::models::{OrderResult, Signal, SignalStatus};
use crate::store::{Store, TelegramMessageRecord};
use crate::traits::{Notifier, SharedBroker};
use crate::trading::{RiskParams, TradingDesk};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const API_BASE: &str = "https://api.telegram.org";
const POLL_ERROR_BACKOFF_SECS: u64 = 5;
const SIGNALS_LISTED: usize = 5;

// =============================================================================
// Bot API types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    pub date: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

/// One inline keyboard button.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Rows of inline buttons.
pub type Keyboard = Vec<Vec<Button>>;

fn confirmation_keyboard(signal_id: &str) -> Keyboard {
    vec![vec![
        Button::new("✅ Confirm", format!("confirm_{}", signal_id)),
        Button::new("❌ Reject", format!("reject_{}", signal_id)),
    ]]
}

// =============================================================================
// TelegramNotifier
// =============================================================================

pub struct TelegramNotifier {
    client: reqwest::Client,
    token: String,
    chat_id: i64,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: i64, poll_timeout_secs: u64) -> Result<Self, String> {
        // The HTTP timeout must outlast the long poll.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 10))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client, token, chat_id })
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, String> {
        let response = self
            .client
            .post(self.url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Telegram {} failed: {}", method, e))?;
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Telegram {} response: {}", method, e))?;
        if !parsed.ok {
            return Err(format!(
                "Telegram {} failed: {}",
                method,
                parsed.description.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        parsed
            .result
            .ok_or_else(|| format!("Telegram {} returned no result", method))
    }

    /// Sends a Markdown message, optionally with inline buttons.
    pub async fn send_to(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<Message, String> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = json!({ "inline_keyboard": keyboard });
        }
        self.call("sendMessage", body).await
    }

    pub async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), String> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<bool>("answerCallbackQuery", body).await.map(|_| ())
    }

    /// Long-polls for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, String> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(&self, text: &str) -> Result<(), String> {
        self.send_to(self.chat_id, text, None).await.map(|_| ())
    }

    async fn send_signal_confirmation(
        &self,
        signal: &Signal,
        risk: &RiskParams,
        timeout_secs: u64,
    ) -> Result<(), String> {
        let text = format_signal_confirmation(signal, risk, timeout_secs);
        self.send_to(self.chat_id, &text, Some(&confirmation_keyboard(&signal.id)))
            .await
            .map(|_| ())
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

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Status,
    Positions,
    Signals,
    /// Signal id, if one was given.
    Confirm(Option<String>),
    Reject(Option<String>),
    /// Ticket text, parsed by the router.
    Close(Option<String>),
    Settings,
    Help,
    Unknown(String),
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Command::Start => "start",
            Command::Status => "status",
            Command::Positions => "positions",
            Command::Signals => "signals",
            Command::Confirm(_) => "confirm",
            Command::Reject(_) => "reject",
            Command::Close(_) => "close",
            Command::Settings => "settings",
            Command::Help => "help",
            Command::Unknown(name) => name,
        }
    }
}

/// Parses `/name arg`, `/name_arg` and `/name@bot arg`. Returns None for plain text.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let body = text.strip_prefix('/')?;
    let (head, rest) = match body.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (body, ""),
    };
    let head = head.split('@').next().unwrap_or(head).to_lowercase();

    // `/confirm_abc` carries its argument after the first underscore.
    let (name, inline_arg) = match head.split_once('_') {
        Some((name, arg)) => (name.to_string(), Some(arg.to_string())),
        None => (head.clone(), None),
    };
    let arg = inline_arg
        .filter(|a| !a.is_empty())
        .or_else(|| rest.split_whitespace().next().map(str::to_string));

    let command = match name.as_str() {
        "start" => Command::Start,
        "status" | "durum" => Command::Status,
        "positions" | "pozisyonlar" => Command::Positions,
        "signals" | "sinyaller" => Command::Signals,
        "confirm" | "onay" => Command::Confirm(arg),
        "reject" | "red" => Command::Reject(arg),
        "close" | "kapat" => Command::Close(arg),
        "settings" | "ayarlar" => Command::Settings,
        "help" | "yardim" => Command::Help,
        _ => Command::Unknown(head),
    };
    Some(command)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
    Confirm(String),
    Reject(String),
    Close(u64),
    ToggleAutoTrade,
    SetThreshold(f64),
}

pub fn parse_callback(data: &str) -> Option<Callback> {
    if data == "toggle_auto_trade" {
        return Some(Callback::ToggleAutoTrade);
    }
    if let Some(n) = data.strip_prefix("set_threshold_") {
        return n.parse().ok().map(Callback::SetThreshold);
    }
    if let Some(id) = data.strip_prefix("confirm_") {
        return Some(Callback::Confirm(id.to_string()));
    }
    if let Some(id) = data.strip_prefix("reject_") {
        return Some(Callback::Reject(id.to_string()));
    }
    if let Some(ticket) = data.strip_prefix("close_") {
        return ticket.parse().ok().map(Callback::Close);
    }
    None
}

// =============================================================================
// CommandRouter
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

const HELP_TEXT: &str = "*Available Commands*\n\n\
/status - Account status\n\
/positions - Open positions\n\
/signals - Recent signals\n\
/confirm <id> - Confirm a signal\n\
/reject <id> - Reject a signal\n\
/close <ticket> - Close a position\n\
/settings - Trading settings\n\
/help - This message";

/// Answers operator commands from the one authorized chat.
pub struct CommandRouter {
    desk: Arc<TradingDesk>,
    broker: SharedBroker,
    authorized_chat: i64,
}

impl CommandRouter {
    pub fn new(desk: Arc<TradingDesk>, broker: SharedBroker, authorized_chat: i64) -> Self {
        Self {
            desk,
            broker,
            authorized_chat,
        }
    }

    pub fn is_authorized(&self, chat_id: i64) -> bool {
        chat_id == self.authorized_chat
    }

    /// Broker time, the clock confirmation deadlines were stamped with.
    pub async fn server_time(&self) -> i64 {
        self.broker
            .server_time()
            .await
            .unwrap_or_else(|_| chrono::Utc::now().timestamp())
    }

    /// Returns None for unauthorized chats and plain (non-command) text.
    pub async fn handle_command(&self, chat_id: i64, text: &str, now: i64) -> Option<Reply> {
        if !self.is_authorized(chat_id) {
            log::warn!("[Telegram] Ignoring message from unauthorized chat {}", chat_id);
            return None;
        }
        let command = parse_command(text)?;
        let reply = match command {
            Command::Start => Reply::text(format!(
                "🤖 *Forex Trading Bot*\n\nBot is running. Type /help for commands.\n\n{}",
                HELP_TEXT
            )),
            Command::Help => Reply::text(HELP_TEXT),
            Command::Status => self.status(now).await,
            Command::Positions => self.positions().await,
            Command::Signals => self.signals().await,
            Command::Settings => self.settings().await,
            Command::Confirm(Some(id)) => self.confirm(&id, now).await,
            Command::Confirm(None) => Reply::text("Usage: /confirm <signal_id>"),
            Command::Reject(Some(id)) => self.reject(&id, now).await,
            Command::Reject(None) => Reply::text("Usage: /reject <signal_id>"),
            Command::Close(Some(ticket)) => match ticket.parse::<u64>() {
                Ok(ticket) => self.close(ticket, now).await,
                Err(_) => Reply::text(format!("Invalid ticket: {}", ticket)),
            },
            Command::Close(None) => Reply::text("Usage: /close <ticket>"),
            Command::Unknown(name) => Reply::text(format!("Unknown command /{}. Type /help.", name)),
        };
        Some(reply)
    }

    /// Handles an inline button press.
    pub async fn handle_callback(&self, chat_id: i64, data: &str, now: i64) -> Option<Reply> {
        if !self.is_authorized(chat_id) {
            log::warn!("[Telegram] Ignoring callback from unauthorized chat {}", chat_id);
            return None;
        }
        let reply = match parse_callback(data) {
            Some(Callback::Confirm(id)) => self.confirm(&id, now).await,
            Some(Callback::Reject(id)) => self.reject(&id, now).await,
            Some(Callback::Close(ticket)) => self.close(ticket, now).await,
            Some(Callback::ToggleAutoTrade) => {
                let enabled = self.desk.toggle_auto_trade().await;
                let text = format!("Auto trading {}", if enabled { "enabled ✅" } else { "disabled ❌" });
                return Some(Reply::with_keyboard(text, self.settings_keyboard(enabled)));
            }
            Some(Callback::SetThreshold(threshold)) => match self.desk.set_threshold(threshold).await {
                Ok(()) => Reply::text(format!("Auto-trade threshold set to {:.0}%", threshold)),
                Err(e) => Reply::text(format!("❌ {}", e)),
            },
            None => Reply::text(format!("Unknown action: {}", data)),
        };
        Some(reply)
    }

    async fn status(&self, now: i64) -> Reply {
        let account = match self.broker.account_info().await {
            Ok(account) => account,
            Err(e) => return Reply::text(format!("❌ Failed to get account info: {}", e)),
        };
        let open = self.broker.positions(None).await.map(|p| p.len()).unwrap_or(0);
        let risk = self.desk.risk_manager().get_risk_summary(now).await;
        let settings = self.desk.settings().await;
        Reply::text(format!(
            "📊 *Account Status*\n\n\
             *Balance:* {:.2} {}\n\
             *Equity:* {:.2} {}\n\
             *Free Margin:* {:.2} {}\n\
             *Margin Level:* {:.2}%\n\
             *Open Positions:* {}\n\n\
             *Daily Risk:* {:.2}% / {:.2}%\n\
             *Weekly Risk:* {:.2}% / {:.2}%\n\
             *Trades Today:* {}\n\n\
             *Auto Trading:* {}",
            account.balance,
            account.currency,
            account.equity,
            account.currency,
            account.free_margin,
            account.currency,
            account.margin_level,
            open,
            risk.daily_risk,
            risk.max_daily_risk,
            risk.weekly_risk,
            risk.max_weekly_risk,
            risk.total_trades_today,
            if settings.auto_trade_enabled { "on" } else { "off" }
        ))
    }

    async fn positions(&self) -> Reply {
        let positions = match self.broker.positions(None).await {
            Ok(positions) => positions,
            Err(e) => return Reply::text(format!("❌ Failed to get positions: {}", e)),
        };
        if positions.is_empty() {
            return Reply::text("No open positions.");
        }
        let mut text = String::from("📈 *Open Positions*\n");
        let mut keyboard = Vec::new();
        for p in &positions {
            let marker = if p.profit >= 0.0 { "🟢" } else { "🔴" };
            text.push_str(&format!(
                "\n{} *{}* {} {:.2} lots\nTicket: {}\nOpen: {:.5}  Now: {:.5}\nP/L: {:.2}\n",
                marker,
                p.symbol,
                p.side.to_string().to_uppercase(),
                p.volume,
                p.ticket,
                p.open_price,
                p.current_price,
                p.profit
            ));
            keyboard.push(vec![Button::new(
                format!("Close {} #{}", p.symbol, p.ticket),
                format!("close_{}", p.ticket),
            )]);
        }
        Reply::with_keyboard(text, keyboard)
    }

    async fn signals(&self) -> Reply {
        let history = self.desk.signal_generator().lock().await.get_signal_history(SIGNALS_LISTED);
        if history.is_empty() {
            return Reply::text("No signals yet.");
        }
        let mut text = String::from("📡 *Recent Signals*\n");
        for s in history.iter().rev() {
            text.push_str(&format!(
                "\n*{}* {} {:.1}% ({})\nID: {}\n",
                s.symbol,
                s.direction.to_string().to_uppercase(),
                s.success_probability,
                s.status,
                s.id
            ));
        }
        let keyboard: Keyboard = history
            .iter()
            .rev()
            .filter(|s| s.status == SignalStatus::Pending)
            .flat_map(|s| confirmation_keyboard(&s.id))
            .collect();
        if keyboard.is_empty() {
            Reply::text(text)
        } else {
            Reply::with_keyboard(text, keyboard)
        }
    }

    fn settings_keyboard(&self, enabled: bool) -> Keyboard {
        let toggle = if enabled { "Disable auto trading" } else { "Enable auto trading" };
        vec![
            vec![Button::new(toggle, "toggle_auto_trade")],
            crate::trading::desk::THRESHOLD_CHOICES
                .iter()
                .map(|t| Button::new(format!("{:.0}%", t), format!("set_threshold_{:.0}", t)))
                .collect(),
        ]
    }

    async fn settings(&self) -> Reply {
        let settings = self.desk.settings().await;
        let risk = self.desk.risk_manager().config();
        let text = format!(
            "⚙️ *Trading Settings*\n\n\
             *Auto Trading:* {}\n\
             *Threshold:* {:.0}%\n\
             *Confirmation Required:* {}\n\
             *Confirmation Timeout:* {} min\n\n\
             *Max Risk per Trade:* {:.1}%\n\
             *Max Daily Risk:* {:.1}%\n\
             *Max Weekly Risk:* {:.1}%\n\
             *Max Open Positions:* {}",
            if settings.auto_trade_enabled { "on" } else { "off" },
            settings.auto_trade_threshold,
            if settings.confirmation_required { "yes" } else { "no" },
            settings.confirmation_timeout_secs / 60,
            risk.max_risk_percent,
            risk.max_daily_risk_percent,
            risk.max_weekly_risk_percent,
            risk.max_open_positions
        );
        Reply::with_keyboard(text, self.settings_keyboard(settings.auto_trade_enabled))
    }

    async fn confirm(&self, signal_id: &str, now: i64) -> Reply {
        match self.desk.confirm(signal_id, now).await {
            Ok(result) => Reply::text(format!(
                "✅ Signal confirmed. Ticket {} at {:.5}",
                result.ticket, result.price
            )),
            Err(e) => Reply::text(format!("❌ {}", e)),
        }
    }

    async fn reject(&self, signal_id: &str, now: i64) -> Reply {
        match self.desk.reject(signal_id, now).await {
            Ok(signal) => Reply::text(format!("Signal {} {} rejected.", signal.symbol, signal.id)),
            Err(e) => Reply::text(format!("❌ {}", e)),
        }
    }

    async fn close(&self, ticket: u64, now: i64) -> Reply {
        match self.desk.close_position(ticket, now).await {
            Ok(result) => Reply::text(format!("Position {} closed at {:.5}", ticket, result.price)),
            Err(e) => Reply::text(format!("❌ Failed to close {}: {}", ticket, e)),
        }
    }
}

// =============================================================================
// Polling
// =============================================================================

async fn record_message(store: &Store, message: &Message, command: Option<&Command>) -> Option<u64> {
    let record = TelegramMessageRecord {
        id: 0,
        message_id: message.message_id,
        chat_id: message.chat.id,
        username: message.from.as_ref().and_then(|u| u.username.clone()),
        text: message.text.clone().unwrap_or_default(),
        timestamp: message.date,
        is_command: command.is_some(),
        command: command.map(|c| c.name().to_string()),
        responded: false,
        response_text: None,
    };
    match store.add_telegram_message(record).await {
        Ok(id) => Some(id),
        Err(e) => {
            log::warn!("[Telegram] Failed to store message: {}", e);
            None
        }
    }
}

async fn handle_update(bot: &TelegramNotifier, router: &CommandRouter, store: Option<&Store>, update: Update) {
    let now = router.server_time().await;

    if let Some(query) = update.callback_query {
        let data = query.data.clone().unwrap_or_default();
        let chat_id = query.message.as_ref().map(|m| m.chat.id).unwrap_or(query.from.id);
        let reply = router.handle_callback(chat_id, &data, now).await;
        if let Err(e) = bot.answer_callback(&query.id, None).await {
            log::debug!("[Telegram] {}", e);
        }
        if let Some(reply) = reply {
            if let Err(e) = bot.send_to(chat_id, &reply.text, reply.keyboard.as_ref()).await {
                log::warn!("[Telegram] Failed to reply: {}", e);
            }
        }
        return;
    }

    let Some(message) = update.message else {
        return;
    };
    let Some(text) = message.text.as_deref() else {
        return;
    };
    let command = parse_command(text);
    let stored_id = match store {
        Some(store) if router.is_authorized(message.chat.id) => {
            record_message(store, &message, command.as_ref()).await
        }
        _ => None,
    };
    let Some(reply) = router.handle_command(message.chat.id, text, now).await else {
        return;
    };
    match bot.send_to(message.chat.id, &reply.text, reply.keyboard.as_ref()).await {
        Ok(_) => {
            if let (Some(store), Some(id)) = (store, stored_id) {
                if let Err(e) = store.update_telegram_message(id, &reply.text).await {
                    log::warn!("[Telegram] Failed to store reply: {}", e);
                }
            }
        }
        Err(e) => log::warn!("[Telegram] Failed to reply: {}", e),
    }
}

/// Long-polls for updates until the task is aborted.
pub async fn run_polling(
    bot: Arc<TelegramNotifier>,
    router: CommandRouter,
    store: Option<Arc<Store>>,
    poll_timeout_secs: u64,
) {
    log::info!("[Telegram] Polling for commands");
    let mut offset = 0;
    loop {
        match bot.get_updates(offset, poll_timeout_secs).await {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    handle_update(&bot, &router, store.as_deref(), update).await;
                }
            }
            Err(e) => {
                log::warn!("[Telegram] {}", e);
                tokio::time::sleep(Duration::from_secs(POLL_ERROR_BACKOFF_SECS)).await;
            }
        }
    }
}
