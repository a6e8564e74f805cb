// src/connectors/paper.rs
//
// In-memory broker for paper trading and backtests. Prices come from loaded
// bars: a bar becomes visible once it has closed at the broker clock, and the
// current price of a symbol is the close of its finest visible bar.

use super::{retcode_description, RETCODE_DONE, RETCODE_PLACED};
use crate::config::PaperBrokerConfig;
use crate::models::{
    AccountInfo, Bar, Deal, OrderRequest, OrderResult, OrderSide, PendingKind, PendingOrder,
    PendingOrderRequest, Position, SymbolInfo, Tick, Timeframe,
};
use crate::traits::Broker;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

const FIRST_TICKET: u64 = 1000;
const VOLUME_EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct PaperState {
    connected: bool,
    /// Broker time in unix seconds; wall clock when None.
    clock: Option<i64>,
    balance: f64,
    next_ticket: u64,
    bars: HashMap<String, BTreeMap<Timeframe, Vec<Bar>>>,
    symbols: HashMap<String, SymbolInfo>,
    positions: Vec<Position>,
    orders: Vec<PendingOrder>,
    order_history: Vec<PendingOrder>,
    deals: Vec<Deal>,
}

/// Simulated account that fills market orders at the current price and
/// triggers stops and pending orders as the clock advances.
pub struct PaperBroker {
    config: PaperBrokerConfig,
    state: Mutex<PaperState>,
}

// =============================================================================
// Pure helpers
// =============================================================================

fn visible_len(bars: &[Bar], tf: Timeframe, clock: i64) -> usize {
    bars.partition_point(|b| b.time + tf.seconds() <= clock)
}

/// Converts an amount in the symbol's profit currency into the account currency.
fn to_account_currency(info: &SymbolInfo, amount: f64, price: f64, account_currency: &str) -> f64 {
    if info.currency_profit.eq_ignore_ascii_case(account_currency) || info.currency_profit.is_empty() {
        amount
    } else if info.currency_base.eq_ignore_ascii_case(account_currency) && price > 0.0 {
        amount / price
    } else {
        amount
    }
}

pub fn position_profit(
    info: &SymbolInfo,
    side: OrderSide,
    volume: f64,
    open_price: f64,
    close_price: f64,
    account_currency: &str,
) -> f64 {
    let raw = (close_price - open_price) * side.sign() * volume * info.contract_size;
    to_account_currency(info, raw, close_price, account_currency)
}

pub fn margin_required(info: &SymbolInfo, volume: f64, price: f64, leverage: u32, account_currency: &str) -> f64 {
    let leverage = leverage.max(1) as f64;
    if info.currency_base.eq_ignore_ascii_case(account_currency) {
        volume * info.contract_size * info.margin_rate / leverage
    } else {
        let notional = volume * info.contract_size * price * info.margin_rate;
        to_account_currency(info, notional, price, account_currency) / leverage
    }
}

/// Exit price if the bar touches the position's stop loss or take profit.
/// The stop is checked first.
fn stop_hit(pos: &Position, bar: &Bar) -> Option<(f64, &'static str)> {
    match pos.side {
        OrderSide::Buy => {
            if let Some(sl) = pos.stop_loss.filter(|sl| bar.low <= *sl) {
                return Some((sl, "sl"));
            }
            pos.take_profit.filter(|tp| bar.high >= *tp).map(|tp| (tp, "tp"))
        }
        OrderSide::Sell => {
            if let Some(sl) = pos.stop_loss.filter(|sl| bar.high >= *sl) {
                return Some((sl, "sl"));
            }
            pos.take_profit.filter(|tp| bar.low <= *tp).map(|tp| (tp, "tp"))
        }
    }
}

fn pending_triggered(order: &PendingOrder, bar: &Bar) -> bool {
    match order.kind {
        PendingKind::BuyLimit | PendingKind::SellStop => bar.low <= order.price,
        PendingKind::SellLimit | PendingKind::BuyStop => bar.high >= order.price,
    }
}

fn normalize_volume(info: &SymbolInfo, volume: f64) -> Result<f64, String> {
    let step = if info.volume_step > 0.0 { info.volume_step } else { 0.01 };
    let normalized = ((volume / step) + 1e-9).floor() * step;
    if normalized + VOLUME_EPSILON < info.volume_min || normalized > info.volume_max + VOLUME_EPSILON {
        return Err(format!(
            "{}: volume {} outside {}..{}",
            retcode_description(10014),
            volume,
            info.volume_min,
            info.volume_max
        ));
    }
    Ok((normalized * 1e8).round() / 1e8)
}

// =============================================================================
// State
// =============================================================================

impl PaperState {
    fn now(&self) -> i64 {
        self.clock.unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    fn info(&self, symbol: &str) -> SymbolInfo {
        self.symbols
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| SymbolInfo::standard(symbol))
    }

    fn visible(&self, symbol: &str, tf: Timeframe) -> &[Bar] {
        let now = self.now();
        self.bars
            .get(symbol)
            .and_then(|m| m.get(&tf))
            .map(|bars| &bars[..visible_len(bars, tf, now)])
            .unwrap_or(&[])
    }

    /// Close and time of the latest visible bar on the finest loaded timeframe.
    fn last_quote(&self, symbol: &str) -> Option<(f64, i64)> {
        let now = self.now();
        let frames = self.bars.get(symbol)?;
        let (tf, bars) = frames.iter().find(|(tf, bars)| visible_len(bars, **tf, now) > 0)?;
        let bar = bars[visible_len(bars, *tf, now) - 1];
        Some((bar.close, bar.time + tf.seconds()))
    }

    fn price(&self, symbol: &str) -> Result<f64, String> {
        self.last_quote(symbol)
            .map(|(p, _)| p)
            .ok_or_else(|| format!("{} for {}", retcode_description(10021), symbol))
    }

    fn take_ticket(&mut self) -> u64 {
        let t = self.next_ticket;
        self.next_ticket += 1;
        t
    }

    fn mark(&self, pos: &Position, currency: &str) -> Position {
        let mut marked = pos.clone();
        if let Ok(price) = self.price(&pos.symbol) {
            marked.current_price = price;
            marked.profit = position_profit(
                &self.info(&pos.symbol),
                pos.side,
                pos.volume,
                pos.open_price,
                price,
                currency,
            );
        }
        marked
    }

    fn used_margin(&self, leverage: u32, currency: &str) -> f64 {
        self.positions
            .iter()
            .map(|p| {
                let price = self.price(&p.symbol).unwrap_or(p.open_price);
                margin_required(&self.info(&p.symbol), p.volume, price, leverage, currency)
            })
            .sum()
    }

    fn floating(&self, currency: &str) -> f64 {
        self.positions.iter().map(|p| self.mark(p, currency).profit).sum()
    }

    /// Realizes `volume` lots of position `idx` at `price`.
    fn close_part(&mut self, idx: usize, volume: f64, price: f64, comment: &str, currency: &str) -> Deal {
        let info = self.info(&self.positions[idx].symbol);
        let now = self.now();
        let ticket = self.take_ticket();
        let pos = &mut self.positions[idx];
        let volume = volume.min(pos.volume);
        let profit = position_profit(&info, pos.side, volume, pos.open_price, price, currency);
        let deal = Deal {
            ticket,
            position_ticket: pos.ticket,
            symbol: pos.symbol.clone(),
            side: pos.side,
            volume,
            open_price: pos.open_price,
            close_price: price,
            profit,
            open_time: pos.open_time,
            close_time: now,
            comment: comment.to_string(),
        };
        pos.volume -= volume;
        if pos.volume <= VOLUME_EPSILON {
            self.positions.remove(idx);
        }
        self.balance += profit;
        self.deals.push(deal.clone());
        deal
    }

    #[allow(clippy::too_many_arguments)]
    fn fill(
        &mut self,
        symbol: &str,
        side: OrderSide,
        volume: f64,
        price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        magic: i64,
        comment: &str,
        config: &PaperBrokerConfig,
    ) -> Result<OrderResult, String> {
        let info = self.info(symbol);
        let volume = normalize_volume(&info, volume)?;

        if config.netting {
            if let Some(idx) = self.positions.iter().position(|p| p.symbol == symbol && p.side != side) {
                let existing = self.positions[idx].volume;
                let deal = self.close_part(idx, volume, price, comment, &config.currency);
                let remainder = volume - existing;
                if remainder <= VOLUME_EPSILON {
                    return Ok(OrderResult {
                        ticket: deal.ticket,
                        price,
                        volume,
                        retcode: RETCODE_DONE,
                        comment: retcode_description(RETCODE_DONE),
                    });
                }
                return self.fill(symbol, side, remainder, price, stop_loss, take_profit, magic, comment, config);
            }
        }

        let equity = self.balance + self.floating(&config.currency);
        let required = margin_required(&info, volume, price, config.leverage, &config.currency);
        let free = equity - self.used_margin(config.leverage, &config.currency);
        if required > free {
            return Err(format!(
                "{}: need {:.2}, free {:.2}",
                retcode_description(10019),
                required,
                free
            ));
        }

        let now = self.now();
        if config.netting {
            if let Some(pos) = self.positions.iter_mut().find(|p| p.symbol == symbol && p.side == side) {
                let total = pos.volume + volume;
                pos.open_price = (pos.open_price * pos.volume + price * volume) / total;
                pos.volume = total;
                if stop_loss.is_some() {
                    pos.stop_loss = stop_loss;
                }
                if take_profit.is_some() {
                    pos.take_profit = take_profit;
                }
                return Ok(OrderResult {
                    ticket: pos.ticket,
                    price,
                    volume,
                    retcode: RETCODE_DONE,
                    comment: retcode_description(RETCODE_DONE),
                });
            }
        }

        let ticket = self.take_ticket();
        self.positions.push(Position {
            ticket,
            symbol: symbol.to_string(),
            side,
            volume,
            open_price: price,
            current_price: price,
            stop_loss,
            take_profit,
            profit: 0.0,
            swap: 0.0,
            open_time: now,
            magic,
            comment: comment.to_string(),
        });
        Ok(OrderResult {
            ticket,
            price,
            volume,
            retcode: RETCODE_DONE,
            comment: retcode_description(RETCODE_DONE),
        })
    }
}

// =============================================================================
// PaperBroker
// =============================================================================

impl PaperBroker {
    pub fn new(config: PaperBrokerConfig) -> Self {
        let balance = config.initial_balance;
        Self {
            config,
            state: Mutex::new(PaperState {
                connected: false,
                clock: None,
                balance,
                next_ticket: FIRST_TICKET,
                bars: HashMap::new(),
                symbols: HashMap::new(),
                positions: Vec::new(),
                orders: Vec::new(),
                order_history: Vec::new(),
                deals: Vec::new(),
            }),
        }
    }

    /// Adds bars for a symbol/timeframe, merged by time with any already loaded.
    pub async fn load_bars(&self, symbol: &str, tf: Timeframe, bars: Vec<Bar>) {
        let symbol = symbol.to_uppercase();
        let mut state = self.state.lock().await;
        let series = state.bars.entry(symbol.clone()).or_default().entry(tf).or_default();
        series.extend(bars);
        series.sort_by_key(|b| b.time);
        series.dedup_by_key(|b| b.time);
        if !state.symbols.contains_key(&symbol) {
            state.symbols.insert(symbol.clone(), SymbolInfo::standard(&symbol));
        }
    }

    pub async fn set_symbol_info(&self, info: SymbolInfo) {
        self.state.lock().await.symbols.insert(info.name.clone(), info);
    }

    pub async fn clock(&self) -> i64 {
        self.state.lock().await.now()
    }

    /// Sets the clock without processing stops (initial positioning).
    pub async fn set_clock(&self, clock: i64) {
        self.state.lock().await.clock = Some(clock);
    }

    /// Every distinct bar close time of `tf` across symbols, ascending.
    pub async fn close_times(&self, tf: Timeframe) -> Vec<i64> {
        let state = self.state.lock().await;
        let mut times: Vec<i64> = state
            .bars
            .values()
            .filter_map(|m| m.get(&tf))
            .flat_map(|bars| bars.iter().map(|b| b.time + tf.seconds()))
            .collect();
        times.sort_unstable();
        times.dedup();
        times
    }

    pub async fn balance(&self) -> f64 {
        self.state.lock().await.balance
    }

    /// Moves the clock forward, replaying every newly closed bar of each
    /// symbol's finest timeframe against pending orders and stops.
    /// Returns the deals closed by stop loss or take profit.
    pub async fn advance_to(&self, clock: i64) -> Vec<Deal> {
        let mut state = self.state.lock().await;
        let prev = state.now();
        if clock <= prev && state.clock.is_some() {
            return Vec::new();
        }
        state.clock = Some(clock);

        let mut new_bars: Vec<(String, Bar, i64)> = Vec::new();
        for (symbol, frames) in &state.bars {
            if let Some((tf, bars)) = frames.iter().next() {
                let from = visible_len(bars, *tf, prev);
                let to = visible_len(bars, *tf, clock);
                for bar in &bars[from..to] {
                    new_bars.push((symbol.clone(), *bar, bar.time + tf.seconds()));
                }
            }
        }
        new_bars.sort_by_key(|(_, _, close)| *close);

        let currency = self.config.currency.clone();
        let mut closed = Vec::new();
        for (symbol, bar, close_time) in new_bars {
            // Fills and closes on this bar are stamped with its close.
            state.clock = Some(close_time);
            // Expired pending orders leave the book before the bar is checked.
            let (expired, live): (Vec<PendingOrder>, Vec<PendingOrder>) = std::mem::take(&mut state.orders)
                .into_iter()
                .partition(|o| o.expiration.is_some_and(|e| e <= close_time));
            state.orders = live;
            state.order_history.extend(expired);

            let triggered: Vec<PendingOrder> = state
                .orders
                .iter()
                .filter(|o| o.symbol == symbol && pending_triggered(o, &bar))
                .cloned()
                .collect();
            for order in triggered {
                state.orders.retain(|o| o.ticket != order.ticket);
                let side = order.kind.side();
                match state.fill(
                    &symbol,
                    side,
                    order.volume,
                    order.price,
                    order.stop_loss,
                    order.take_profit,
                    0,
                    &order.comment,
                    &self.config,
                ) {
                    Ok(r) => log::info!("[Paper] Pending order {} filled as position {}", order.ticket, r.ticket),
                    Err(e) => log::warn!("[Paper] Pending order {} could not fill: {}", order.ticket, e),
                }
                state.order_history.push(order);
            }

            let mut idx = 0;
            while idx < state.positions.len() {
                let pos = &state.positions[idx];
                if pos.symbol == symbol && pos.open_time < close_time {
                    if let Some((price, reason)) = stop_hit(pos, &bar) {
                        let volume = pos.volume;
                        let ticket = pos.ticket;
                        let deal = state.close_part(idx, volume, price, reason, &currency);
                        log::info!(
                            "[Paper] Position {} closed by {} at {:.5}: {:.2}",
                            ticket,
                            reason,
                            price,
                            deal.profit
                        );
                        closed.push(deal);
                        continue;
                    }
                }
                idx += 1;
            }
        }
        state.clock = Some(clock);
        closed
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    async fn connect(&self) -> Result<(), String> {
        self.state.lock().await.connected = true;
        log::info!("[Paper] Connected (balance {:.2} {})", self.balance().await, self.config.currency);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), String> {
        self.state.lock().await.connected = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    async fn server_time(&self) -> Result<i64, String> {
        Ok(self.clock().await)
    }

    async fn account_info(&self) -> Result<AccountInfo, String> {
        let state = self.state.lock().await;
        let equity = state.balance + state.floating(&self.config.currency);
        let margin = state.used_margin(self.config.leverage, &self.config.currency);
        Ok(AccountInfo {
            login: 0,
            balance: state.balance,
            equity,
            margin,
            free_margin: equity - margin,
            margin_level: if margin > 0.0 { equity / margin * 100.0 } else { 0.0 },
            currency: self.config.currency.clone(),
            leverage: self.config.leverage,
        })
    }

    async fn positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, String> {
        let state = self.state.lock().await;
        Ok(state
            .positions
            .iter()
            .filter(|p| symbol.map_or(true, |s| p.symbol.eq_ignore_ascii_case(s)))
            .map(|p| state.mark(p, &self.config.currency))
            .collect())
    }

    async fn position(&self, ticket: u64) -> Result<Option<Position>, String> {
        let state = self.state.lock().await;
        Ok(state
            .positions
            .iter()
            .find(|p| p.ticket == ticket)
            .map(|p| state.mark(p, &self.config.currency)))
    }

    async fn orders(&self, symbol: Option<&str>) -> Result<Vec<PendingOrder>, String> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol.eq_ignore_ascii_case(s)))
            .cloned()
            .collect())
    }

    async fn order_history(&self, from: i64, to: i64) -> Result<Vec<PendingOrder>, String> {
        let state = self.state.lock().await;
        Ok(state
            .order_history
            .iter()
            .filter(|o| o.time_setup >= from && o.time_setup <= to)
            .cloned()
            .collect())
    }

    async fn trade_history(&self, from: i64, to: i64) -> Result<Vec<Deal>, String> {
        let state = self.state.lock().await;
        Ok(state
            .deals
            .iter()
            .filter(|d| d.close_time >= from && d.close_time <= to)
            .cloned()
            .collect())
    }

    async fn historical_data(&self, symbol: &str, tf: Timeframe, count: usize) -> Result<Vec<Bar>, String> {
        let state = self.state.lock().await;
        let bars = state.visible(&symbol.to_uppercase(), tf);
        if bars.is_empty() {
            return Err(format!("No {} data for {}", tf, symbol));
        }
        Ok(bars[bars.len().saturating_sub(count)..].to_vec())
    }

    async fn last_tick(&self, symbol: &str) -> Result<Tick, String> {
        let state = self.state.lock().await;
        let symbol = symbol.to_uppercase();
        let (price, time) = state
            .last_quote(&symbol)
            .ok_or_else(|| format!("No quotes for {}", symbol))?;
        let info = state.info(&symbol);
        Ok(Tick {
            symbol,
            time,
            bid: price,
            ask: price + info.spread * info.point,
            last: price,
            volume: 0.0,
        })
    }

    async fn symbols_info(&self) -> Result<Vec<SymbolInfo>, String> {
        let state = self.state.lock().await;
        let mut infos: Vec<SymbolInfo> = state.symbols.values().cloned().collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, String> {
        Ok(self.state.lock().await.info(&symbol.to_uppercase()))
    }

    async fn open_position(&self, request: OrderRequest) -> Result<OrderResult, String> {
        let mut state = self.state.lock().await;
        let symbol = request.symbol.to_uppercase();
        let price = match request.price {
            Some(p) => p,
            None => state.price(&symbol)?,
        };
        let result = state.fill(
            &symbol,
            request.side,
            request.volume,
            price,
            request.stop_loss,
            request.take_profit,
            request.magic,
            &request.comment,
            &self.config,
        )?;
        log::info!(
            "[Paper] Opened {} {} {} at {:.5} (ticket {})",
            request.side,
            result.volume,
            symbol,
            price,
            result.ticket
        );
        Ok(result)
    }

    async fn close_position(&self, ticket: u64, volume: Option<f64>) -> Result<OrderResult, String> {
        let mut state = self.state.lock().await;
        let idx = state
            .positions
            .iter()
            .position(|p| p.ticket == ticket)
            .ok_or_else(|| format!("Position {} not found", ticket))?;
        let symbol = state.positions[idx].symbol.clone();
        let price = state.price(&symbol)?;
        let full = state.positions[idx].volume;
        let volume = volume.unwrap_or(full).min(full);
        let deal = state.close_part(idx, volume, price, "close", &self.config.currency);
        log::info!(
            "[Paper] Closed {} of position {} at {:.5}: {:.2}",
            volume,
            ticket,
            price,
            deal.profit
        );
        Ok(OrderResult {
            ticket: deal.ticket,
            price,
            volume,
            retcode: RETCODE_DONE,
            comment: retcode_description(RETCODE_DONE),
        })
    }

    async fn modify_position(
        &self,
        ticket: u64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), String> {
        let mut state = self.state.lock().await;
        let pos = state
            .positions
            .iter_mut()
            .find(|p| p.ticket == ticket)
            .ok_or_else(|| format!("Position {} not found", ticket))?;
        if stop_loss.is_some() {
            pos.stop_loss = stop_loss;
        }
        if take_profit.is_some() {
            pos.take_profit = take_profit;
        }
        Ok(())
    }

    async fn place_pending_order(&self, request: PendingOrderRequest) -> Result<OrderResult, String> {
        let mut state = self.state.lock().await;
        let symbol = request.symbol.to_uppercase();
        let info = state.info(&symbol);
        let volume = normalize_volume(&info, request.volume)?;
        let now = state.now();
        if request.expiration.is_some_and(|e| e <= now) {
            return Err(retcode_description(10022));
        }
        let ticket = state.take_ticket();
        state.orders.push(PendingOrder {
            ticket,
            symbol,
            kind: request.kind,
            volume,
            price: request.price,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            time_setup: now,
            expiration: request.expiration,
            comment: request.comment,
        });
        Ok(OrderResult {
            ticket,
            price: request.price,
            volume,
            retcode: RETCODE_PLACED,
            comment: retcode_description(RETCODE_PLACED),
        })
    }

    async fn cancel_order(&self, ticket: u64) -> Result<(), String> {
        let mut state = self.state.lock().await;
        let idx = state
            .orders
            .iter()
            .position(|o| o.ticket == ticket)
            .ok_or_else(|| format!("Order {} not found", ticket))?;
        let order = state.orders.remove(idx);
        state.order_history.push(order);
        Ok(())
    }

    async fn calculate_margin(&self, symbol: &str, _side: OrderSide, volume: f64) -> Result<f64, String> {
        let state = self.state.lock().await;
        let symbol = symbol.to_uppercase();
        let price = state.price(&symbol)?;
        Ok(margin_required(
            &state.info(&symbol),
            volume,
            price,
            self.config.leverage,
            &self.config.currency,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hourly(closes: &[(f64, f64, f64)]) -> Vec<Bar> {
        // (high, low, close) with open = previous close
        let mut prev = closes.first().map(|c| c.2).unwrap_or(1.1);
        closes
            .iter()
            .enumerate()
            .map(|(i, (h, l, c))| {
                let bar = Bar::new(i as i64 * 3600, prev, *h, *l, *c);
                prev = *c;
                bar
            })
            .collect()
    }

    async fn broker(netting: bool) -> PaperBroker {
        let broker = PaperBroker::new(PaperBrokerConfig {
            netting,
            ..PaperBrokerConfig::default()
        });
        let bars = hourly(&[
            (1.1005, 1.0995, 1.1000),
            (1.1010, 1.0990, 1.1000),
            (1.1060, 1.0990, 1.1050),
            (1.1055, 1.0940, 1.0950),
        ]);
        broker.load_bars("EURUSD", Timeframe::H1, bars).await;
        broker.set_clock(2 * 3600).await;
        broker.connect().await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_only_closed_bars_visible() {
        let b = broker(false).await;
        let bars = b.historical_data("EURUSD", Timeframe::H1, 10).await.unwrap();
        assert_eq!(bars.len(), 2);
        let tick = b.last_tick("eurusd").await.unwrap();
        assert_eq!(tick.bid, 1.1000);
        assert!(b.historical_data("EURUSD", Timeframe::H4, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_take_profit_and_balance() {
        let b = broker(false).await;
        let order = OrderRequest::market("EURUSD", OrderSide::Buy, 0.1).with_stops(Some(1.0950), Some(1.1040));
        let result = b.open_position(order).await.unwrap();
        assert_eq!(result.retcode, RETCODE_DONE);
        assert_eq!(result.price, 1.1000);

        let margin = b.calculate_margin("EURUSD", OrderSide::Buy, 0.1).await.unwrap();
        assert!((margin - 110.0).abs() < 1e-6);

        let deals = b.advance_to(3 * 3600).await;
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].comment, "tp");
        // 40 pips on 0.1 lot of EURUSD
        assert!((deals[0].profit - 40.0).abs() < 1e-6);
        assert!((b.balance().await - 10_040.0).abs() < 1e-6);
        assert!(b.positions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_checked_before_target() {
        let b = broker(false).await;
        b.advance_to(3 * 3600).await;
        let order = OrderRequest::market("EURUSD", OrderSide::Sell, 0.1).with_stops(Some(1.1054), Some(1.0960));
        b.open_position(order).await.unwrap();
        // Last bar touches both the stop and the target.
        let deals = b.advance_to(4 * 3600).await;
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].comment, "sl");
        assert!(deals[0].profit < 0.0);
    }

    #[tokio::test]
    async fn test_partial_close_and_floating_profit() {
        let b = broker(false).await;
        let ticket = b
            .open_position(OrderRequest::market("EURUSD", OrderSide::Buy, 0.2))
            .await
            .unwrap()
            .ticket;
        b.advance_to(3 * 3600).await;
        let pos = b.position(ticket).await.unwrap().unwrap();
        assert!((pos.profit - 100.0).abs() < 1e-6);

        let result = b.close_position(ticket, Some(0.05)).await.unwrap();
        assert_eq!(result.volume, 0.05);
        let pos = b.position(ticket).await.unwrap().unwrap();
        assert!((pos.volume - 0.15).abs() < 1e-9);
        let account = b.account_info().await.unwrap();
        assert!((account.balance - 10_025.0).abs() < 1e-6);
        assert!((account.equity - 10_100.0).abs() < 1e-6);
        assert_eq!(b.trade_history(0, i64::MAX).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_netting_averages_entries() {
        let b = broker(true).await;
        let first = b
            .open_position(OrderRequest::market("EURUSD", OrderSide::Buy, 0.1))
            .await
            .unwrap();
        b.advance_to(3 * 3600).await;
        let second = b
            .open_position(OrderRequest::market("EURUSD", OrderSide::Buy, 0.1))
            .await
            .unwrap();
        assert_eq!(first.ticket, second.ticket);
        let positions = b.positions(None).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert!((positions[0].open_price - 1.1025).abs() < 1e-9);
        assert!((positions[0].volume - 0.2).abs() < 1e-9);

        b.open_position(OrderRequest::market("EURUSD", OrderSide::Sell, 0.2))
            .await
            .unwrap();
        assert!(b.positions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_buy_stop_triggers() {
        let b = broker(false).await;
        let request = PendingOrderRequest {
            symbol: "EURUSD".to_string(),
            kind: PendingKind::BuyStop,
            volume: 0.1,
            price: 1.1030,
            stop_loss: None,
            take_profit: None,
            comment: String::new(),
            expiration: None,
        };
        let placed = b.place_pending_order(request).await.unwrap();
        assert_eq!(placed.retcode, RETCODE_PLACED);
        assert_eq!(b.orders(None).await.unwrap().len(), 1);

        b.advance_to(3 * 3600).await;
        assert!(b.orders(None).await.unwrap().is_empty());
        let positions = b.positions(Some("EURUSD")).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].open_price, 1.1030);
    }

    #[tokio::test]
    async fn test_pending_fill_stamped_with_bar_close() {
        let b = broker(false).await;
        let request = PendingOrderRequest {
            symbol: "EURUSD".to_string(),
            kind: PendingKind::BuyStop,
            volume: 0.1,
            price: 1.1030,
            stop_loss: Some(1.0950),
            take_profit: None,
            comment: String::new(),
            expiration: None,
        };
        b.place_pending_order(request).await.unwrap();

        // Fills on the third bar, stopped out on the fourth, in one advance.
        let deals = b.advance_to(4 * 3600).await;
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].comment, "sl");
        assert_eq!(deals[0].open_time, 3 * 3600);
        assert_eq!(deals[0].close_time, 4 * 3600);
        assert!((deals[0].profit + 80.0).abs() < 1e-6);
        assert_eq!(b.clock().await, 4 * 3600);
    }

    #[tokio::test]
    async fn test_insufficient_margin_rejected() {
        let b = broker(false).await;
        // 10 lots need 11,000 USD at 1:100
        let err = b
            .open_position(OrderRequest::market("EURUSD", OrderSide::Buy, 10.0))
            .await
            .unwrap_err();
        assert!(err.contains("not enough money"));
    }

    #[test]
    fn test_quote_currency_conversion() {
        let info = SymbolInfo::standard("USDJPY");
        let profit = position_profit(&info, OrderSide::Buy, 1.0, 150.00, 150.50, "USD");
        // 50,000 JPY at 150.50
        assert!((profit - 50_000.0 / 150.5).abs() < 1e-6);
        let margin = margin_required(&info, 1.0, 150.0, 100, "USD");
        assert!((margin - 1000.0).abs() < 1e-9);
    }
}
