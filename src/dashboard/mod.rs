// src/dashboard/mod.rs

//! Web dashboard for the bot.
//!
//! Serves a single-page frontend with one tab per panel (engine, desk), REST
//! endpoints for panel state and schema, and a WebSocket that pushes every
//! panel's state twice a second.

use crate::traits::Dashboard;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::{error, info};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub const MAX_LOG_ENTRIES: usize = 100;
const BROADCAST_INTERVAL_MS: u64 = 500;

// =============================================================================
// Activity log
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub time: String,
    pub message: String,
    #[serde(rename = "type")]
    pub entry_type: String,
}

/// Bounded log shown on a panel; the oldest entry is dropped past the cap.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(MAX_LOG_ENTRIES),
        }
    }

    /// Adds an entry stamped with `now` (unix seconds, shown as UTC time).
    pub fn push(&mut self, now: i64, message: String, entry_type: &str) {
        let time = chrono::DateTime::from_timestamp(now, 0)
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        self.entries.push_back(LogEntry {
            time,
            message,
            entry_type: entry_type.to_string(),
        });
        if self.entries.len() > MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Server
// =============================================================================

/// Message broadcast to WebSocket clients when a panel's state updates.
#[derive(Clone, Debug, Serialize)]
pub struct DashboardUpdate {
    pub panel: String,
    pub state: serde_json::Value,
    pub timestamp: i64,
}

pub struct DashboardState {
    panels: Vec<Arc<dyn Dashboard>>,
    update_tx: broadcast::Sender<DashboardUpdate>,
}

impl DashboardState {
    fn panel(&self, name: &str) -> Option<&Arc<dyn Dashboard>> {
        self.panels.iter().find(|p| p.dashboard_name() == name)
    }

    async fn snapshot(&self, panel: &Arc<dyn Dashboard>) -> DashboardUpdate {
        DashboardUpdate {
            panel: panel.dashboard_name().to_string(),
            state: panel.dashboard_state().await,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

pub struct DashboardServer {
    state: Arc<DashboardState>,
    port: u16,
}

impl DashboardServer {
    pub fn new(panels: Vec<Arc<dyn Dashboard>>, port: u16) -> Self {
        let (update_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(DashboardState { panels, update_tx }),
            port,
        }
    }

    /// Builds the router; split from `run` so it can be served on any listener.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/", get(serve_frontend))
            .route("/api/panels", get(list_panels))
            .route("/api/panels/{name}", get(get_panel_state))
            .route("/api/panels/{name}/schema", get(get_panel_schema))
            .route("/ws", get(websocket_handler))
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Runs until the task is aborted.
    pub async fn run(self) -> Result<(), String> {
        let poll_state = self.state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(BROADCAST_INTERVAL_MS));
            loop {
                interval.tick().await;
                for panel in &poll_state.panels {
                    let update = poll_state.snapshot(panel).await;
                    // No receivers is fine.
                    let _ = poll_state.update_tx.send(update);
                }
            }
        });

        let app = self.router();
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("[Dashboard] Listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| format!("Failed to bind dashboard port {}: {}", self.port, e))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| format!("Dashboard server failed: {}", e))
    }
}

async fn serve_frontend() -> Html<&'static str> {
    Html(FRONTEND_HTML)
}

async fn list_panels(State(state): State<Arc<DashboardState>>) -> Json<Vec<String>> {
    Json(state.panels.iter().map(|p| p.dashboard_name().to_string()).collect())
}

async fn get_panel_state(State(state): State<Arc<DashboardState>>, Path(name): Path<String>) -> Response {
    match state.panel(&name) {
        Some(panel) => Json(panel.dashboard_state().await).into_response(),
        None => (StatusCode::NOT_FOUND, "Panel not found").into_response(),
    }
}

async fn get_panel_schema(State(state): State<Arc<DashboardState>>, Path(name): Path<String>) -> Response {
    match state.panel(&name) {
        Some(panel) => Json(panel.dashboard_schema()).into_response(),
        None => (StatusCode::NOT_FOUND, "Panel not found").into_response(),
    }
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<DashboardState>>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn send_update(socket: &mut WebSocket, update: &DashboardUpdate) -> bool {
    match serde_json::to_string(update) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => true,
    }
}

async fn handle_websocket(mut socket: WebSocket, state: Arc<DashboardState>) {
    info!("[Dashboard] WebSocket client connected");

    for panel in &state.panels {
        let update = state.snapshot(panel).await;
        if !send_update(&mut socket, &update).await {
            return;
        }
    }

    let mut rx = state.update_tx.subscribe();
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(update) => {
                        if !send_update(&mut socket, &update).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        info!("[Dashboard] WebSocket client lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        error!("[Dashboard] WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("[Dashboard] WebSocket client disconnected");
}

/// Embedded frontend. Panels are rendered from their widget schema.
const FRONTEND_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Forex Bot</title>
    <style>
        :root {
            --bg-primary: #0a0a0f;
            --bg-card: #16161f;
            --bg-tertiary: #1a1a26;
            --border: #2a2a3d;
            --text-primary: #f0f0f5;
            --text-secondary: #8888a0;
            --text-muted: #555566;
            --accent: #6366f1;
            --success: #22c55e;
            --warning: #f59e0b;
            --danger: #ef4444;
        }
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body { font-family: -apple-system, BlinkMacSystemFont, sans-serif; background: var(--bg-primary); color: var(--text-primary); }
        .container { max-width: 1400px; margin: 0 auto; padding: 24px; }
        header { display: flex; justify-content: space-between; align-items: center; margin-bottom: 24px; padding-bottom: 16px; border-bottom: 1px solid var(--border); }
        .status { display: flex; align-items: center; gap: 8px; font-size: 14px; color: var(--text-secondary); }
        .status-dot { width: 8px; height: 8px; border-radius: 50%; background: var(--success); }
        .status-dot.disconnected { background: var(--danger); }
        .tabs { display: flex; gap: 4px; margin-bottom: 24px; }
        .tab { padding: 10px 20px; border: 1px solid var(--border); background: transparent; color: var(--text-secondary); border-radius: 8px; cursor: pointer; }
        .tab.active { background: var(--accent); color: white; }
        .dashboard { display: grid; grid-template-columns: repeat(auto-fit, minmax(320px, 1fr)); gap: 20px; }
        .card { background: var(--bg-card); border: 1px solid var(--border); border-radius: 12px; padding: 20px; }
        .card.wide { grid-column: 1 / -1; }
        .card-title { font-size: 13px; color: var(--text-secondary); text-transform: uppercase; margin-bottom: 12px; }
        .metric-grid { display: grid; grid-template-columns: repeat(2, 1fr); gap: 12px; }
        .metric { padding: 12px; background: var(--bg-tertiary); border-radius: 8px; }
        .metric-label { font-size: 11px; color: var(--text-muted); text-transform: uppercase; margin-bottom: 4px; }
        .metric-value { font-family: monospace; font-size: 18px; }
        table { width: 100%; border-collapse: collapse; font-family: monospace; font-size: 13px; }
        th, td { text-align: left; padding: 6px 8px; border-bottom: 1px solid var(--border); }
        th { color: var(--text-muted); font-weight: 500; }
        .chart { margin-bottom: 16px; }
        .chart-label { font-family: monospace; font-size: 13px; color: var(--text-secondary); margin-bottom: 4px; }
        .chart svg { width: 100%; height: 260px; background: var(--bg-tertiary); border-radius: 8px; }
        .log { font-family: monospace; font-size: 13px; max-height: 300px; overflow-y: auto; background: var(--bg-tertiary); border-radius: 8px; padding: 12px; }
        .log-entry { display: flex; gap: 12px; padding: 3px 0; }
        .log-time { color: var(--text-muted); }
        .log-entry.success .log-message { color: var(--success); }
        .log-entry.warning .log-message { color: var(--warning); }
        .log-entry.error .log-message { color: var(--danger); }
        .log-entry.signal .log-message { color: var(--accent); }
    </style>
</head>
<body>
    <div class="container">
        <header>
            <h1>Forex Bot</h1>
            <div class="status">
                <div class="status-dot disconnected" id="statusDot"></div>
                <span id="statusText">Connecting...</span>
            </div>
        </header>
        <div class="tabs" id="tabs"></div>
        <div class="dashboard" id="dashboard"></div>
    </div>
    <script>
        let panels = [];
        let schemas = {};
        let states = {};
        let active = null;

        async function init() {
            panels = await (await fetch('/api/panels')).json();
            for (const name of panels) {
                schemas[name] = await (await fetch(`/api/panels/${name}/schema`)).json();
            }
            active = panels[0] || null;
            renderTabs();
            connect();
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            const ws = new WebSocket(`${protocol}//${window.location.host}/ws`);
            ws.onopen = () => setStatus(true);
            ws.onclose = () => { setStatus(false); setTimeout(connect, 2000); };
            ws.onmessage = (event) => {
                const update = JSON.parse(event.data);
                states[update.panel] = update.state;
                if (update.panel === active) render();
            };
        }

        function setStatus(ok) {
            document.getElementById('statusDot').classList.toggle('disconnected', !ok);
            document.getElementById('statusText').textContent = ok ? 'Connected' : 'Disconnected';
        }

        function renderTabs() {
            document.getElementById('tabs').innerHTML = panels.map(name =>
                `<button class="tab ${name === active ? 'active' : ''}" onclick="select('${name}')">${name}</button>`
            ).join('');
        }

        function select(name) { active = name; renderTabs(); render(); }

        function fmt(value, format) {
            if (value === null || value === undefined) return '-';
            if (typeof value === 'number') {
                if (format === 'percent') return value.toFixed(2) + '%';
                if (format === 'price') return value.toFixed(5);
                if (format === 'money') return value.toFixed(2);
                return Number.isInteger(value) ? value : value.toFixed(2);
            }
            if (typeof value === 'boolean') return value ? 'yes' : 'no';
            return value;
        }

        const LINE_COLORS = ['#6366f1', '#f59e0b', '#06b6d4'];

        function candleChart(c) {
            const W = 800, H = 260, PAD = 8;
            const bars = c.candles;
            if (!bars.length) return '';
            let hi = Math.max(...bars.map(b => b.high), ...c.resistance);
            let lo = Math.min(...bars.map(b => b.low), ...c.support);
            if (hi === lo) { hi += 1e-5; lo -= 1e-5; }
            const step = (W - 2 * PAD) / bars.length;
            const x = i => PAD + step * (i + 0.5);
            const y = p => PAD + (hi - p) / (hi - lo) * (H - 2 * PAD);
            let svg = `<svg viewBox="0 0 ${W} ${H}" preserveAspectRatio="none">`;
            const level = (p, color) => `<line x1="0" x2="${W}" y1="${y(p)}" y2="${y(p)}" stroke="${color}" stroke-dasharray="4 4" stroke-width="1"/>`;
            svg += c.support.map(p => level(p, 'var(--success)')).join('');
            svg += c.resistance.map(p => level(p, 'var(--danger)')).join('');
            bars.forEach((b, i) => {
                const color = b.close >= b.open ? 'var(--success)' : 'var(--danger)';
                const top = y(Math.max(b.open, b.close));
                const height = Math.max(1, y(Math.min(b.open, b.close)) - top);
                svg += `<line x1="${x(i)}" x2="${x(i)}" y1="${y(b.high)}" y2="${y(b.low)}" stroke="${color}"/>`;
                svg += `<rect x="${x(i) - step * 0.35}" y="${top}" width="${step * 0.7}" height="${height}" fill="${color}"/>`;
            });
            c.indicators.forEach((s, k) => {
                const pts = s.values.map((v, i) => v === null ? null : `${x(i)},${y(v)}`).filter(p => p);
                svg += `<polyline points="${pts.join(' ')}" fill="none" stroke="${LINE_COLORS[k % LINE_COLORS.length]}" stroke-width="1.5"/>`;
            });
            svg += `</svg>`;
            const legend = c.indicators.map((s, k) => `<span style="color:${LINE_COLORS[k % LINE_COLORS.length]}">${s.name}</span>`).join(' ');
            return `<div class="chart"><div class="chart-label">${c.symbol} ${c.timeframe} ${legend}</div>${svg}</div>`;
        }

        function render() {
            const state = states[active];
            const schema = schemas[active];
            const el = document.getElementById('dashboard');
            if (!state || !schema) { el.innerHTML = ''; return; }

            const kv = schema.widgets.filter(w => w.type === 'key_value');
            let html = '';
            if (kv.length) {
                html += `<div class="card"><div class="card-title">Overview</div><div class="metric-grid">` +
                    kv.map(w => `<div class="metric"><div class="metric-label">${w.label}</div><div class="metric-value">${fmt(state[w.key], w.format)}</div></div>`).join('') +
                    `</div></div>`;
            }
            for (const w of schema.widgets) {
                if (w.type === 'table') {
                    const rows = state[w.data_key] || [];
                    html += `<div class="card wide"><div class="card-title">${w.title}</div><table><tr>` +
                        w.columns.map(c => `<th>${c.header}</th>`).join('') + `</tr>` +
                        rows.map(r => `<tr>` + w.columns.map(c => `<td>${fmt(r[c.key], c.format)}</td>`).join('') + `</tr>`).join('') +
                        `</table></div>`;
                } else if (w.type === 'chart') {
                    const charts = state[w.data_key] || [];
                    html += `<div class="card wide"><div class="card-title">${w.title}</div>` +
                        charts.map(candleChart).join('') + `</div>`;
                } else if (w.type === 'log') {
                    const entries = (state[w.data_key] || []).slice(-w.max_lines).reverse();
                    html += `<div class="card wide"><div class="card-title">${w.title}</div><div class="log">` +
                        entries.map(e => `<div class="log-entry ${e.type}"><span class="log-time">${e.time}</span><span class="log-message">${e.message}</span></div>`).join('') +
                        `</div></div>`;
                }
            }
            el.innerHTML = html;
        }

        init();
    </script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_log_is_bounded() {
        let mut log = ActivityLog::new();
        for i in 0..(MAX_LOG_ENTRIES as i64 + 5) {
            log.push(i, format!("entry {}", i), "info");
        }
        assert_eq!(log.len(), MAX_LOG_ENTRIES);
        let entries = log.entries();
        assert_eq!(entries[0].message, "entry 5");
        assert_eq!(entries[0].time, "00:00:05");
    }

    #[test]
    fn test_frontend_renders_every_widget_type() {
        for kind in ["key_value", "table", "log", "chart"] {
            assert!(FRONTEND_HTML.contains(&format!("w.type === '{}'", kind)), "{}", kind);
        }
    }

    #[test]
    fn test_log_entry_serializes_type() {
        let mut log = ActivityLog::new();
        log.push(3600, "opened".to_string(), "success");
        let json = serde_json::to_value(log.entries()).unwrap();
        assert_eq!(json[0]["type"], "success");
        assert_eq!(json[0]["time"], "01:00:00");
    }
}
