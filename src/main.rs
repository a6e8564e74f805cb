// src/main.rs
//
// Forex signal bot. Scans configured symbols, turns analysis and forecasts
// into signals and routes them through operator confirmation or, in
// backtests, straight to a simulated account.

use clap::Parser;
use forex_bot::config::{default_config_template, BrokerConfig, Config, PaperBrokerConfig, Secrets};
use forex_bot::connectors::{load_bar_files, resample, synthetic_bars, BridgeBroker, PaperBroker, RecordingBroker};
use forex_bot::dashboard::DashboardServer;
use forex_bot::data::DataManager;
use forex_bot::engine::chart::step_timeframe;
use forex_bot::engine::{BacktestReport, BotEngine};
use forex_bot::manifest::check_manifest_file;
use forex_bot::models::Timeframe;
use forex_bot::notifier::telegram::run_polling;
use forex_bot::notifier::{CommandRouter, LogNotifier, TelegramNotifier};
use forex_bot::prediction::Predictor;
use forex_bot::settings::SettingsManager;
use forex_bot::store::Store;
use forex_bot::traits::{Dashboard, SharedBroker, SharedNotifier};
use forex_bot::trading::{RiskManager, SignalGenerator, TradingDesk};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Parser)]
#[command(name = "forex-bot")]
#[command(about = "Forex signal bot with technical analysis, forecasting and risk-managed execution")]
struct Args {
    /// Mode of operation: live, paper, backtest or demo
    #[arg(long, default_value = "live")]
    mode: String,

    /// Path to configuration file (TOML)
    #[arg(long, short)]
    config: Option<String>,

    /// Enable the web dashboard on the specified port
    #[arg(long)]
    dashboard: Option<u16>,

    /// Bar files (JSONL records or {SYMBOL}_{TF}.csv) for paper and backtest modes
    #[arg(long)]
    file: Vec<String>,

    /// Append every fetched bar to this JSONL file (live and paper modes)
    #[arg(long)]
    record: Option<String>,

    /// Generate a default configuration file
    #[arg(long)]
    generate_config: bool,

    /// Validate a pinned dependency manifest and exit
    #[arg(long)]
    check_manifest: Option<String>,

    /// Train forecasting models for every symbol and exit
    #[arg(long)]
    train: bool,

    /// Write the saved runtime settings to a TOML or JSON file and exit
    #[arg(long)]
    export_settings: Option<String>,

    /// Replace the saved runtime settings from a TOML or JSON file and exit
    #[arg(long)]
    import_settings: Option<String>,

    /// Restore the runtime settings to the configured defaults and exit
    #[arg(long)]
    reset_settings: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        println!("{}", default_config_template());
        return;
    }
    if let Some(path) = &args.check_manifest {
        run_check_manifest(path);
        return;
    }

    let config = load_config(&args);
    init_logging(&config);
    let secrets = Secrets::from_env();

    if args.train {
        run_train(&args, &config, &secrets).await;
        return;
    }
    if settings_command(&args) {
        run_settings(&args, &config).await;
        return;
    }

    match args.mode.as_str() {
        "live" => run_trading_mode(&args, &config, &secrets, false).await,
        "paper" => run_trading_mode(&args, &config, &secrets, true).await,
        "backtest" => run_backtest_mode(&args, config).await,
        "demo" => run_demo_mode(&args, config).await,
        _ => {
            eprintln!("Unknown mode: {}. Use: live, paper, backtest, or demo", args.mode);
            std::process::exit(1);
        }
    }
}

// =============================================================================
// Setup
// =============================================================================

fn load_config(args: &Args) -> Config {
    match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                eprintln!("Use --generate-config to create a template.");
                std::process::exit(1);
            }
        },
        None if args.mode == "live" && !args.train && !settings_command(args) => {
            eprintln!("No config file specified. Use --config <path>");
            eprintln!("Use --generate-config to create a template.");
            std::process::exit(1);
        }
        None => Config::default(),
    }
}

fn settings_command(args: &Args) -> bool {
    args.export_settings.is_some() || args.import_settings.is_some() || args.reset_settings
}

fn init_logging(config: &Config) {
    let level = config.general.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run_check_manifest(path: &str) {
    match check_manifest_file(path) {
        Ok(manifest) => {
            println!("Manifest OK: {} pinned packages", manifest.len());
            for requirement in manifest.requirements() {
                println!("  {}=={}", requirement.name, requirement.version);
            }
        }
        Err(e) => {
            eprintln!("Invalid manifest {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

/// Paper broker loaded with bar files, its clock at the last close. Also
/// returns the symbol/timeframe series that were loaded.
async fn paper_from_files(
    config: PaperBrokerConfig,
    files: &[String],
) -> Result<(Arc<PaperBroker>, BTreeSet<(String, Timeframe)>), String> {
    let series = load_bar_files(files)?;
    if series.is_empty() {
        return Err("No bars found in the given files".to_string());
    }
    let broker = Arc::new(PaperBroker::new(config));
    let mut loaded = BTreeSet::new();
    let mut last_close = i64::MIN;
    for ((symbol, tf), bars) in series {
        if let Some(last) = bars.last() {
            last_close = last_close.max(last.time + tf.seconds());
        }
        println!("Loaded {} {} bars of {}", bars.len(), tf, symbol);
        broker.load_bars(&symbol, tf, bars).await;
        loaded.insert((symbol, tf));
    }
    broker.set_clock(last_close).await;
    Ok((broker, loaded))
}

fn paper_config(config: &Config) -> PaperBrokerConfig {
    match &config.broker {
        BrokerConfig::Paper(paper) => paper.clone(),
        BrokerConfig::Bridge(_) => PaperBrokerConfig::default(),
    }
}

/// A paper broker replaying bar files, with the series it loaded.
type PaperReplay = (Arc<PaperBroker>, BTreeSet<(String, Timeframe)>);

async fn connect_broker(
    config: &Config,
    secrets: &Secrets,
    files: &[String],
    force_paper: bool,
) -> Result<(SharedBroker, Option<PaperReplay>), String> {
    let (broker, replay): (SharedBroker, Option<PaperReplay>) = match (&config.broker, force_paper) {
        (BrokerConfig::Bridge(bridge), false) => {
            println!("Connecting to terminal bridge at {}", bridge.base_url);
            if !bridge.enable_real_trading {
                println!("Note: enable_real_trading is off, orders will be refused");
            }
            let broker = Arc::new(BridgeBroker::new(bridge.clone(), secrets.bridge_api_key.clone())?);
            (broker as SharedBroker, None)
        }
        _ => {
            if files.is_empty() {
                return Err("The paper broker needs bar data: pass --file <path>".to_string());
            }
            let (paper, loaded) = paper_from_files(paper_config(config), files).await?;
            (paper.clone() as SharedBroker, Some((paper, loaded)))
        }
    };
    broker.connect().await?;
    Ok((broker, replay))
}

fn build_notifier(config: &Config, secrets: &Secrets) -> (SharedNotifier, Option<Arc<TelegramNotifier>>) {
    if !config.telegram.enabled {
        return (Arc::new(LogNotifier) as SharedNotifier, None);
    }
    let Some((token, chat_id)) = secrets.telegram() else {
        println!("Telegram enabled but credentials are missing, notifications go to the log");
        return (Arc::new(LogNotifier) as SharedNotifier, None);
    };
    match TelegramNotifier::new(token, chat_id, config.telegram.poll_timeout_secs) {
        Ok(bot) => {
            let bot = Arc::new(bot);
            (bot.clone() as SharedNotifier, Some(bot))
        }
        Err(e) => {
            eprintln!("Failed to start Telegram: {}", e);
            (Arc::new(LogNotifier) as SharedNotifier, None)
        }
    }
}

fn open_store(config: &Config) -> Option<Arc<Store>> {
    match Store::open(&config.general.data_dir) {
        Ok(store) => Some(Arc::new(store.with_timezone(config.general.tz()))),
        Err(e) => {
            eprintln!("Failed to open store, running without persistence: {}", e);
            None
        }
    }
}

fn open_settings(config: &Config) -> Result<SettingsManager, String> {
    SettingsManager::open(&config.general.data_dir, config.trading.clone())
}

/// Wires data, prediction, signals, risk and the desk around one broker.
fn build_engine(
    config: &Config,
    broker: SharedBroker,
    notifier: SharedNotifier,
    store: Option<Arc<Store>>,
    auto_mode: bool,
    prediction: bool,
) -> Arc<BotEngine> {
    let data = Arc::new(DataManager::new(
        broker.clone(),
        &config.general.data_dir,
        config.general.bars_per_request,
        config.general.save_market_data,
    ));
    let predictor = prediction.then(|| Predictor::new(config.prediction.clone()));
    let signals = Arc::new(Mutex::new(SignalGenerator::new(config.signal.clone())));
    let risk = Arc::new(
        RiskManager::new(broker.clone(), config.risk.clone(), config.signal.min_risk_reward)
            .with_timezone(config.general.tz()),
    );
    let desk = TradingDesk::new(
        broker.clone(),
        signals,
        risk,
        store.clone(),
        notifier,
        config.trading.clone(),
        auto_mode,
    );
    BotEngine::new(broker, data, predictor, desk, store, config.general.clone())
}

/// Restricts symbols and timeframes to the series present in the bar files.
fn limit_to_loaded(config: &mut Config, loaded: &BTreeSet<(String, Timeframe)>) {
    let symbols: BTreeSet<String> = loaded.iter().map(|(s, _)| s.clone()).collect();
    config.general.symbols.retain(|s| symbols.contains(&s.to_uppercase()));
    if config.general.symbols.is_empty() {
        config.general.symbols = symbols.into_iter().collect();
    }
    let timeframes: BTreeSet<Timeframe> = loaded.iter().map(|(_, tf)| *tf).collect();
    config.general.timeframes.retain(|tf| timeframes.contains(tf));
    if config.general.timeframes.is_empty() {
        config.general.timeframes = timeframes.into_iter().collect();
    }
}

// =============================================================================
// Modes
// =============================================================================

async fn run_trading_mode(args: &Args, config: &Config, secrets: &Secrets, force_paper: bool) {
    println!("Starting {} mode...", if force_paper { "Paper" } else { "Live" });

    let (broker, replay) = match connect_broker(config, secrets, &args.file, force_paper).await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Failed to connect broker: {}", e);
            std::process::exit(1);
        }
    };
    let mut config = config.clone();
    if let Some((_, loaded)) = &replay {
        limit_to_loaded(&mut config, loaded);
    }
    let config = &config;
    let recorder = match &args.record {
        Some(path) => match RecordingBroker::new(broker.clone(), path) {
            Ok(r) => {
                println!("Recording bars to {}", path);
                Some(Arc::new(r))
            }
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };
    let engine_broker: SharedBroker = match &recorder {
        Some(r) => r.clone(),
        None => broker.clone(),
    };

    let store = open_store(config);
    let (notifier, telegram) = build_notifier(config, secrets);
    let engine = build_engine(
        config,
        engine_broker,
        notifier.clone(),
        store.clone(),
        false,
        config.prediction.enabled,
    );
    let desk = engine.desk().clone();
    match open_settings(config) {
        Ok(settings) => {
            if let Err(e) = settings.record_credentials(secrets).await {
                log::warn!("Failed to record credentials: {}", e);
            }
            desk.attach_settings(Arc::new(settings)).await;
        }
        Err(e) => eprintln!("Runtime settings will not be saved: {}", e),
    }

    if let Some(port) = args.dashboard.or(config.general.dashboard_port) {
        start_dashboard(vec![engine.clone() as Arc<dyn Dashboard>, desk.clone() as Arc<dyn Dashboard>], port);
    }
    let poller = telegram.map(|bot| {
        let router = CommandRouter::new(desk.clone(), broker.clone(), bot.chat_id());
        println!("Telegram commands enabled for chat {}", bot.chat_id());
        tokio::spawn(run_polling(bot, router, store.clone(), config.telegram.poll_timeout_secs))
    });

    if let Err(e) = notifier.send_message("🤖 *Forex bot started*").await {
        log::warn!("Startup notification failed: {}", e);
    }

    let scanning = async {
        match &replay {
            Some((paper, _)) => {
                let step = step_timeframe(&config.general.timeframes);
                match engine.run_paper(paper, step).await {
                    Ok(report) => print_report(&report),
                    Err(e) => eprintln!("Paper replay failed: {}", e),
                }
                // Keep serving commands and the dashboard until shutdown.
                std::future::pending::<()>().await
            }
            None => engine.run().await,
        }
    };
    tokio::select! {
        _ = scanning => {}
        _ = wait_for_shutdown() => {}
    }

    if let Some(poller) = poller {
        poller.abort();
    }
    if let Some(recorder) = recorder {
        if let Err(e) = recorder.flush().await {
            eprintln!("{}", e);
        }
    }
    if let Err(e) = broker.disconnect().await {
        eprintln!("Failed to disconnect: {}", e);
    }
}

async fn run_backtest_mode(args: &Args, mut config: Config) {
    if args.file.is_empty() {
        eprintln!("--file is required for backtest mode");
        std::process::exit(1);
    }
    println!("Starting Backtest from files: {:?}", args.file);

    let (paper, loaded) = match paper_from_files(paper_config(&config), &args.file).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to load historical data: {}", e);
            std::process::exit(1);
        }
    };
    limit_to_loaded(&mut config, &loaded);
    run_simulation(args, &config, paper).await;
}

async fn run_demo_mode(args: &Args, mut config: Config) {
    println!("Starting Demo Mode with synthetic data...");
    const DEMO_DAYS: usize = 20;
    let start = chrono::Utc::now().timestamp() / 86_400 * 86_400 - (DEMO_DAYS as i64 + 1) * 86_400;

    config.general.timeframes.retain(|tf| *tf >= Timeframe::M15);
    if config.general.timeframes.is_empty() {
        config.general.timeframes = vec![Timeframe::M15, Timeframe::H1, Timeframe::H4];
    }
    let paper = Arc::new(PaperBroker::new(paper_config(&config)));
    for symbol in &config.general.symbols {
        let base = demo_base_price(symbol);
        let m15 = synthetic_bars(base, Timeframe::M15, start, DEMO_DAYS * 96);
        for &tf in &config.general.timeframes {
            paper.load_bars(symbol, tf, resample(&m15, tf)).await;
        }
    }
    paper.set_clock(start).await;
    config.prediction.enabled = false;
    run_simulation(args, &config, paper).await;
}

fn demo_base_price(symbol: &str) -> f64 {
    let upper = symbol.to_uppercase();
    if upper.starts_with("XAU") {
        2000.0
    } else if upper.ends_with("JPY") {
        150.0
    } else if upper.starts_with("GBP") {
        1.27
    } else if upper.starts_with("USD") {
        1.35
    } else {
        1.1
    }
}

/// Auto-executing run over a paper broker's bars.
async fn run_simulation(args: &Args, config: &Config, paper: Arc<PaperBroker>) {
    let step = step_timeframe(&config.general.timeframes);
    println!(
        "Running {} symbols on {:?}, stepping {}",
        config.general.symbols.len(),
        config.general.timeframes,
        step
    );

    let broker: SharedBroker = paper.clone();
    if let Err(e) = broker.connect().await {
        eprintln!("Failed to start paper broker: {}", e);
        std::process::exit(1);
    }
    let engine = build_engine(
        config,
        broker,
        Arc::new(LogNotifier),
        None,
        true,
        config.prediction.enabled,
    );
    if let Some(port) = args.dashboard {
        start_dashboard(
            vec![engine.clone() as Arc<dyn Dashboard>, engine.desk().clone() as Arc<dyn Dashboard>],
            port,
        );
    }

    match engine.run_backtest(&paper, step).await {
        Ok(report) => print_report(&report),
        Err(e) => {
            eprintln!("Backtest failed: {}", e);
            std::process::exit(1);
        }
    }

    if args.dashboard.is_some() {
        wait_for_shutdown().await;
    }
}

fn print_report(report: &BacktestReport) {
    println!("\n=== Backtest Results ===");
    println!("  Steps:           {}", report.steps);
    println!("  Signals:         {}", report.signals);
    println!("  Closed Trades:   {}", report.trades);
    println!("  Wins:            {}", report.wins);
    println!("  Win Rate:        {:.1}%", report.win_rate);
    println!("  Open Positions:  {}", report.open_positions);
    println!("  Initial Balance: {:.2}", report.initial_balance);
    println!("  Final Balance:   {:.2}", report.final_balance);
    let pnl = report.final_balance - report.initial_balance;
    println!("  Net P/L:         {:+.2}", pnl);
    println!("\nBacktest complete!");
}

async fn run_train(args: &Args, config: &Config, secrets: &Secrets) {
    println!("Training forecasting models on {}...", config.prediction.timeframe);
    let broker = match connect_broker(config, secrets, &args.file, !args.file.is_empty()).await {
        Ok((b, _)) => b,
        Err(e) => {
            eprintln!("Failed to connect broker: {}", e);
            std::process::exit(1);
        }
    };
    let engine = build_engine(config, broker, Arc::new(LogNotifier), open_store(config), false, true);
    let mut failed = 0;
    for (symbol, result) in engine.train_models().await {
        match result {
            Ok(m) => println!(
                "  {}: mse {:.3e}, mae {:.3e}, direction accuracy {:.1}% ({} train / {} test rows)",
                symbol,
                m.mse,
                m.mae,
                m.direction_accuracy * 100.0,
                m.train_samples,
                m.test_samples
            ),
            Err(e) => {
                failed += 1;
                println!("  {}: {}", symbol, e);
            }
        }
    }
    if failed > 0 {
        std::process::exit(1);
    }
}

async fn run_settings(args: &Args, config: &Config) {
    let settings = match open_settings(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let result = if args.reset_settings {
        settings.reset().await.map(|_| "Runtime settings reset".to_string())
    } else if let Some(path) = &args.import_settings {
        settings.import(path).await.map(|_| format!("Imported runtime settings from {}", path))
    } else if let Some(path) = &args.export_settings {
        settings.export(path).await.map(|_| format!("Exported runtime settings to {}", path))
    } else {
        Ok(String::new())
    };
    match result {
        Ok(message) => println!("{} ({})", message, settings.path().display()),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn start_dashboard(panels: Vec<Arc<dyn Dashboard>>, port: u16) {
    let dashboard = DashboardServer::new(panels, port);
    tokio::spawn(async move {
        if let Err(e) = dashboard.run().await {
            eprintln!("Dashboard server error: {}", e);
        }
    });
    println!("Dashboard available at http://localhost:{}", port);
}

async fn wait_for_shutdown() {
    println!("Press Ctrl+C to exit.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
