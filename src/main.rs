use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use signalbot::alerts::AlertBook;
use signalbot::api::telegram::{run_command_listener, run_notifier};
use signalbot::api::{BinanceClient, KlineStream, MarketDataGateway, OrderGateway, TelegramClient};
use signalbot::backfill::backfill_all;
use signalbot::config::{Cli, Secrets, Settings};
use signalbot::events::{ChannelSink, EngineEvent};
use signalbot::execution::{
    run_dispatcher, run_order_router, Account, Dispatcher, DispatcherConfig, PositionManager,
    TradingMode,
};
use signalbot::indicators::YataIndicators;
use signalbot::models::Asset;
use signalbot::reporting::ReportHandle;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const CANDLE_CHANNEL_CAPACITY: usize = 4096;
const ORDER_CHANNEL_CAPACITY: usize = 64;
const REPORT_CHANNEL_CAPACITY: usize = 16;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads the environment
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    cli.validate()?;

    let settings = Settings::load(&cli.settings).context("Failed to load settings")?;
    let secrets = Secrets::from_env(cli.dev);

    tracing::info!("🤖 SignalBot starting");
    tracing::info!(
        "⚙️  interval={} max_positions={} signals={} simulate={} trade={} dev={}",
        cli.interval,
        cli.max_positions,
        cli.signals,
        cli.simulate,
        cli.trade,
        cli.dev
    );

    // ========================================================================
    // Exchange client
    // ========================================================================

    if cli.trade && !secrets.has_binance_keys() {
        bail!("--trade requires BINANCE_APIKEY and BINANCE_SECRETKEY");
    }
    let binance = BinanceClient::new(
        secrets.binance_api_key.clone(),
        secrets.binance_secret_key.clone(),
    )?;

    // ========================================================================
    // Discovery & backfill
    // ========================================================================

    let discovered = binance
        .discover_symbols(&settings.discovery_filter())
        .await
        .context("Failed to fetch exchange info")?;
    tracing::info!("🔍 Discovered {} tradable symbols", discovered.len());

    let report = backfill_all(
        binance.clone(),
        &discovered,
        cli.interval,
        settings.buffer_len,
        settings.backfill_requests_per_minute,
    )
    .await;

    if report.book.is_empty() {
        bail!("No symbol could be backfilled, nothing to track");
    }

    let symbols = report.book.symbols();
    let tracked: HashSet<String> = symbols.iter().cloned().collect();
    let assets: HashMap<String, Asset> = discovered
        .into_iter()
        .filter(|asset| tracked.contains(&asset.symbol))
        .map(|asset| (asset.symbol.clone(), asset))
        .collect();

    // ========================================================================
    // Alerts
    // ========================================================================

    let mut alerts = AlertBook::load(&cli.alerts)
        .with_context(|| format!("Failed to load alerts from {}", cli.alerts.display()))?;
    let dropped = alerts.retain_tracked(&tracked);
    if !dropped.is_empty() {
        tracing::warn!(
            "⚠️  Ignoring alerts for untracked symbols: {}",
            dropped.join(", ")
        );
    }
    tracing::info!("🔔 {} price alerts armed", alerts.pending());

    // ========================================================================
    // Account
    // ========================================================================

    let initial_balance = if cli.trade {
        let wallet = binance
            .wallet_balance()
            .await
            .context("Failed to fetch wallet balance")?;
        let tradable = settings.tradable_balance(wallet);
        tracing::info!("💰 Wallet balance {:.2}, trading with {:.2}", wallet, tradable);
        tradable
    } else {
        cli.balance
    };

    if !(initial_balance.is_finite() && initial_balance > 0.0) {
        bail!("Initial balance must be positive, got {}", initial_balance);
    }

    // ========================================================================
    // Notifications & commands
    // ========================================================================

    let (sink, events) = ChannelSink::new(EVENT_CHANNEL_CAPACITY);
    let (reports, queries) = ReportHandle::new(REPORT_CHANNEL_CAPACITY);

    let mut background = JoinSet::new();

    let notifier_handle = match secrets.telegram.clone() {
        Some(credentials) => {
            let telegram = TelegramClient::new(credentials.token, credentials.chat_id);
            background.spawn(run_command_listener(telegram.clone(), reports));
            tracing::info!("📨 Telegram notifications enabled");
            tokio::spawn(run_notifier(telegram, events))
        }
        None => {
            tracing::warn!("⚠️  Telegram not configured, events are logged only");
            drop(reports);
            tokio::spawn(log_events(events))
        }
    };

    // ========================================================================
    // Dispatcher & order router
    // ========================================================================

    let mode = if cli.trade {
        TradingMode::Live
    } else {
        TradingMode::Simulated
    };

    let config = DispatcherConfig {
        interval: cli.interval,
        notify_signals: cli.signals,
        open_positions: cli.opens_positions(),
        mode,
        signal: settings.signal.clone(),
    };

    let mut dispatcher = Dispatcher::new(
        config,
        report.book,
        assets,
        YataIndicators::new(settings.indicators.clone()),
        PositionManager::new(
            settings.stop_loss_pct,
            settings.take_profit_pct,
            cli.max_positions,
        ),
        Account::new(initial_balance),
        alerts,
        sink.clone(),
    );

    let router_handle = if mode == TradingMode::Live {
        let (order_tx, order_rx) = mpsc::channel(ORDER_CHANNEL_CAPACITY);
        dispatcher = dispatcher.with_order_channel(order_tx);
        tracing::info!("⚡ Live trading enabled");
        Some(tokio::spawn(run_order_router(
            binance.clone(),
            order_rx,
            sink.clone(),
        )))
    } else {
        None
    };

    // ========================================================================
    // Kline streams
    // ========================================================================

    let (candle_tx, candle_rx) = mpsc::channel(CANDLE_CHANNEL_CAPACITY);
    for stream in KlineStream::partition(&symbols, cli.interval, &candle_tx) {
        background.spawn(stream.run());
    }
    drop(candle_tx);
    tracing::info!("📡 Streaming {} symbols", symbols.len());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut dispatcher_handle =
        tokio::spawn(run_dispatcher(dispatcher, candle_rx, queries, shutdown_rx));

    // ========================================================================
    // Shutdown
    // ========================================================================

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        result = &mut dispatcher_handle => Some(result),
    };

    let summary = match finished {
        None => {
            tracing::info!("Received Ctrl+C, shutting down...");
            // The dispatcher may already be gone
            let _ = shutdown_tx.send(());
            dispatcher_handle.await.context("Dispatcher task failed")?
        }
        Some(result) => {
            tracing::error!("Dispatcher stopped without a shutdown request");
            result.context("Dispatcher task failed")?
        }
    };

    background.shutdown().await;

    // Closing orders and the final notifications are flushed before exit
    if let Some(router) = router_handle {
        if tokio::time::timeout(DRAIN_TIMEOUT, router).await.is_err() {
            tracing::warn!("Order router did not drain in time");
        }
    }
    drop(sink);
    if tokio::time::timeout(DRAIN_TIMEOUT, notifier_handle).await.is_err() {
        tracing::warn!("Notifier did not drain in time");
    }

    tracing::info!(
        "📊 Final: balance {:.2} | PNL {:+.2} ({:+.2}%) | W {} / L {}",
        summary.total_balance,
        summary.net_pnl,
        summary.pnl_pct,
        summary.wins,
        summary.losses
    );

    tracing::info!("👋 SignalBot stopped");
    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("signalbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Fallback consumer when no chat is configured
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        tracing::info!(event = event.name(), "📣 {:?}", event);
    }
}
