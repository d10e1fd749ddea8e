use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

use crate::alerts::AlertBook;
use crate::events::{EngineEvent, NotificationSink};
use crate::execution::executor::{ExecutionAction, Executor, OrderRequest, TradingMode};
use crate::execution::{Account, AccountSummary, CandleBook, PositionManager};
use crate::indicators::IndicatorSource;
use crate::models::{Asset, CandleUpdate, Interval, Side};
use crate::reporting::{ReportKind, ReportQuery, ReportResponse};
use crate::strategy::{analyze, Analysis, SignalConfig};

/// Behaviour switches for the dispatcher, taken from the CLI
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub interval: Interval,
    /// Publish signal-detected events
    pub notify_signals: bool,
    /// Open positions on actionable signals (simulated or live)
    pub open_positions: bool,
    pub mode: TradingMode,
    pub signal: SignalConfig,
}

/// Single owner of all per-symbol and ledger state
///
/// Every mutation goes through `on_candle`, so ledger updates are totally
/// ordered without locks. Reports are answered from the same owner.
pub struct Dispatcher<I, N> {
    config: DispatcherConfig,
    candles: CandleBook,
    assets: HashMap<String, Asset>,
    indicators: I,
    positions: PositionManager,
    account: Account,
    executor: Executor,
    alerts: AlertBook,
    last_acted: HashMap<String, Side>,
    notifier: N,
    orders: Option<mpsc::Sender<OrderRequest>>,
}

impl<I, N> Dispatcher<I, N>
where
    I: IndicatorSource,
    N: NotificationSink,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DispatcherConfig,
        candles: CandleBook,
        assets: HashMap<String, Asset>,
        indicators: I,
        positions: PositionManager,
        account: Account,
        alerts: AlertBook,
        notifier: N,
    ) -> Self {
        let executor = Executor::new(config.mode);
        Self {
            config,
            candles,
            assets,
            indicators,
            positions,
            account,
            executor,
            alerts,
            last_acted: HashMap::new(),
            notifier,
            orders: None,
        }
    }

    /// Route live-mode order intents to the order router task
    pub fn with_order_channel(mut self, orders: mpsc::Sender<OrderRequest>) -> Self {
        self.orders = Some(orders);
        self
    }

    /// Announce the session on the notification channel
    pub fn start_session(&self) {
        tracing::info!(
            interval = %self.config.interval,
            symbols = self.candles.len(),
            balance = self.account.initial_balance(),
            "🚀 Session started"
        );

        self.notifier.notify(EngineEvent::SessionStarted {
            interval: self.config.interval,
            symbols: self.candles.len(),
            initial_balance: self.account.initial_balance(),
            live: self.executor.mode() == TradingMode::Live,
        });
    }

    /// Process one candle update end to end
    ///
    /// Buffer → exits → alerts → analysis → entry. Returns the analysis when
    /// one could be computed.
    pub fn on_candle(&mut self, update: &CandleUpdate) -> Option<Analysis> {
        let symbol = update.symbol.as_str();
        let price = update.close;

        if !price.is_finite() {
            tracing::warn!(symbol = %symbol, price, "Rejected non-finite price");
            return None;
        }

        if !self.candles.update(symbol, price, update.is_final) {
            tracing::debug!(symbol = %symbol, "Update for untracked symbol ignored");
            return None;
        }

        self.check_exit(symbol, price, update);
        self.check_alerts(symbol, price);

        let closes = self.candles.get(symbol)?.closes();
        let indicators = match self.indicators.compute(closes) {
            Ok(set) if set.is_finite() => set,
            Ok(_) => {
                tracing::warn!(symbol = %symbol, "Rejected non-finite indicator output");
                return None;
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Indicator computation failed");
                return None;
            }
        };

        let analysis = analyze(symbol, price, &indicators, &self.config.signal);

        if analysis.is_actionable(self.last_acted.get(symbol).copied()) {
            self.act_on(&analysis, update);
        }

        Some(analysis)
    }

    fn check_exit(&mut self, symbol: &str, price: f64, update: &CandleUpdate) {
        let Some(position) = self.positions.check_exit(symbol, price, update.event_time) else {
            return;
        };

        self.account.log_closed_position(position);
        self.notifier.notify(EngineEvent::PositionClosed {
            position: position.clone(),
            summary: self.account.summary(),
        });

        // The exchange position must follow the ledger
        if self.executor.mode() == TradingMode::Live {
            self.submit(OrderRequest::ClosePosition {
                symbol: symbol.to_string(),
            });
        }
    }

    fn check_alerts(&mut self, symbol: &str, price: f64) {
        for alert in self.alerts.check(symbol, price) {
            tracing::info!(
                symbol = %symbol,
                target = alert.price,
                condition = %alert.condition,
                price,
                "🔔 Alert triggered"
            );
            self.notifier
                .notify(EngineEvent::AlertTriggered { alert, price });
        }
    }

    fn act_on(&mut self, analysis: &Analysis, update: &CandleUpdate) {
        let Some(side) = analysis.side.side() else {
            return;
        };
        self.last_acted.insert(analysis.symbol.clone(), side);

        tracing::info!(
            symbol = %analysis.symbol,
            side = %side,
            signal = %analysis.entry_signal(),
            rsi = analysis.rsi,
            "⚡ Signal detected"
        );

        if self.config.notify_signals {
            self.notifier.notify(EngineEvent::SignalDetected {
                analysis: analysis.clone(),
            });
        }

        if !self.config.open_positions {
            return;
        }

        let decision = self.executor.plan_entry(
            analysis,
            self.assets.get(&analysis.symbol),
            &self.account,
            &self.positions,
        );

        let ExecutionAction::Open { size, quantity } = decision.action else {
            tracing::debug!(symbol = %analysis.symbol, reason = %decision.reason, "Entry skipped");
            return;
        };

        let Some(position) = self.positions.open_position(
            analysis,
            size,
            quantity,
            self.account.available_balance(),
            update.event_time,
        ) else {
            return;
        };

        self.account.log_new_position(position);
        self.notifier.notify(EngineEvent::PositionOpened {
            position: position.clone(),
        });

        if let Some(quantity) = quantity {
            self.submit(OrderRequest::MarketOrder {
                symbol: analysis.symbol.clone(),
                side,
                quantity,
            });
        }
    }

    fn submit(&self, request: OrderRequest) {
        let Some(orders) = &self.orders else {
            tracing::warn!(?request, "No order channel, order not sent");
            return;
        };

        if let Err(e) = orders.try_send(request) {
            tracing::error!(error = %e, "❌ Order request dropped");
        }
    }

    /// Answer a read-only report query
    pub fn report(&self, kind: ReportKind) -> ReportResponse {
        match kind {
            ReportKind::AccountSummary => ReportResponse::AccountSummary(self.account.summary()),
            ReportKind::NetPnl => ReportResponse::NetPnl {
                net_pnl: self.account.net_pnl(),
                pnl_pct: self.account.pnl_pct(),
            },
            ReportKind::OpenPositions => ReportResponse::OpenPositions(
                self.account
                    .open_positions_pnl(&self.candles.latest_prices()),
            ),
            ReportKind::UnrealizedPnl => ReportResponse::UnrealizedPnl(
                self.account.unrealized_pnl(&self.candles.latest_prices()),
            ),
        }
    }

    /// Flush the final report; in live mode also close exchange positions
    pub fn finish(&mut self) -> AccountSummary {
        if self.executor.mode() == TradingMode::Live {
            let symbols: Vec<String> = self
                .positions
                .open_positions()
                .iter()
                .map(|p| p.symbol.clone())
                .collect();

            for symbol in symbols {
                self.submit(OrderRequest::ClosePosition { symbol });
            }
        }

        let summary = self.account.summary();
        let unrealized = self.account.unrealized_pnl(&self.candles.latest_prices());

        tracing::info!(
            net_pnl = summary.net_pnl,
            pnl_pct = summary.pnl_pct,
            wins = summary.wins,
            losses = summary.losses,
            open = summary.open_positions,
            unrealized = unrealized.net_pnl,
            "🏁 Session ended"
        );

        self.notifier.notify(EngineEvent::SessionEnded {
            summary: summary.clone(),
            unrealized,
        });

        summary
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn candles(&self) -> &CandleBook {
        &self.candles
    }

    pub fn alerts(&self) -> &AlertBook {
        &self.alerts
    }
}

/// Drive the dispatcher until shutdown or until the candle stream ends
///
/// Queries are polled ahead of candles so a burst of updates cannot starve
/// them. Before answering, the updates already queued are applied, so a
/// report always sees every update sent before the query.
pub async fn run_dispatcher<I, N>(
    mut dispatcher: Dispatcher<I, N>,
    mut candles: mpsc::Receiver<CandleUpdate>,
    mut queries: mpsc::Receiver<ReportQuery>,
    mut shutdown: oneshot::Receiver<()>,
) -> AccountSummary
where
    I: IndicatorSource,
    N: NotificationSink,
{
    dispatcher.start_session();

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }

            Some(query) = queries.recv() => {
                for _ in 0..candles.len() {
                    match candles.try_recv() {
                        Ok(update) => {
                            dispatcher.on_candle(&update);
                        }
                        Err(_) => break,
                    }
                }

                let response = dispatcher.report(query.kind);
                if query.reply.send(response).is_err() {
                    tracing::debug!(kind = %query.kind, "Report requester went away");
                }
            }

            update = candles.recv() => match update {
                Some(update) => {
                    dispatcher.on_candle(&update);
                }
                None => {
                    tracing::warn!("Candle stream ended");
                    break;
                }
            },
        }
    }

    dispatcher.finish()
}
