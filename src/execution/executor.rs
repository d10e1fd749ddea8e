use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::mpsc;

use crate::api::OrderGateway;
use crate::events::{EngineEvent, NotificationSink};
use crate::execution::position_manager::{EntryRejection, PositionManager};
use crate::execution::Account;
use crate::models::{Asset, Side};
use crate::strategy::Analysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    /// Positions exist only in the ledgers
    Simulated,
    /// Position opens are mirrored as exchange market orders
    Live,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionAction {
    Open { size: f64, quantity: Option<f64> },
    Skip,
}

#[derive(Debug, Clone)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub reason: String,
}

impl ExecutionDecision {
    fn skip(rejection: EntryRejection) -> Self {
        Self {
            action: ExecutionAction::Skip,
            reason: rejection.to_string(),
        }
    }
}

/// Order intents handed to the order router task
#[derive(Debug, Clone, PartialEq)]
pub enum OrderRequest {
    MarketOrder {
        symbol: String,
        side: Side,
        quantity: f64,
    },
    ClosePosition {
        symbol: String,
    },
}

/// Decides whether and at what size an actionable analysis becomes a position
pub struct Executor {
    mode: TradingMode,
}

impl Executor {
    pub fn new(mode: TradingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    /// Size an entry and check every precondition
    ///
    /// # Arguments
    /// * `analysis` - Actionable snapshot for the symbol
    /// * `asset` - Exchange metadata, required in live mode for quantity bounds
    /// * `account` - Balance ledger, read only
    /// * `positions` - Position ledger, read only
    pub fn plan_entry(
        &self,
        analysis: &Analysis,
        asset: Option<&Asset>,
        account: &Account,
        positions: &PositionManager,
    ) -> ExecutionDecision {
        if analysis.side.side().is_none() {
            return ExecutionDecision::skip(EntryRejection::NoSide);
        }

        let size = position_size(account.total_balance(), positions.max_positions());

        if let Err(rejection) =
            positions.check_entry(&analysis.symbol, size, account.available_balance())
        {
            return ExecutionDecision::skip(rejection);
        }

        let quantity = match self.mode {
            TradingMode::Simulated => None,
            TradingMode::Live => {
                let Some(asset) = asset else {
                    return ExecutionDecision::skip(EntryRejection::UnknownAsset);
                };
                match order_quantity(size, analysis.price, asset) {
                    Ok(q) => Some(q),
                    Err(rejection) => return ExecutionDecision::skip(rejection),
                }
            }
        };

        ExecutionDecision {
            action: ExecutionAction::Open { size, quantity },
            reason: format!("{} signal with free slot", analysis.side),
        }
    }
}

/// Per-slot sizing: equal share of the total balance
pub fn position_size(total_balance: f64, max_positions: usize) -> f64 {
    if max_positions == 0 {
        return 0.0;
    }
    total_balance / max_positions as f64
}

/// Base-asset quantity for a quote-currency size
///
/// Truncated toward zero to the asset's quantity precision, then checked
/// against the tradable range.
pub fn order_quantity(size: f64, price: f64, asset: &Asset) -> Result<f64, EntryRejection> {
    let raw = size / price;
    let quantity = Decimal::from_f64(raw)
        .map(|d| d.round_dp_with_strategy(asset.quantity_precision, RoundingStrategy::ToZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(0.0);

    if !asset.accepts_quantity(quantity) {
        return Err(EntryRejection::QuantityOutOfBounds {
            quantity,
            min: asset.min_quantity,
            max: asset.max_quantity,
        });
    }

    Ok(quantity)
}

/// Forward order intents to the exchange; failures are reported, never fatal
pub async fn run_order_router<G, N>(
    gateway: G,
    mut requests: mpsc::Receiver<OrderRequest>,
    notifier: N,
) where
    G: OrderGateway,
    N: NotificationSink,
{
    while let Some(request) = requests.recv().await {
        let result = match &request {
            OrderRequest::MarketOrder {
                symbol,
                side,
                quantity,
            } => gateway.place_market_order(symbol, *side, *quantity).await,
            OrderRequest::ClosePosition { symbol } => gateway.close_position(symbol).await,
        };

        match result {
            Ok(()) => tracing::info!(?request, "✅ Order accepted"),
            Err(e) => {
                tracing::error!(?request, error = %e, "❌ Order failed");
                notifier.notify(EngineEvent::OrderFailed {
                    description: describe(&request),
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!("Order router stopped");
}

fn describe(request: &OrderRequest) -> String {
    match request {
        OrderRequest::MarketOrder {
            symbol,
            side,
            quantity,
        } => format!("{} {} {}", side, quantity, symbol),
        OrderRequest::ClosePosition { symbol } => format!("close {}", symbol),
    }
}
