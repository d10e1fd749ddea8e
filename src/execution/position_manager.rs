use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::models::Side;
use crate::strategy::Analysis;

/// Opaque handle to a position, shared with the account ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(Uuid);

impl PositionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExitReason::StopLoss => "SL",
            ExitReason::TakeProfit => "TP",
        })
    }
}

/// Why an entry was skipped. Business rules, not faults.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryRejection {
    NoSide,
    AlreadyOpen,
    NoFreeSlot { open: usize, max: usize },
    InsufficientBalance { needed: f64, available: f64 },
    QuantityOutOfBounds { quantity: f64, min: f64, max: f64 },
    UnknownAsset,
}

impl fmt::Display for EntryRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryRejection::NoSide => write!(f, "no side recommended"),
            EntryRejection::AlreadyOpen => write!(f, "already have open position"),
            EntryRejection::NoFreeSlot { open, max } => {
                write!(f, "no free slot ({}/{} open)", open, max)
            }
            EntryRejection::InsufficientBalance { needed, available } => write!(
                f,
                "insufficient balance (need {:.2}, available {:.2})",
                needed, available
            ),
            EntryRejection::QuantityOutOfBounds { quantity, min, max } => write!(
                f,
                "quantity {} outside tradable range [{}, {}]",
                quantity, min, max
            ),
            EntryRejection::UnknownAsset => write!(f, "asset metadata unavailable"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub entry_signal: String,
    pub entry_time: DateTime<Utc>,
    pub size: f64,                // Quote-currency notional
    pub quantity: Option<f64>,    // Base-asset quantity (real trading only)
    pub stop_loss: f64,
    pub take_profit: f64,
    pub status: PositionStatus,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub exit_time: Option<DateTime<Utc>>,
    pub net_pnl: f64, // Quote currency
    pub pnl_pct: f64, // Percentage
}

impl Position {
    /// Directional PNL ratio at `price`
    ///
    /// BUY: (price - entry) / entry. SELL: (entry - price) / price.
    pub fn pnl_ratio(&self, price: f64) -> f64 {
        match self.side {
            Side::Buy => (price - self.entry_price) / self.entry_price,
            Side::Sell => (self.entry_price - price) / price,
        }
    }

    /// Exit reason if `price` crosses a target, stop loss first
    pub fn evaluate_close(&self, price: f64) -> Option<ExitReason> {
        let (hit_sl, hit_tp) = match self.side {
            Side::Buy => (price <= self.stop_loss, price >= self.take_profit),
            Side::Sell => (price >= self.stop_loss, price <= self.take_profit),
        };

        if hit_sl {
            Some(ExitReason::StopLoss)
        } else if hit_tp {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// Stop-loss / take-profit targets for an entry
///
/// BUY: SL below and TP above entry. SELL: mirrored.
pub fn calculate_targets(side: Side, price: f64, stop_loss_pct: f64, take_profit_pct: f64) -> (f64, f64) {
    match side {
        Side::Buy => (price - price * stop_loss_pct, price + price * take_profit_pct),
        Side::Sell => (price + price * stop_loss_pct, price - price * take_profit_pct),
    }
}

/// Owns every position, open (one per symbol) and closed
pub struct PositionManager {
    open: HashMap<String, Position>,
    closed: Vec<Position>,
    stop_loss_pct: f64,
    take_profit_pct: f64,
    max_positions: usize,
}

impl PositionManager {
    pub fn new(stop_loss_pct: f64, take_profit_pct: f64, max_positions: usize) -> Self {
        Self {
            open: HashMap::new(),
            closed: Vec::new(),
            stop_loss_pct,
            take_profit_pct,
            max_positions,
        }
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    /// Check the ledger-side preconditions for a new entry
    pub fn check_entry(
        &self,
        symbol: &str,
        size: f64,
        available_balance: f64,
    ) -> Result<(), EntryRejection> {
        if self.has_open_position(symbol) {
            return Err(EntryRejection::AlreadyOpen);
        }

        if self.open.len() >= self.max_positions {
            return Err(EntryRejection::NoFreeSlot {
                open: self.open.len(),
                max: self.max_positions,
            });
        }

        if available_balance < size {
            return Err(EntryRejection::InsufficientBalance {
                needed: size,
                available: available_balance,
            });
        }

        Ok(())
    }

    /// Open a position from an analysis snapshot
    ///
    /// Returns None (and changes nothing) when the snapshot has no side or a
    /// precondition fails. The caller must log the returned position with the
    /// account ledger.
    pub fn open_position(
        &mut self,
        analysis: &Analysis,
        size: f64,
        quantity: Option<f64>,
        available_balance: f64,
        at: DateTime<Utc>,
    ) -> Option<&Position> {
        let side = analysis.side.side()?;

        if let Err(rejection) = self.check_entry(&analysis.symbol, size, available_balance) {
            tracing::debug!(symbol = %analysis.symbol, %rejection, "Entry skipped");
            return None;
        }

        let price = analysis.price;
        let (stop_loss, take_profit) =
            calculate_targets(side, price, self.stop_loss_pct, self.take_profit_pct);

        let position = Position {
            id: PositionId::new(),
            symbol: analysis.symbol.clone(),
            side,
            entry_price: price,
            entry_signal: analysis.entry_signal(),
            entry_time: at,
            size,
            quantity,
            stop_loss,
            take_profit,
            status: PositionStatus::Open,
            exit_price: None,
            exit_reason: None,
            exit_time: None,
            net_pnl: 0.0,
            pnl_pct: 0.0,
        };

        tracing::info!(
            symbol = %position.symbol,
            side = %side,
            entry = price,
            size,
            sl = stop_loss,
            tp = take_profit,
            "📥 Opened position"
        );

        let symbol = position.symbol.clone();
        self.open.insert(symbol.clone(), position);
        self.open.get(&symbol)
    }

    /// Close the symbol's open position if `price` crosses a target
    ///
    /// Returns the closed position. The caller must log it with the account
    /// ledger.
    pub fn check_exit(&mut self, symbol: &str, price: f64, at: DateTime<Utc>) -> Option<&Position> {
        let reason = self.open.get(symbol)?.evaluate_close(price)?;
        self.close_position(symbol, price, reason, at)
    }

    /// Close a position unconditionally; open → closed happens exactly once
    pub fn close_position(
        &mut self,
        symbol: &str,
        exit_price: f64,
        reason: ExitReason,
        at: DateTime<Utc>,
    ) -> Option<&Position> {
        let mut position = self.open.remove(symbol)?;

        let ratio = position.pnl_ratio(exit_price);
        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.exit_reason = Some(reason);
        position.exit_time = Some(at);
        position.net_pnl = ratio * position.size;
        position.pnl_pct = ratio * 100.0;

        tracing::info!(
            symbol = %position.symbol,
            side = %position.side,
            exit = exit_price,
            reason = %reason,
            net_pnl = position.net_pnl,
            pnl_pct = position.pnl_pct,
            "📤 Closed position"
        );

        self.closed.push(position);
        self.closed.last()
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.open.contains_key(symbol)
    }

    pub fn get_open_position(&self, symbol: &str) -> Option<&Position> {
        self.open.get(symbol)
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.open.values().collect()
    }

    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}
