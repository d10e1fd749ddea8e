use serde::Serialize;
use std::collections::HashMap;

use crate::execution::position_manager::{Position, PositionId};
use crate::models::Side;

/// Numbers the ledger keeps for each open position
#[derive(Debug, Clone)]
struct OpenEntry {
    id: PositionId,
    symbol: String,
    side: Side,
    entry_price: f64,
    size: f64,
}

impl OpenEntry {
    fn pnl_ratio(&self, price: f64) -> f64 {
        match self.side {
            Side::Buy => (price - self.entry_price) / self.entry_price,
            Side::Sell => (self.entry_price - price) / price,
        }
    }
}

/// Point-in-time view of the account, used by reports and notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub initial_balance: f64,
    pub total_balance: f64,
    pub allocated_balance: f64,
    pub available_balance: f64,
    pub net_pnl: f64,
    pub pnl_pct: f64,
    pub wins: u32,
    pub losses: u32,
    pub open_positions: usize,
    pub closed_positions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UnrealizedPnl {
    pub net_pnl: f64,
    pub pnl_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenPositionPnl {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub current_price: f64,
    pub size: f64,
    pub net_pnl: f64,
    pub pnl_pct: f64,
}

/// Balance ledger
///
/// Invariant: allocated + available == total (float tolerance), and
/// total == initial + net_pnl.
#[derive(Debug, Clone)]
pub struct Account {
    initial_balance: f64,
    total_balance: f64,
    allocated_balance: f64,
    available_balance: f64,
    net_pnl: f64,
    wins: u32,
    losses: u32,
    open: Vec<OpenEntry>,
    closed: Vec<PositionId>,
}

impl Account {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            initial_balance,
            total_balance: initial_balance,
            allocated_balance: 0.0,
            available_balance: initial_balance,
            net_pnl: 0.0,
            wins: 0,
            losses: 0,
            open: Vec::new(),
            closed: Vec::new(),
        }
    }

    /// Move the position's size from available to allocated
    pub fn log_new_position(&mut self, position: &Position) {
        self.allocated_balance += position.size;
        self.available_balance -= position.size;
        self.open.push(OpenEntry {
            id: position.id,
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            size: position.size,
        });

        debug_assert!(self.is_balanced(), "ledger out of balance after open");
    }

    /// Release the position's size and book its realized PNL
    ///
    /// Unknown ids are ignored so a position can never be booked twice.
    pub fn log_closed_position(&mut self, position: &Position) {
        let Some(index) = self.open.iter().position(|e| e.id == position.id) else {
            tracing::warn!(id = %position.id, symbol = %position.symbol, "Closing unknown position");
            return;
        };
        let entry = self.open.swap_remove(index);

        self.allocated_balance -= entry.size;
        self.available_balance += entry.size + position.net_pnl;
        self.total_balance += position.net_pnl;
        self.net_pnl += position.net_pnl;

        if position.net_pnl >= 0.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }

        self.closed.push(position.id);

        debug_assert!(self.is_balanced(), "ledger out of balance after close");
    }

    /// Realized PNL as a percentage of the initial balance
    pub fn pnl_pct(&self) -> f64 {
        if self.initial_balance == 0.0 {
            return 0.0;
        }
        self.net_pnl / self.initial_balance * 100.0
    }

    /// Mark-to-market PNL of the open positions
    ///
    /// Positions without a price in `prices` contribute nothing.
    pub fn unrealized_pnl(&self, prices: &HashMap<String, f64>) -> UnrealizedPnl {
        let net_pnl: f64 = self
            .open
            .iter()
            .filter_map(|e| prices.get(&e.symbol).map(|p| e.pnl_ratio(*p) * e.size))
            .sum();

        let pnl_pct = if self.allocated_balance > 0.0 {
            net_pnl / self.allocated_balance * 100.0
        } else {
            0.0
        };

        UnrealizedPnl { net_pnl, pnl_pct }
    }

    /// Per-position breakdown of the unrealized PNL
    pub fn open_positions_pnl(&self, prices: &HashMap<String, f64>) -> Vec<OpenPositionPnl> {
        self.open
            .iter()
            .filter_map(|e| {
                let price = *prices.get(&e.symbol)?;
                let ratio = e.pnl_ratio(price);
                Some(OpenPositionPnl {
                    symbol: e.symbol.clone(),
                    side: e.side,
                    entry_price: e.entry_price,
                    current_price: price,
                    size: e.size,
                    net_pnl: ratio * e.size,
                    pnl_pct: ratio * 100.0,
                })
            })
            .collect()
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            initial_balance: self.initial_balance,
            total_balance: self.total_balance,
            allocated_balance: self.allocated_balance,
            available_balance: self.available_balance,
            net_pnl: self.net_pnl,
            pnl_pct: self.pnl_pct(),
            wins: self.wins,
            losses: self.losses,
            open_positions: self.open.len(),
            closed_positions: self.closed.len(),
        }
    }

    /// allocated + available == total, relative to the balance magnitude
    pub fn is_balanced(&self) -> bool {
        let diff = self.allocated_balance + self.available_balance - self.total_balance;
        diff.abs() <= 1e-9 * self.total_balance.abs().max(1.0)
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn total_balance(&self) -> f64 {
        self.total_balance
    }

    pub fn allocated_balance(&self) -> f64 {
        self.allocated_balance
    }

    pub fn available_balance(&self) -> f64 {
        self.available_balance
    }

    pub fn net_pnl(&self) -> f64 {
        self.net_pnl
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_ids(&self) -> impl Iterator<Item = PositionId> + '_ {
        self.open.iter().map(|e| e.id)
    }

    pub fn closed_ids(&self) -> &[PositionId] {
        &self.closed
    }
}
