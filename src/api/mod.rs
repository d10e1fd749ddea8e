pub mod binance;
pub mod binance_stream;
pub mod telegram;

pub use binance::{BinanceClient, DiscoveryFilter};
pub use binance_stream::KlineStream;
pub use telegram::TelegramClient;

use std::future::Future;

use crate::error::BotError;
use crate::models::{Asset, Interval, Side};

/// Exchange metadata and historical closes, used once at startup
pub trait MarketDataGateway: Send + Sync {
    /// Tradable symbols that pass the discovery filter
    fn discover_symbols(
        &self,
        filter: &DiscoveryFilter,
    ) -> impl Future<Output = Result<Vec<Asset>, BotError>> + Send;

    /// Up to `limit` most recent closes, oldest first
    fn backfill(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<f64>, BotError>> + Send;
}

/// Real order placement; only success or failure matters to the caller
pub trait OrderGateway: Send + Sync {
    /// Total wallet balance in the quote currency
    fn wallet_balance(&self) -> impl Future<Output = Result<f64, BotError>> + Send;

    fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
    ) -> impl Future<Output = Result<(), BotError>> + Send;

    /// Flatten whatever the exchange holds for `symbol`
    fn close_position(&self, symbol: &str) -> impl Future<Output = Result<(), BotError>> + Send;
}
