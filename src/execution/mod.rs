// Candle ingestion, position and balance ledgers, and the dispatcher that ties them together
pub mod account;
pub mod candle_buffer;
pub mod dispatcher;
pub mod executor;
pub mod position_manager;

pub use account::{Account, AccountSummary, OpenPositionPnl, UnrealizedPnl};
pub use candle_buffer::{CandleBook, CandleBuffer};
pub use dispatcher::{run_dispatcher, Dispatcher, DispatcherConfig};
pub use executor::{
    order_quantity, position_size, run_order_router, ExecutionAction, ExecutionDecision,
    Executor, OrderRequest, TradingMode,
};
pub use position_manager::{
    EntryRejection, ExitReason, Position, PositionId, PositionManager, PositionStatus,
};
