// Core modules
pub mod alerts;
pub mod api;
pub mod backfill;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod reporting;
pub mod strategy;

// Re-export commonly used types
pub use error::BotError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
