use thiserror::Error;

/// Errors surfaced by the gateways and the startup phase.
///
/// Business-rule rejections (no free slot, insufficient balance, quantity
/// out of bounds) are not represented here: they are skips, not faults.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Exchange error {code}: {msg}")]
    Exchange { code: i64, msg: String },

    #[error("Malformed exchange data: {0}")]
    Malformed(String),

    #[error("Telegram error: {0}")]
    Telegram(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Indicator error: {0}")]
    Indicator(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Insufficient history for {symbol}: got {got} closes, need {need}")]
    InsufficientHistory {
        symbol: String,
        got: usize,
        need: usize,
    },

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}

impl From<config::ConfigError> for BotError {
    fn from(e: config::ConfigError) -> Self {
        BotError::Config(e.to_string())
    }
}

impl From<teloxide::RequestError> for BotError {
    fn from(e: teloxide::RequestError) -> Self {
        BotError::Telegram(e.to_string())
    }
}
