use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::BotError;
use crate::models::{CandleUpdate, Interval};

const BINANCE_FUTURES_STREAM_BASE: &str = "wss://fstream.binance.com";
/// Binance caps the streams carried by one connection
pub const MAX_STREAMS_PER_CONNECTION: usize = 200;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Combined kline stream for a group of symbols on one connection
///
/// Parses each kline event into a `CandleUpdate` and forwards it to the
/// dispatcher. Reconnects with exponential backoff; stops once the
/// dispatcher side of the channel is gone.
pub struct KlineStream {
    base_url: String,
    symbols: Vec<String>,
    interval: Interval,
    updates: mpsc::Sender<CandleUpdate>,
}

enum StreamEnd {
    /// Server closed the connection; reconnect
    Closed,
    /// Receiver dropped; stop for good
    ReceiverGone,
}

impl KlineStream {
    pub fn new(symbols: Vec<String>, interval: Interval, updates: mpsc::Sender<CandleUpdate>) -> Self {
        Self {
            base_url: BINANCE_FUTURES_STREAM_BASE.to_string(),
            symbols,
            interval,
            updates,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// One stream per connection-sized chunk of symbols
    pub fn partition(
        symbols: &[String],
        interval: Interval,
        updates: &mpsc::Sender<CandleUpdate>,
    ) -> Vec<KlineStream> {
        symbols
            .chunks(MAX_STREAMS_PER_CONNECTION)
            .map(|chunk| KlineStream::new(chunk.to_vec(), interval, updates.clone()))
            .collect()
    }

    /// Combined-stream URL: `/stream?streams=btcusdt@kline_1h/ethusdt@kline_1h`
    pub fn url(&self) -> Result<Url, BotError> {
        let streams: Vec<String> = self
            .symbols
            .iter()
            .map(|s| format!("{}@kline_{}", s.to_lowercase(), self.interval))
            .collect();

        let raw = format!("{}/stream?streams={}", self.base_url, streams.join("/"));
        Url::parse(&raw).map_err(|e| BotError::WebSocket(e.to_string()))
    }

    /// Run until the receiver goes away. Call inside `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);

        loop {
            tracing::info!(symbols = self.symbols.len(), "📡 Connecting kline stream");

            match self.connect_once().await {
                Ok(StreamEnd::ReceiverGone) => {
                    tracing::info!("Kline stream stopped");
                    return;
                }
                Ok(StreamEnd::Closed) => {
                    tracing::info!("Kline stream closed by server, reconnecting");
                    backoff = Duration::from_secs(1);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, backoff = ?backoff, "Kline stream error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }

            if self.updates.is_closed() {
                return;
            }
        }
    }

    async fn connect_once(&self) -> Result<StreamEnd, BotError> {
        let url = self.url()?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| BotError::WebSocket(e.to_string()))?;

        let (_, mut read) = ws_stream.split();

        while let Some(message) = read.next().await {
            let message = message.map_err(|e| BotError::WebSocket(e.to_string()))?;

            let Message::Text(text) = message else {
                continue;
            };

            match parse_kline_message(&text) {
                Ok(Some(update)) => {
                    if self.updates.send(update).await.is_err() {
                        return Ok(StreamEnd::ReceiverGone);
                    }
                }
                Ok(None) => {}
                // Malformed candle: fatal to nothing but this message
                Err(e) => tracing::warn!(error = %e, "Failed to parse kline event"),
            }
        }

        Ok(StreamEnd::Closed)
    }
}

#[derive(Deserialize)]
struct CombinedMessage {
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct KlineEvent {
    #[serde(rename = "E")]
    event_time_ms: i64,
    #[serde(rename = "s")]
    symbol: String,
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

fn parse_price(field: &str, raw: &str) -> Result<f64, BotError> {
    raw.parse()
        .map_err(|_| BotError::Malformed(format!("kline {} {:?}", field, raw)))
}

/// Parse a raw or combined-stream kline message; other events yield None
pub fn parse_kline_message(text: &str) -> Result<Option<CandleUpdate>, BotError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let payload = if value.get("stream").is_some() {
        serde_json::from_value::<CombinedMessage>(value)?.data
    } else {
        value
    };

    if payload.get("e").and_then(|v| v.as_str()) != Some("kline") {
        return Ok(None);
    }

    let event: KlineEvent = serde_json::from_value(payload)?;
    let k = event.k;

    let event_time: DateTime<Utc> = Utc
        .timestamp_millis_opt(event.event_time_ms)
        .single()
        .unwrap_or_else(Utc::now);

    Ok(Some(CandleUpdate {
        symbol: event.symbol,
        open: parse_price("open", &k.open)?,
        high: parse_price("high", &k.high)?,
        low: parse_price("low", &k.low)?,
        close: parse_price("close", &k.close)?,
        is_final: k.is_closed,
        event_time,
    }))
}
