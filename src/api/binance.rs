use chrono::Utc;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::{MarketDataGateway, OrderGateway};
use crate::error::BotError;
use crate::models::{Asset, Interval, Side};

const BINANCE_FUTURES_API_BASE: &str = "https://fapi.binance.com";
const RATE_LIMIT_RPM: u32 = 1200; // USD-M futures request weight per minute
const MAX_RETRIES: u32 = 3;
const RECV_WINDOW_MS: u64 = 5000;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Which contracts are tracked
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryFilter {
    pub quote_asset: String,
    pub excluded_base_assets: Vec<String>,
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            excluded_base_assets: vec!["1000BTTC".to_string()],
        }
    }
}

impl DiscoveryFilter {
    /// Active perpetual coin contracts in the quote asset, minus exclusions
    pub fn accepts(&self, info: &SymbolInfo) -> bool {
        info.quote_asset == self.quote_asset
            && info.contract_type == "PERPETUAL"
            && info.underlying_type == "COIN"
            && info.status == "TRADING"
            && !self.excluded_base_assets.contains(&info.base_asset)
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

/// Contract description from `/fapi/v1/exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub underlying_type: String,
    pub status: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    min_qty: Option<String>,
    max_qty: Option<String>,
}

impl SymbolInfo {
    /// Convert to an `Asset` using the LOT_SIZE quantity bounds
    pub fn to_asset(&self) -> Option<Asset> {
        let lot_size = self.filters.iter().find(|f| f.filter_type == "LOT_SIZE")?;
        let min_quantity = lot_size.min_qty.as_deref()?.parse().ok()?;
        let max_quantity = lot_size.max_qty.as_deref()?.parse().ok()?;

        Some(Asset {
            base_asset: self.base_asset.clone(),
            symbol: self.symbol.clone(),
            min_quantity,
            max_quantity,
            price_precision: self.price_precision,
            quantity_precision: self.quantity_precision,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    total_wallet_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    status: String,
}

#[derive(Clone)]
struct Credentials {
    api_key: String,
    secret: String,
}

/// Binance USD-M futures REST client
///
/// Cloneable; clones share the HTTP pool and the rate limiter. Public
/// market-data endpoints work without credentials, account and order
/// endpoints require them.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    rate_limiter: Arc<BinanceRateLimiter>,
}

impl BinanceClient {
    pub fn new(api_key: Option<String>, secret: Option<String>) -> Result<Self, BotError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let credentials = match (api_key, secret) {
            (Some(api_key), Some(secret)) => Some(Credentials { api_key, secret }),
            _ => None,
        };

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: BINANCE_FUTURES_API_BASE.to_string(),
            credentials,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Point the client at another host (testnet, mock server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Public GET with retry
    async fn get(&self, path: &str, query: &str) -> Result<String, BotError> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        self.send_with_retry(|| Ok(self.client.get(&url))).await
    }

    /// HMAC-SHA256 signed request; the timestamp is refreshed per attempt
    async fn signed(&self, method: Method, path: &str, params: &str) -> Result<String, BotError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| BotError::Config("Binance API credentials not set".to_string()))?;

        self.send_with_retry(|| {
            let mut query = format!(
                "recvWindow={}&timestamp={}",
                RECV_WINDOW_MS,
                Utc::now().timestamp_millis()
            );
            if !params.is_empty() {
                query = format!("{}&{}", params, query);
            }
            let signature = sign(&credentials.secret, &query)?;
            let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

            Ok(self
                .client
                .request(method.clone(), url)
                .header("X-MBX-APIKEY", &credentials.api_key))
        })
        .await
    }

    /// Rate-limited send, backing off on 429/418 and server errors
    async fn send_with_retry<F>(&self, build: F) -> Result<String, BotError>
    where
        F: Fn() -> Result<RequestBuilder, BotError>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.rate_limiter.until_ready().await;

            let response = build()?.send().await?;
            let status = response.status();
            let body = response.text().await?;

            if status.is_success() {
                return Ok(body);
            }

            let retryable = status.as_u16() == 429 || status.as_u16() == 418 || status.is_server_error();
            if retryable && attempt < MAX_RETRIES {
                let backoff_secs = 2u64.pow(attempt);
                tracing::warn!(
                    "Binance returned {}, backing off for {}s (attempt {}/{})",
                    status,
                    backoff_secs,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                continue;
            }

            return Err(match serde_json::from_str::<ApiError>(&body) {
                Ok(api_error) => BotError::Exchange {
                    code: api_error.code,
                    msg: api_error.msg,
                },
                Err(_) => BotError::Exchange {
                    code: i64::from(status.as_u16()),
                    msg: body,
                },
            });
        }
    }

    /// Raw exchange info, unfiltered
    pub async fn exchange_info(&self) -> Result<Vec<SymbolInfo>, BotError> {
        let body = self.get("/fapi/v1/exchangeInfo", "").await?;
        let info: ExchangeInfo = serde_json::from_str(&body)?;
        Ok(info.symbols)
    }

    async fn submit_order(&self, params: &str) -> Result<(), BotError> {
        let body = self.signed(Method::POST, "/fapi/v1/order", params).await?;
        let order: OrderResponse = serde_json::from_str(&body)?;
        tracing::info!(order_id = order.order_id, status = %order.status, "💳 Created order");
        Ok(())
    }
}

impl MarketDataGateway for BinanceClient {
    async fn discover_symbols(&self, filter: &DiscoveryFilter) -> Result<Vec<Asset>, BotError> {
        let symbols = self.exchange_info().await?;
        let total = symbols.len();

        let assets: Vec<Asset> = symbols
            .iter()
            .filter(|info| filter.accepts(info))
            .filter_map(|info| {
                let asset = info.to_asset();
                if asset.is_none() {
                    tracing::warn!(symbol = %info.symbol, "No LOT_SIZE filter, skipping");
                }
                asset
            })
            .collect();

        tracing::info!("🪙 Discovered {} of {} symbols", assets.len(), total);
        Ok(assets)
    }

    async fn backfill(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<f64>, BotError> {
        let query = format!("symbol={}&interval={}&limit={}", symbol, interval, limit);
        let body = self.get("/fapi/v1/klines", &query).await?;
        parse_kline_closes(&body)
    }
}

impl OrderGateway for BinanceClient {
    async fn wallet_balance(&self) -> Result<f64, BotError> {
        let body = self.signed(Method::GET, "/fapi/v2/account", "").await?;
        let account: AccountInfo = serde_json::from_str(&body)?;

        account
            .total_wallet_balance
            .parse()
            .map_err(|_| BotError::Malformed(format!("wallet balance {:?}", account.total_wallet_balance)))
    }

    async fn place_market_order(&self, symbol: &str, side: Side, quantity: f64) -> Result<(), BotError> {
        let params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}",
            symbol,
            side.as_str(),
            format_quantity(quantity)
        );
        self.submit_order(&params).await
    }

    async fn close_position(&self, symbol: &str) -> Result<(), BotError> {
        let query = format!("symbol={}", symbol);
        let body = self.signed(Method::GET, "/fapi/v2/positionRisk", &query).await?;
        let risks: Vec<PositionRisk> = serde_json::from_str(&body)?;

        let amount: f64 = risks
            .iter()
            .filter(|r| r.symbol == symbol)
            .filter_map(|r| r.position_amt.parse::<f64>().ok())
            .sum();

        if amount == 0.0 {
            tracing::info!(symbol = %symbol, "No exchange position to close");
            return Ok(());
        }

        let side = if amount > 0.0 { Side::Sell } else { Side::Buy };
        let params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&reduceOnly=true",
            symbol,
            side.as_str(),
            format_quantity(amount.abs())
        );
        self.submit_order(&params).await
    }
}

fn sign(secret: &str, query: &str) -> Result<String, BotError> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::Config(e.to_string()))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Shortest decimal rendering of a quantity, no float noise
pub fn format_quantity(quantity: f64) -> String {
    Decimal::from_f64(quantity)
        .map(|d| d.normalize().to_string())
        .unwrap_or_else(|| quantity.to_string())
}

/// Close prices (index 4) from a klines response, oldest first
pub fn parse_kline_closes(body: &str) -> Result<Vec<f64>, BotError> {
    let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(body)?;

    rows.iter()
        .map(|row| {
            row.get(4)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| BotError::Malformed(format!("kline row {:?}", row)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const EXCHANGE_INFO: &str = r#"{
        "timezone": "UTC",
        "symbols": [
            {"symbol": "BTCUSDT", "baseAsset": "BTC", "quoteAsset": "USDT", "contractType": "PERPETUAL",
             "underlyingType": "COIN", "status": "TRADING", "pricePrecision": 2, "quantityPrecision": 3,
             "filters": [{"filterType": "PRICE_FILTER", "minPrice": "0.10"},
                         {"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "1000", "stepSize": "0.001"}]},
            {"symbol": "BTCUSDT_240329", "baseAsset": "BTC", "quoteAsset": "USDT", "contractType": "CURRENT_QUARTER",
             "underlyingType": "COIN", "status": "TRADING", "pricePrecision": 1, "quantityPrecision": 3,
             "filters": [{"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "500"}]},
            {"symbol": "1000BTTCUSDT", "baseAsset": "1000BTTC", "quoteAsset": "USDT", "contractType": "PERPETUAL",
             "underlyingType": "COIN", "status": "TRADING", "pricePrecision": 7, "quantityPrecision": 0,
             "filters": [{"filterType": "LOT_SIZE", "minQty": "1", "maxQty": "10000000"}]},
            {"symbol": "ETHBUSD", "baseAsset": "ETH", "quoteAsset": "BUSD", "contractType": "PERPETUAL",
             "underlyingType": "COIN", "status": "TRADING", "pricePrecision": 2, "quantityPrecision": 3,
             "filters": [{"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "10000"}]},
            {"symbol": "DEFIUSDT", "baseAsset": "DEFI", "quoteAsset": "USDT", "contractType": "PERPETUAL",
             "underlyingType": "INDEX", "status": "TRADING", "pricePrecision": 1, "quantityPrecision": 3,
             "filters": [{"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "100"}]},
            {"symbol": "SOLUSDT", "baseAsset": "SOL", "quoteAsset": "USDT", "contractType": "PERPETUAL",
             "underlyingType": "COIN", "status": "SETTLING", "pricePrecision": 3, "quantityPrecision": 0,
             "filters": [{"filterType": "LOT_SIZE", "minQty": "1", "maxQty": "100000"}]}
        ]
    }"#;

    fn client(url: &str) -> BinanceClient {
        BinanceClient::new(Some("key".to_string()), Some("secret".to_string()))
            .unwrap()
            .with_base_url(url)
    }

    #[tokio::test]
    async fn test_discover_symbols_filters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(EXCHANGE_INFO)
            .create_async()
            .await;

        let assets = client(&server.url())
            .discover_symbols(&DiscoveryFilter::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].symbol, "BTCUSDT");
        assert_eq!(assets[0].min_quantity, 0.001);
        assert_eq!(assets[0].max_quantity, 1000.0);
        assert_eq!(assets[0].quantity_precision, 3);
    }

    #[tokio::test]
    async fn test_backfill_closes() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/fapi/v1/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "1h".into()),
                Matcher::UrlEncoded("limit".into(), "3".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"[
                [1700000000000, "100.0", "101.0", "99.0", "100.5", "10", 1700003599999, "1005", 10, "5", "502", "0"],
                [1700003600000, "100.5", "102.0", "100.0", "101.5", "10", 1700007199999, "1015", 10, "5", "507", "0"],
                [1700007200000, "101.5", "103.0", "101.0", "102.5", "10", 1700010799999, "1025", 10, "5", "512", "0"]
            ]"#,
            )
            .create_async()
            .await;

        let closes = client(&server.url())
            .backfill("BTCUSDT", Interval::H1, 3)
            .await
            .unwrap();
        assert_eq!(closes, vec![100.5, 101.5, 102.5]);
    }

    #[tokio::test]
    async fn test_exchange_error_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/fapi/v1/klines")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code": -1121, "msg": "Invalid symbol."}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .backfill("NOPEUSDT", Interval::H1, 200)
            .await
            .unwrap_err();

        match err {
            BotError::Exchange { code, msg } => {
                assert_eq!(code, -1121);
                assert_eq!(msg, "Invalid symbol.");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_signed_order_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/fapi/v1/order")
            .match_header("X-MBX-APIKEY", "key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("type".into(), "MARKET".into()),
                Matcher::UrlEncoded("quantity".into(), "0.006".into()),
                Matcher::Regex("signature=[0-9a-f]{64}".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"orderId": 42, "status": "NEW"}"#)
            .create_async()
            .await;

        client(&server.url())
            .place_market_order("BTCUSDT", Side::Sell, 0.006)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_close_long_position() {
        let mut server = mockito::Server::new_async().await;
        let _risk = server
            .mock("GET", "/fapi/v2/positionRisk")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_status(200)
            .with_body(r#"[{"symbol": "BTCUSDT", "positionAmt": "0.500", "entryPrice": "100.0"}]"#)
            .create_async()
            .await;
        let order = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("type".into(), "MARKET".into()),
                Matcher::UrlEncoded("quantity".into(), "0.5".into()),
                Matcher::UrlEncoded("reduceOnly".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"orderId": 7, "status": "NEW"}"#)
            .expect(1)
            .create_async()
            .await;

        client(&server.url()).close_position("BTCUSDT").await.unwrap();
        order.assert_async().await;
    }

    #[tokio::test]
    async fn test_close_flat_position_sends_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _risk = server
            .mock("GET", "/fapi/v2/positionRisk")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"symbol": "BTCUSDT", "positionAmt": "0.000", "entryPrice": "0.0"}]"#)
            .create_async()
            .await;
        let order = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{}")
            .expect(0)
            .create_async()
            .await;

        client(&server.url()).close_position("BTCUSDT").await.unwrap();
        order.assert_async().await;
    }

    #[tokio::test]
    async fn test_wallet_balance() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/fapi/v2/account")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"totalWalletBalance": "1234.50", "assets": []}"#)
            .create_async()
            .await;

        let balance = client(&server.url()).wallet_balance().await.unwrap();
        assert_eq!(balance, 1234.5);
    }

    #[tokio::test]
    async fn test_signed_requires_credentials() {
        let client = BinanceClient::new(None, None).unwrap();
        assert!(!client.has_credentials());
        assert!(matches!(
            client.wallet_balance().await,
            Err(BotError::Config(_))
        ));
    }

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(0.006), "0.006");
        assert_eq!(format_quantity(2.0), "2");
        assert_eq!(format_quantity(150.25), "150.25");
    }

    #[test]
    fn test_sign_known_vector() {
        // Example from the Binance API documentation
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[tokio::test]
    #[ignore] // Hits the live API
    async fn test_discover_symbols_live() {
        let client = BinanceClient::new(None, None).unwrap();
        let assets = client
            .discover_symbols(&DiscoveryFilter::default())
            .await
            .unwrap();
        assert!(assets.iter().any(|a| a.symbol == "BTCUSDT"));
    }
}
