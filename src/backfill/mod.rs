// Startup backfill: fetch history for every discovered symbol before streaming starts
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::api::MarketDataGateway;
use crate::error::BotError;
use crate::execution::{CandleBook, CandleBuffer};
use crate::models::{Asset, Interval};

/// Outcome of the backfill phase
#[derive(Debug, Default)]
pub struct BackfillReport {
    /// Fully populated buffers, one per tracked symbol
    pub book: CandleBook,
    /// Symbols with fewer closes than the buffer length (too new)
    pub too_short: Vec<String>,
    /// Symbols whose fetch failed
    pub failed: Vec<(String, BotError)>,
}

impl BackfillReport {
    pub fn dropped(&self) -> usize {
        self.too_short.len() + self.failed.len()
    }
}

/// Backfill `buffer_len` closes for every asset in parallel
///
/// Requests are spread by a shared rate limiter. Returns only after every
/// task has finished, so streaming never starts on a partial book. A symbol
/// that cannot be filled to `buffer_len` is dropped from the tracked set.
pub async fn backfill_all<G>(
    gateway: G,
    assets: &[Asset],
    interval: Interval,
    buffer_len: usize,
    requests_per_minute: u32,
) -> BackfillReport
where
    G: MarketDataGateway + Clone + 'static,
{
    let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
    let limiter = Arc::new(RateLimiter::direct(quota));

    tracing::info!(
        "📥 Backfilling {} closes for {} symbols ({} interval)",
        buffer_len,
        assets.len(),
        interval
    );

    let mut tasks = JoinSet::new();
    for asset in assets {
        let gateway = gateway.clone();
        let limiter = limiter.clone();
        let symbol = asset.symbol.clone();

        tasks.spawn(async move {
            limiter.until_ready().await;
            let result = gateway.backfill(&symbol, interval, buffer_len).await;
            (symbol, result)
        });
    }

    let mut report = BackfillReport::default();

    // Barrier: drain every task before returning
    while let Some(joined) = tasks.join_next().await {
        let (symbol, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Backfill task panicked");
                continue;
            }
        };

        let closes = match result {
            Ok(closes) => closes,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Backfill failed, dropping symbol");
                report.failed.push((symbol, e));
                continue;
            }
        };

        match CandleBuffer::from_history(&symbol, closes, buffer_len) {
            Ok(buffer) => report.book.insert(symbol, buffer),
            Err(e) => {
                tracing::debug!(symbol = %symbol, error = %e, "Dropping symbol");
                report.too_short.push(symbol);
            }
        }
    }

    tracing::info!(
        "✅ Backfill complete: {} tracked, {} too new, {} failed",
        report.book.len(),
        report.too_short.len(),
        report.failed.len()
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DiscoveryFilter;
    use std::collections::HashMap;

    /// Gateway serving canned close histories
    #[derive(Clone)]
    struct CannedGateway {
        histories: Arc<HashMap<String, Vec<f64>>>,
    }

    impl MarketDataGateway for CannedGateway {
        async fn discover_symbols(&self, _filter: &DiscoveryFilter) -> Result<Vec<Asset>, BotError> {
            Ok(Vec::new())
        }

        async fn backfill(
            &self,
            symbol: &str,
            _interval: Interval,
            limit: usize,
        ) -> Result<Vec<f64>, BotError> {
            let closes = self.histories.get(symbol).ok_or_else(|| BotError::Exchange {
                code: -1121,
                msg: "Invalid symbol.".to_string(),
            })?;
            let start = closes.len().saturating_sub(limit);
            Ok(closes[start..].to_vec())
        }
    }

    fn asset(symbol: &str) -> Asset {
        Asset {
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            symbol: symbol.to_string(),
            min_quantity: 0.001,
            max_quantity: 1000.0,
            price_precision: 2,
            quantity_precision: 3,
        }
    }

    #[tokio::test]
    async fn test_backfill_drops_short_and_failed() {
        let histories = HashMap::from([
            ("BTCUSDT".to_string(), (0..300).map(|i| i as f64).collect::<Vec<_>>()),
            ("ETHUSDT".to_string(), vec![1.0; 200]),
            ("NEWUSDT".to_string(), vec![1.0; 50]),
        ]);
        let gateway = CannedGateway {
            histories: Arc::new(histories),
        };
        let assets = vec![
            asset("BTCUSDT"),
            asset("ETHUSDT"),
            asset("NEWUSDT"),
            asset("GONEUSDT"),
        ];

        let report = backfill_all(gateway, &assets, Interval::H1, 200, 6000).await;

        assert_eq!(report.book.len(), 2);
        assert!(report.book.contains("BTCUSDT"));
        assert!(report.book.contains("ETHUSDT"));
        assert_eq!(report.too_short, vec!["NEWUSDT".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "GONEUSDT");
        assert_eq!(report.dropped(), 2);

        let btc = report.book.get("BTCUSDT").unwrap();
        assert_eq!(btc.len(), 200);
        assert_eq!(btc.last(), 299.0);
    }
}
