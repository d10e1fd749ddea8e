use super::to_period;
use crate::error::BotError;
use yata::core::Method;
use yata::methods::EMA;

/// Exponential Moving Average over every close (oldest first)
///
/// The average is seeded with the first close, so the series has the same
/// length as `prices`. Needs at least `period` prices.
pub fn ema_series(prices: &[f64], period: usize) -> Result<Vec<f64>, BotError> {
    if prices.len() < period {
        return Err(BotError::Indicator(format!(
            "EMA({}) needs {} prices, got {}",
            period,
            period,
            prices.len()
        )));
    }

    let mut ema = EMA::new(to_period(period)?, &prices[0])
        .map_err(|e| BotError::Indicator(format!("EMA({}): {:?}", period, e)))?;

    Ok(prices.iter().map(|price| ema.next(price)).collect())
}

/// Latest EMA value
pub fn calculate_ema(prices: &[f64], period: usize) -> Result<f64, BotError> {
    ema_series(prices, period)?
        .last()
        .copied()
        .ok_or_else(|| BotError::Indicator("EMA over empty series".to_string()))
}

/// Trailing window of the last `N` EMA values, oldest first
pub fn ema_tail<const N: usize>(prices: &[f64], period: usize) -> Result<[f64; N], BotError> {
    let series = ema_series(prices, period)?;

    if series.len() < N {
        return Err(BotError::Indicator(format!(
            "EMA({}) tail of {} needs {} prices, got {}",
            period,
            N,
            N,
            series.len()
        )));
    }

    let mut tail = [0.0; N];
    tail.copy_from_slice(&series[series.len() - N..]);
    Ok(tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_constant_series() {
        let prices = vec![50.0; 20];
        let ema = calculate_ema(&prices, 9).unwrap();
        assert!((ema - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_follows_uptrend() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let fast = calculate_ema(&prices, 5).unwrap();
        let slow = calculate_ema(&prices, 20).unwrap();

        // Faster average hugs the rising price more tightly
        assert!(fast > slow);
        assert!(fast < 129.0);
    }

    #[test]
    fn test_ema_insufficient_data() {
        let prices = vec![100.0, 102.0];
        assert!(calculate_ema(&prices, 5).is_err());
    }

    #[test]
    fn test_ema_tail_length() {
        let prices: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let tail = ema_tail::<3>(&prices, 5).unwrap();
        let series = ema_series(&prices, 5).unwrap();

        assert_eq!(tail, [series[7], series[8], series[9]]);
    }
}
