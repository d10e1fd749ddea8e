use super::to_period;
use crate::error::BotError;
use yata::core::Method;
use yata::methods::RMA;

/// Calculate Relative Strength Index (RSI)
///
/// Gains and losses are smoothed with Wilder's running moving average.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
pub fn calculate_rsi(prices: &[f64], period: usize) -> Result<f64, BotError> {
    if prices.len() < period + 1 {
        return Err(BotError::Indicator(format!(
            "RSI({}) needs {} prices, got {}",
            period,
            period + 1,
            prices.len()
        )));
    }

    let length = to_period(period)?;
    let mut gains = RMA::new(length, &0.0)
        .map_err(|e| BotError::Indicator(format!("RSI({}) gains: {:?}", period, e)))?;
    let mut losses = RMA::new(length, &0.0)
        .map_err(|e| BotError::Indicator(format!("RSI({}) losses: {:?}", period, e)))?;

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for window in prices.windows(2) {
        let change = window[1] - window[0];
        avg_gain = gains.next(&change.max(0.0));
        avg_loss = losses.next(&(-change).max(0.0));
    }

    if avg_loss == 0.0 {
        // Flat series has no momentum either way
        return Ok(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Ok(100.0 - (100.0 / (1.0 + rs)))
}
