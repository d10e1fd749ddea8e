// Technical indicators module
// EMA and RSI over a close series, backed by the yata crate

pub mod moving_average;
pub mod rsi;

pub use moving_average::{calculate_ema, ema_series, ema_tail};
pub use rsi::calculate_rsi;

use crate::error::BotError;
use serde::Deserialize;
use yata::core::PeriodType;

/// Indicator periods consumed by the signal engine
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorPeriods {
    pub cross_fast: usize,
    pub cross_slow: usize,
    pub trend_short: usize,
    pub trend_long: usize,
    pub rsi: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            cross_fast: 5,
            cross_slow: 9,
            trend_short: 50,
            trend_long: 200,
            rsi: 14,
        }
    }
}

impl IndicatorPeriods {
    /// Closes needed to compute every indicator
    pub fn min_closes(&self) -> usize {
        [
            self.cross_fast,
            self.cross_slow,
            self.trend_short,
            self.trend_long,
            self.rsi + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
        .max(3)
    }
}

/// Numeric indicator outputs for one close series
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSet {
    /// Last 3 samples of the fast cross average, oldest first
    pub cross_fast: [f64; 3],
    /// Last 3 samples of the slow cross average, oldest first
    pub cross_slow: [f64; 3],
    pub trend_short: f64,
    pub trend_long: f64,
    pub rsi: f64,
}

impl IndicatorSet {
    pub fn is_finite(&self) -> bool {
        self.cross_fast
            .iter()
            .chain(self.cross_slow.iter())
            .chain([self.trend_short, self.trend_long, self.rsi].iter())
            .all(|v| v.is_finite())
    }
}

/// The indicator library seam: closes in, indicator arrays out
pub trait IndicatorSource: Send + Sync {
    fn compute(&self, closes: &[f64]) -> Result<IndicatorSet, BotError>;
}

/// Indicator source backed by yata's EMA and RMA methods
#[derive(Debug, Clone, Default)]
pub struct YataIndicators {
    periods: IndicatorPeriods,
}

impl YataIndicators {
    pub fn new(periods: IndicatorPeriods) -> Self {
        Self { periods }
    }

    pub fn periods(&self) -> &IndicatorPeriods {
        &self.periods
    }
}

impl IndicatorSource for YataIndicators {
    fn compute(&self, closes: &[f64]) -> Result<IndicatorSet, BotError> {
        let p = &self.periods;

        Ok(IndicatorSet {
            cross_fast: ema_tail::<3>(closes, p.cross_fast)?,
            cross_slow: ema_tail::<3>(closes, p.cross_slow)?,
            trend_short: calculate_ema(closes, p.trend_short)?,
            trend_long: calculate_ema(closes, p.trend_long)?,
            rsi: calculate_rsi(closes, p.rsi)?,
        })
    }
}

/// yata periods are bounded by `PeriodType`
pub(crate) fn to_period(period: usize) -> Result<PeriodType, BotError> {
    if period == 0 {
        return Err(BotError::Indicator("period must be positive".to_string()));
    }

    PeriodType::try_from(period)
        .map_err(|_| BotError::Indicator(format!("period {} exceeds {}", period, PeriodType::MAX)))
}
