use crate::indicators::IndicatorSet;
use crate::models::Side;
use serde::Deserialize;
use std::fmt;

/// Fast/slow moving-average cross on the most recent sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cross {
    Bullish,
    Bearish,
    Neutral,
}

/// Price position relative to the two trend averages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    StrongBullish,
    Bullish,
    Bearish,
    StrongBearish,
    Neutral,
}

/// RSI bucket
///
/// Overbought has three severities. Oversold starts at the second severity:
/// anything at or under the oversold level is at least `OversoldX2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscillatorSignal {
    Overbought,
    OverboughtX2,
    OverboughtX3,
    OversoldX2,
    OversoldX3,
    Neutral,
}

/// Recommended side for a new position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSide {
    Buy,
    Sell,
    Neutral,
}

impl SignalSide {
    pub fn side(&self) -> Option<Side> {
        match self {
            SignalSide::Buy => Some(Side::Buy),
            SignalSide::Sell => Some(Side::Sell),
            SignalSide::Neutral => None,
        }
    }
}

impl fmt::Display for Cross {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cross::Bullish => "bullish",
            Cross::Bearish => "bearish",
            Cross::Neutral => "NA",
        })
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trend::StrongBullish => "bullish-X2",
            Trend::Bullish => "bullish",
            Trend::Bearish => "bearish",
            Trend::StrongBearish => "bearish-X2",
            Trend::Neutral => "NA",
        })
    }
}

impl fmt::Display for OscillatorSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OscillatorSignal::Overbought => "overbought",
            OscillatorSignal::OverboughtX2 => "overbought-X2",
            OscillatorSignal::OverboughtX3 => "overbought-X3",
            OscillatorSignal::OversoldX2 => "oversold-X2",
            OscillatorSignal::OversoldX3 => "oversold-X3",
            OscillatorSignal::Neutral => "NA",
        })
    }
}

impl fmt::Display for SignalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalSide::Buy => "BUY",
            SignalSide::Sell => "SELL",
            SignalSide::Neutral => "NA",
        })
    }
}

/// RSI trigger levels
///
/// Overbought levels are checked with `>=`, oversold levels with `<=`,
/// most severe first. `oversold` opens the `OversoldX2` bucket.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct OscillatorThresholds {
    pub overbought: f64,
    pub overbought_x2: f64,
    pub overbought_x3: f64,
    pub oversold: f64,
    pub oversold_x3: f64,
}

impl Default for OscillatorThresholds {
    fn default() -> Self {
        Self {
            overbought: 69.9,
            overbought_x2: 79.9,
            overbought_x3: 89.9,
            oversold: 30.1,
            oversold_x3: 10.1,
        }
    }
}

/// Configuration for signal generation
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SignalConfig {
    #[serde(default)]
    pub thresholds: OscillatorThresholds,
}

/// Point-in-time classification of one symbol
///
/// Built fresh on every update and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub symbol: String,
    pub price: f64,
    /// RSI rounded to 2 decimals
    pub rsi: f64,
    pub oscillator: OscillatorSignal,
    pub trend_short: f64,
    pub trend_long: f64,
    pub cross: Cross,
    pub trend: Trend,
    /// One per non-neutral classification among cross and oscillator
    pub signal_count: u8,
    pub side: SignalSide,
}

impl Analysis {
    /// Whether this snapshot should be notified and possibly traded
    ///
    /// Requires at least one signal, a recommended side, and a side that
    /// differs from the last one acted on for this symbol.
    pub fn is_actionable(&self, last_acted: Option<Side>) -> bool {
        match self.side.side() {
            Some(side) => self.signal_count >= 1 && last_acted != Some(side),
            None => false,
        }
    }

    /// Human-readable description of what triggered an entry
    pub fn entry_signal(&self) -> String {
        let mut parts = Vec::new();

        if self.cross != Cross::Neutral {
            parts.push(format!("{} EMA cross", self.cross));
        }
        if self.oscillator != OscillatorSignal::Neutral {
            parts.push(format!("RSI {}", self.oscillator));
        }

        if parts.is_empty() {
            "NA".to_string()
        } else {
            parts.join(" + ")
        }
    }
}

/// Detect a cross over the last 3 aligned samples
///
/// Each sample contributes +1 when fast >= slow, else -1. Unless all three
/// signs agree, the cross happened and its direction is the latest sign.
/// Only relative order matters, so shifting both series leaves it unchanged.
pub fn detect_cross(fast: &[f64; 3], slow: &[f64; 3]) -> Cross {
    let mut delta = [0i32; 3];
    let mut sum = 0;

    for i in 0..3 {
        delta[i] = if fast[i] < slow[i] { -1 } else { 1 };
        sum += delta[i];
    }

    if sum % 3 == 0 {
        return Cross::Neutral;
    }

    match delta[2] {
        1 => Cross::Bullish,
        -1 => Cross::Bearish,
        _ => Cross::Neutral,
    }
}

/// Classify trend from price against the short and long trend averages
pub fn classify_trend(price: f64, short: f64, long: f64) -> Trend {
    if price >= short && price >= long {
        return Trend::StrongBullish;
    }

    if price >= short || price >= long {
        return Trend::Bullish;
    }

    if price < short && price < long {
        return Trend::StrongBearish;
    }

    if price < short || price < long {
        return Trend::Bearish;
    }

    // Only reachable with NaN inputs
    Trend::Neutral
}

/// Bucket an RSI value
pub fn classify_oscillator(rsi: f64, t: &OscillatorThresholds) -> OscillatorSignal {
    if rsi >= t.overbought_x3 {
        OscillatorSignal::OverboughtX3
    } else if rsi >= t.overbought_x2 {
        OscillatorSignal::OverboughtX2
    } else if rsi >= t.overbought {
        OscillatorSignal::Overbought
    } else if rsi <= t.oversold_x3 {
        OscillatorSignal::OversoldX3
    } else if rsi <= t.oversold {
        OscillatorSignal::OversoldX2
    } else {
        OscillatorSignal::Neutral
    }
}

/// Pick a side only when the cross confirms a move against the long average
///
/// Buy a dip gaining bullish momentum; sell a rally gaining bearish momentum.
pub fn choose_side(price: f64, long: f64, cross: Cross) -> SignalSide {
    if price < long && cross == Cross::Bullish {
        SignalSide::Buy
    } else if price > long && cross == Cross::Bearish {
        SignalSide::Sell
    } else {
        SignalSide::Neutral
    }
}

/// Derive the analysis snapshot for one symbol
///
/// `price` is the latest close in the buffer. Pure function of its inputs;
/// callers must reject non-finite prices and indicator outputs beforehand.
pub fn analyze(
    symbol: &str,
    price: f64,
    indicators: &IndicatorSet,
    config: &SignalConfig,
) -> Analysis {
    let mut signal_count = 0;

    let cross = detect_cross(&indicators.cross_fast, &indicators.cross_slow);
    if cross != Cross::Neutral {
        signal_count += 1;
    }

    let trend = classify_trend(price, indicators.trend_short, indicators.trend_long);

    let rsi = (indicators.rsi * 100.0).round() / 100.0;
    let oscillator = classify_oscillator(rsi, &config.thresholds);
    if oscillator != OscillatorSignal::Neutral {
        signal_count += 1;
    }

    let side = choose_side(price, indicators.trend_long, cross);

    tracing::debug!(
        symbol = %symbol,
        price,
        rsi,
        %cross,
        %trend,
        %oscillator,
        %side,
        "Analysis computed"
    );

    Analysis {
        symbol: symbol.to_string(),
        price,
        rsi,
        oscillator,
        trend_short: indicators.trend_short,
        trend_long: indicators.trend_long,
        cross,
        trend,
        signal_count,
        side,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicators(fast: [f64; 3], slow: [f64; 3], short: f64, long: f64, rsi: f64) -> IndicatorSet {
        IndicatorSet {
            cross_fast: fast,
            cross_slow: slow,
            trend_short: short,
            trend_long: long,
            rsi,
        }
    }

    #[test]
    fn test_bearish_cross_scenario() {
        // deltas [-1, 1, -1], sum -1
        let cross = detect_cross(&[10.0, 11.0, 9.0], &[11.0, 10.5, 10.0]);
        assert_eq!(cross, Cross::Bearish);
    }

    #[test]
    fn test_bullish_cross() {
        let cross = detect_cross(&[9.0, 9.5, 10.5], &[10.0, 10.0, 10.0]);
        assert_eq!(cross, Cross::Bullish);
    }

    #[test]
    fn test_no_cross_when_signs_agree() {
        assert_eq!(
            detect_cross(&[11.0, 12.0, 13.0], &[10.0, 10.0, 10.0]),
            Cross::Neutral
        );
        assert_eq!(
            detect_cross(&[9.0, 8.0, 7.0], &[10.0, 10.0, 10.0]),
            Cross::Neutral
        );
    }

    #[test]
    fn test_equal_averages_count_as_above() {
        // fast == slow yields +1, so [-1, -1, +1] is a bullish cross
        let cross = detect_cross(&[9.0, 9.0, 10.0], &[10.0, 10.0, 10.0]);
        assert_eq!(cross, Cross::Bullish);
    }

    #[test]
    fn test_cross_invariant_to_shift() {
        let cases = [
            ([10.0, 11.0, 9.0], [11.0, 10.5, 10.0]),
            ([9.0, 9.5, 10.5], [10.0, 10.0, 10.0]),
            ([11.0, 12.0, 13.0], [10.0, 10.0, 10.0]),
            ([5.0, 4.0, 6.0], [4.5, 4.5, 5.5]),
        ];

        for (fast, slow) in cases {
            let base = detect_cross(&fast, &slow);
            for shift in [-1000.0, -3.5, 0.25, 42.0, 1e6] {
                let fast_shifted = fast.map(|v| v + shift);
                let slow_shifted = slow.map(|v| v + shift);
                assert_eq!(detect_cross(&fast_shifted, &slow_shifted), base);
            }
        }
    }

    #[test]
    fn test_trend_buckets() {
        assert_eq!(classify_trend(110.0, 100.0, 105.0), Trend::StrongBullish);
        assert_eq!(classify_trend(100.0, 100.0, 100.0), Trend::StrongBullish);
        assert_eq!(classify_trend(102.0, 100.0, 105.0), Trend::Bullish);
        assert_eq!(classify_trend(102.0, 105.0, 100.0), Trend::Bullish);
        assert_eq!(classify_trend(90.0, 100.0, 105.0), Trend::StrongBearish);
        assert_eq!(classify_trend(f64::NAN, 100.0, 105.0), Trend::Neutral);
    }

    #[test]
    fn test_oscillator_buckets() {
        let t = OscillatorThresholds::default();

        assert_eq!(classify_oscillator(91.3, &t), OscillatorSignal::OverboughtX3);
        assert_eq!(classify_oscillator(85.0, &t), OscillatorSignal::OverboughtX2);
        assert_eq!(classify_oscillator(70.0, &t), OscillatorSignal::Overbought);
        assert_eq!(classify_oscillator(50.0, &t), OscillatorSignal::Neutral);
        assert_eq!(classify_oscillator(25.0, &t), OscillatorSignal::OversoldX2);
        assert_eq!(classify_oscillator(15.0, &t), OscillatorSignal::OversoldX2);
        assert_eq!(classify_oscillator(5.0, &t), OscillatorSignal::OversoldX3);
    }

    #[test]
    fn test_oscillator_threshold_edges() {
        let t = OscillatorThresholds::default();

        assert_eq!(classify_oscillator(69.9, &t), OscillatorSignal::Overbought);
        assert_eq!(classify_oscillator(69.89, &t), OscillatorSignal::Neutral);
        assert_eq!(classify_oscillator(30.1, &t), OscillatorSignal::OversoldX2);
        assert_eq!(classify_oscillator(30.11, &t), OscillatorSignal::Neutral);
        assert_eq!(classify_oscillator(20.1, &t), OscillatorSignal::OversoldX2);
        assert_eq!(classify_oscillator(10.11, &t), OscillatorSignal::OversoldX2);
        assert_eq!(classify_oscillator(10.1, &t), OscillatorSignal::OversoldX3);
    }

    #[test]
    fn test_side_selection() {
        assert_eq!(choose_side(90.0, 100.0, Cross::Bullish), SignalSide::Buy);
        assert_eq!(choose_side(110.0, 100.0, Cross::Bearish), SignalSide::Sell);
        // Cross against the long average gives no recommendation
        assert_eq!(choose_side(110.0, 100.0, Cross::Bullish), SignalSide::Neutral);
        assert_eq!(choose_side(90.0, 100.0, Cross::Bearish), SignalSide::Neutral);
        assert_eq!(choose_side(90.0, 100.0, Cross::Neutral), SignalSide::Neutral);
    }

    #[test]
    fn test_analyze_counts_signals() {
        let set = indicators([9.0, 9.5, 10.5], [10.0, 10.0, 10.0], 95.0, 100.0, 25.456);
        let analysis = analyze("BTCUSDT", 90.0, &set, &SignalConfig::default());

        assert_eq!(analysis.cross, Cross::Bullish);
        assert_eq!(analysis.oscillator, OscillatorSignal::OversoldX2);
        assert_eq!(analysis.trend, Trend::StrongBearish);
        assert_eq!(analysis.signal_count, 2);
        assert_eq!(analysis.side, SignalSide::Buy);
        assert_eq!(analysis.rsi, 25.46);
        assert_eq!(analysis.entry_signal(), "bullish EMA cross + RSI oversold-X2");
    }

    #[test]
    fn test_analyze_quiet_market() {
        let set = indicators([11.0, 12.0, 13.0], [10.0, 10.0, 10.0], 95.0, 100.0, 50.0);
        let analysis = analyze("BTCUSDT", 105.0, &set, &SignalConfig::default());

        assert_eq!(analysis.signal_count, 0);
        assert_eq!(analysis.side, SignalSide::Neutral);
        assert!(!analysis.is_actionable(None));
    }

    #[test]
    fn test_actionable_skips_repeated_side() {
        let set = indicators([9.0, 9.5, 10.5], [10.0, 10.0, 10.0], 95.0, 100.0, 50.0);
        let analysis = analyze("BTCUSDT", 90.0, &set, &SignalConfig::default());

        assert!(analysis.is_actionable(None));
        assert!(analysis.is_actionable(Some(Side::Sell)));
        assert!(!analysis.is_actionable(Some(Side::Buy)));
    }
}
