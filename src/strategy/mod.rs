// Signal derivation: cross, trend, oscillator and side classification
pub mod signals;

pub use signals::{
    analyze, Analysis, Cross, OscillatorSignal, OscillatorThresholds, SignalConfig, SignalSide,
    Trend,
};
