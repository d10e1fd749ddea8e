// User-configured price alerts, loaded once at startup
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::error::BotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">=")]
    AtOrAbove,
    #[serde(rename = "<=")]
    AtOrBelow,
    #[serde(rename = ">")]
    Above,
    #[serde(rename = "<")]
    Below,
}

impl Comparison {
    pub fn holds(&self, price: f64, target: f64) -> bool {
        match self {
            Comparison::AtOrAbove => price >= target,
            Comparison::AtOrBelow => price <= target,
            Comparison::Above => price > target,
            Comparison::Below => price < target,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Comparison::AtOrAbove => ">=",
            Comparison::AtOrBelow => "<=",
            Comparison::Above => ">",
            Comparison::Below => "<",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(alias = "Symbol")]
    pub symbol: String,
    #[serde(alias = "Price")]
    pub price: f64,
    #[serde(alias = "Condition")]
    pub condition: Comparison,
    /// Only "price" alerts are evaluated
    #[serde(rename = "type", alias = "Type", default = "default_kind")]
    pub kind: String,
    #[serde(alias = "Notified", default)]
    pub notified: bool,
}

fn default_kind() -> String {
    "price".to_string()
}

impl Alert {
    pub fn is_price_alert(&self) -> bool {
        self.kind == "price"
    }

    /// Fire at most once: true only on the first crossing
    pub fn check(&mut self, price: f64) -> bool {
        if self.notified || !self.is_price_alert() {
            return false;
        }

        if self.condition.holds(price, self.price) {
            self.notified = true;
            return true;
        }

        false
    }
}

/// The alert set, owned by the dispatcher
#[derive(Debug, Clone, Default)]
pub struct AlertBook {
    alerts: Vec<Alert>,
}

impl AlertBook {
    pub fn new(alerts: Vec<Alert>) -> Self {
        Self { alerts }
    }

    /// Load a JSON array of alerts; a missing file means no alerts
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BotError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "No alerts file, continuing without alerts");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, BotError> {
        let alerts: Vec<Alert> = serde_json::from_str(raw)?;
        Ok(Self::new(alerts))
    }

    /// Drop alerts for symbols that are not tracked, returning those symbols
    pub fn retain_tracked(&mut self, tracked: &HashSet<String>) -> Vec<String> {
        let mut dropped = Vec::new();
        self.alerts.retain(|alert| {
            let keep = tracked.contains(&alert.symbol);
            if !keep {
                dropped.push(alert.symbol.clone());
            }
            keep
        });
        dropped
    }

    /// Alerts for `symbol` that fire at `price`; each fires once per lifetime
    pub fn check(&mut self, symbol: &str, price: f64) -> Vec<Alert> {
        self.alerts
            .iter_mut()
            .filter(|alert| alert.symbol == symbol)
            .filter_map(|alert| alert.check(price).then(|| alert.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.alerts.iter().filter(|a| !a.notified).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALERTS: &str = r#"[
        {"symbol": "BTCUSDT", "price": 30000.0, "condition": ">=", "type": "price"},
        {"symbol": "ETHUSDT", "price": 1500.0, "condition": "<", "type": "price"},
        {"Symbol": "DOGEUSDT", "Price": 0.1, "Condition": ">", "Type": "volume", "Notified": false}
    ]"#;

    #[test]
    fn test_parse_alerts() {
        let book = AlertBook::from_json(ALERTS).unwrap();
        assert_eq!(book.len(), 3);
        assert_eq!(book.alerts[0].condition, Comparison::AtOrAbove);
        assert_eq!(book.alerts[1].condition, Comparison::Below);
        assert!(!book.alerts[2].is_price_alert());
    }

    #[test]
    fn test_alert_fires_once() {
        let mut book = AlertBook::from_json(ALERTS).unwrap();

        assert!(book.check("BTCUSDT", 29999.0).is_empty());

        let fired = book.check("BTCUSDT", 30000.0);
        assert_eq!(fired.len(), 1);
        assert!(fired[0].notified);

        // Never re-armed
        assert!(book.check("BTCUSDT", 31000.0).is_empty());
        assert!(book.check("BTCUSDT", 29000.0).is_empty());
        assert!(book.check("BTCUSDT", 30000.0).is_empty());
        assert_eq!(book.pending(), 2);
    }

    #[test]
    fn test_non_price_alerts_ignored() {
        let mut book = AlertBook::from_json(ALERTS).unwrap();
        assert!(book.check("DOGEUSDT", 1.0).is_empty());
    }

    #[test]
    fn test_strict_comparisons() {
        assert!(!Comparison::Below.holds(1500.0, 1500.0));
        assert!(Comparison::AtOrBelow.holds(1500.0, 1500.0));
        assert!(!Comparison::Above.holds(1500.0, 1500.0));
        assert!(Comparison::Above.holds(1500.1, 1500.0));
    }

    #[test]
    fn test_retain_tracked() {
        let mut book = AlertBook::from_json(ALERTS).unwrap();
        let tracked: HashSet<String> = ["BTCUSDT".to_string()].into_iter().collect();

        let dropped = book.retain_tracked(&tracked);
        assert_eq!(book.len(), 1);
        assert_eq!(dropped, vec!["ETHUSDT".to_string(), "DOGEUSDT".to_string()]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let book = AlertBook::load("/nonexistent/alerts.json").unwrap();
        assert!(book.is_empty());
    }
}
