use crate::error::BotError;
use std::collections::HashMap;

/// Fixed-length rolling window of close prices for one symbol
///
/// The last slot always holds the most recent (possibly still forming)
/// candle's close. Length never changes after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleBuffer {
    closes: Vec<f64>,
}

impl CandleBuffer {
    /// Build a buffer from exactly `len` historical closes (oldest first)
    ///
    /// Symbols too new to provide `len` closes cannot be tracked.
    pub fn from_history(symbol: &str, closes: Vec<f64>, len: usize) -> Result<Self, BotError> {
        if len == 0 || closes.len() < len {
            return Err(BotError::InsufficientHistory {
                symbol: symbol.to_string(),
                got: closes.len(),
                need: len,
            });
        }

        // Keep the newest `len` closes if the gateway returned extra
        let start = closes.len() - len;
        let closes = closes[start..].to_vec();

        Ok(Self { closes })
    }

    /// Apply a kline tick
    ///
    /// A final tick commits the window by rotating left one slot (dropping
    /// the oldest close) before writing `price` into the last slot; an
    /// in-progress tick only overwrites the last slot.
    pub fn update(&mut self, price: f64, is_final: bool) {
        if is_final {
            self.closes.rotate_left(1);
        }

        if let Some(last) = self.closes.last_mut() {
            *last = price;
        }

        debug_assert!(!self.closes.is_empty());
    }

    pub fn closes(&self) -> &[f64] {
        &self.closes
    }

    pub fn last(&self) -> f64 {
        self.closes[self.closes.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}

/// Per-symbol collection of candle buffers, owned by the dispatcher
#[derive(Debug, Clone, Default)]
pub struct CandleBook {
    buffers: HashMap<String, CandleBuffer>,
}

impl CandleBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fully backfilled buffer for a symbol
    pub fn insert(&mut self, symbol: String, buffer: CandleBuffer) {
        self.buffers.insert(symbol, buffer);
    }

    /// Apply a tick to the symbol's buffer
    ///
    /// Returns false (and does nothing) when the symbol is not tracked.
    pub fn update(&mut self, symbol: &str, price: f64, is_final: bool) -> bool {
        match self.buffers.get_mut(symbol) {
            Some(buffer) => {
                buffer.update(price, is_final);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&CandleBuffer> {
        self.buffers.get(symbol)
    }

    /// Latest close for every tracked symbol
    pub fn latest_prices(&self) -> HashMap<String, f64> {
        self.buffers
            .iter()
            .map(|(symbol, buffer)| (symbol.clone(), buffer.last()))
            .collect()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.buffers.contains_key(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.buffers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn history(len: usize) -> Vec<f64> {
        (0..len).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn test_from_history_exact_length() {
        let buffer = CandleBuffer::from_history("BTCUSDT", history(5), 5).unwrap();
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.closes(), &[100.0, 101.0, 102.0, 103.0, 104.0]);
    }

    #[test]
    fn test_from_history_keeps_newest() {
        let buffer = CandleBuffer::from_history("BTCUSDT", history(8), 5).unwrap();
        assert_eq!(buffer.closes(), &[103.0, 104.0, 105.0, 106.0, 107.0]);
    }

    #[test]
    fn test_from_history_too_short() {
        let result = CandleBuffer::from_history("NEWUSDT", history(3), 5);
        assert!(matches!(
            result,
            Err(BotError::InsufficientHistory { got: 3, need: 5, .. })
        ));
    }

    #[test]
    fn test_in_progress_update_overwrites_last() {
        let mut buffer = CandleBuffer::from_history("BTCUSDT", history(5), 5).unwrap();

        buffer.update(150.0, false);
        buffer.update(151.0, false);

        assert_eq!(buffer.closes(), &[100.0, 101.0, 102.0, 103.0, 151.0]);
    }

    #[test]
    fn test_final_update_rotates() {
        let mut buffer = CandleBuffer::from_history("BTCUSDT", history(5), 5).unwrap();

        buffer.update(150.0, true);

        assert_eq!(buffer.closes(), &[101.0, 102.0, 103.0, 104.0, 150.0]);
    }

    #[test]
    fn test_random_final_rotations_keep_length() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20;

        for _ in 0..50 {
            let mut buffer = CandleBuffer::from_history("BTCUSDT", history(n), n).unwrap();
            let mut applied = Vec::new();

            for _ in 0..n {
                let price: f64 = rng.gen_range(1.0..1000.0);
                buffer.update(price, true);
                applied.push(price);
            }

            assert_eq!(buffer.len(), n);
            assert_eq!(buffer.last(), applied[n - 1]);
            // After N commits the window holds exactly the applied closes
            assert_eq!(buffer.closes(), applied.as_slice());
        }
    }

    #[test]
    fn test_book_ignores_untracked_symbol() {
        let mut book = CandleBook::new();
        book.insert(
            "BTCUSDT".to_string(),
            CandleBuffer::from_history("BTCUSDT", history(3), 3).unwrap(),
        );

        assert!(book.update("BTCUSDT", 200.0, false));
        assert!(!book.update("ETHUSDT", 200.0, false));
        assert_eq!(book.get("BTCUSDT").unwrap().last(), 200.0);
        assert_eq!(book.latest_prices().get("BTCUSDT"), Some(&200.0));
    }
}
