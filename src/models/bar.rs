//! OHLCV bar model shared by the repository, the live stream, and the engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV candle for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,

    /// Bar open time.
    pub ts: DateTime<Utc>,

    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(symbol: impl Into<String>, ts: DateTime<Utc>, close: f64) -> Self {
        Self {
            symbol: symbol.into(),
            ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }
}
