//! Account and market-clock snapshots.

use chrono::{DateTime, Utc};

/// Account state derived on demand from cash plus marked positions.
///
/// `equity >= 0` is not guaranteed: prices can fall below cost and callers
/// must tolerate negative equity.
#[derive(Debug, Clone)]
pub struct Account {
    pub cash: f64,
    pub equity: f64,

    /// No margin modeling: buying power is just cash.
    pub buying_power: f64,

    pub long_market_value: f64,
    pub initial_cash: f64,
    pub currency: String,
}

/// Market clock snapshot.
#[derive(Debug, Clone)]
pub struct Clock {
    pub is_open: bool,
    pub timestamp: DateTime<Utc>,
}
