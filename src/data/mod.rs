//! Market data: the candle store and live bar feeds.

mod repository;
mod stream;

pub use repository::BarRepository;
pub use stream::{AlpacaBarPoller, BarStream, ChannelFeed};

use chrono::Duration;

/// Candle timeframes the store keeps, one table per asset class and
/// timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Day1,
    Hour1,
    Min5,
    Min1,
}

impl Timeframe {
    /// Short key used in table names and CLI arguments.
    pub fn key(&self) -> &'static str {
        match self {
            Timeframe::Day1 => "1D",
            Timeframe::Hour1 => "1H",
            Timeframe::Min5 => "5M",
            Timeframe::Min1 => "1M",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::Day1 => Duration::days(1),
            Timeframe::Hour1 => Duration::hours(1),
            Timeframe::Min5 => Duration::minutes(5),
            Timeframe::Min1 => Duration::minutes(1),
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "1D" => Ok(Timeframe::Day1),
            "1H" => Ok(Timeframe::Hour1),
            "5M" => Ok(Timeframe::Min5),
            "1M" => Ok(Timeframe::Min1),
            other => Err(format!("unknown timeframe: {other} (expected 1D/1H/5M/1M)")),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
