//! Evaluation loops: historical replay and live streaming.
//!
//! Both loops drive the same agent/broker interfaces with the same window
//! slicing, so a strategy behaves identically whether the bars come from
//! the candle store or a live feed.

mod backtest;
mod live;

pub use backtest::{run_matrix, BacktestEngine, CellOutcome, MatrixReport, TickRecord};
pub use live::LiveEngine;
