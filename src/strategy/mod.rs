//! Trading signals and the strategies that produce them.

mod consecutive;

pub use consecutive::ConsecutiveChangeStrategy;

use crate::models::Bar;

/// What a strategy wants done, given the bars it just saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// A pure signal generator over a window of bars.
///
/// Strategies never touch the broker; they only read bars. Insufficient
/// history is a `Hold`, not an error.
pub trait Strategy {
    fn name(&self) -> &'static str;

    /// Lookback in bar-to-bar changes. The evaluation loops hand the
    /// strategy `window() + 1` bars per tick.
    fn window(&self) -> usize;

    fn generate_signal(&self, bars: &[Bar]) -> Signal;
}
