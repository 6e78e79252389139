//! Momentum strategy on consecutive close-to-close moves.

use crate::models::Bar;

use super::{Signal, Strategy};

/// Buys after two consecutive rises, sells after two consecutive falls,
/// holds otherwise. A flat close in either pair breaks the streak.
#[derive(Debug, Clone, Default)]
pub struct ConsecutiveChangeStrategy;

impl Strategy for ConsecutiveChangeStrategy {
    fn name(&self) -> &'static str {
        "consecutive_change"
    }

    fn window(&self) -> usize {
        2
    }

    fn generate_signal(&self, bars: &[Bar]) -> Signal {
        if bars.len() < 3 {
            return Signal::Hold;
        }

        let closes: Vec<f64> = bars[bars.len() - 3..].iter().map(|b| b.close).collect();
        let change1 = closes[1] - closes[0];
        let change2 = closes[2] - closes[1];

        if change1 > 0.0 && change2 > 0.0 {
            Signal::Buy
        } else if change1 < 0.0 && change2 < 0.0 {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}
