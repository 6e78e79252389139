//! Agents map strategy signals onto broker orders.

use tracing::debug;

use crate::broker::{Broker, BrokerError};
use crate::models::{Bar, Order, OrderRequest, OrderSide};
use crate::strategy::{Signal, Strategy};

/// How much of the account a buy signal commits.
#[derive(Debug, Clone, Copy)]
pub enum SizingPolicy {
    /// Spend all available cash, keeping back a small fractional reserve
    /// so fees can never tip the order into an insufficient-cash reject.
    AllIn { reserve: f64 },

    /// Spend a fixed fraction of available cash per entry.
    FixedFraction { fraction: f64 },
}

impl Default for SizingPolicy {
    fn default() -> Self {
        SizingPolicy::AllIn { reserve: 0.001 }
    }
}

impl SizingPolicy {
    pub fn buy_qty(&self, cash: f64, price: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        match self {
            SizingPolicy::AllIn { reserve } => cash * (1.0 - reserve) / price,
            SizingPolicy::FixedFraction { fraction } => cash * fraction / price,
        }
    }
}

/// Per-tick decision maker. One agent instance owns one symbol's trading
/// state for the lifetime of a run.
#[allow(async_fn_in_trait)]
pub trait Agent {
    /// React to the latest window of bars for `symbol`. Returns the order
    /// placed on this tick, if any.
    async fn handle_tick(
        &mut self,
        symbol: &str,
        bars: &[Bar],
        broker: &mut impl Broker,
    ) -> Result<Option<Order>, BrokerError>;
}

/// Long-only agent driven by a strategy signal: enter on `Buy` when flat,
/// liquidate on `Sell` when long, otherwise do nothing.
pub struct SignalAgent<S: Strategy> {
    strategy: S,
    sizing: SizingPolicy,
}

impl<S: Strategy> SignalAgent<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            sizing: SizingPolicy::default(),
        }
    }

    pub fn with_sizing(strategy: S, sizing: SizingPolicy) -> Self {
        Self { strategy, sizing }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }
}

impl<S: Strategy> Agent for SignalAgent<S> {
    async fn handle_tick(
        &mut self,
        symbol: &str,
        bars: &[Bar],
        broker: &mut impl Broker,
    ) -> Result<Option<Order>, BrokerError> {
        let Some(last) = bars.last() else {
            return Ok(None);
        };
        let price = last.close;

        let signal = self.strategy.generate_signal(bars);
        let position = broker.get_open_position(symbol).await?;

        match signal {
            Signal::Buy if position.qty <= 0.0 => {
                let account = broker.get_account().await?;
                let qty = self.sizing.buy_qty(account.cash, price);
                if qty <= 0.0 {
                    return Ok(None);
                }

                debug!(symbol = %symbol, qty, price, "Entering long");
                let request = OrderRequest::market(symbol, qty, OrderSide::Buy)
                    .with_reference_price(price);
                Ok(Some(broker.submit_order(request).await?))
            }
            Signal::Sell if position.qty > 0.0 => {
                debug!(symbol = %symbol, qty = position.qty, price, "Liquidating");
                let request = OrderRequest::market(symbol, position.qty, OrderSide::Sell)
                    .with_reference_price(price);
                Ok(Some(broker.submit_order(request).await?))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SimBroker;
    use crate::strategy::ConsecutiveChangeStrategy;
    use chrono::{TimeZone, Utc};

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                Bar::new(
                    "BTC/USD",
                    Utc.with_ymd_and_hms(2024, 1, 1 + i as u32, 0, 0, 0).unwrap(),
                    close,
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_buy_signal_enters_all_in() {
        let mut broker = SimBroker::new(100_000.0);
        let mut agent = SignalAgent::new(ConsecutiveChangeStrategy);

        let window = bars(&[100.0, 101.0, 102.0]);
        let order = agent
            .handle_tick("BTC/USD", &window, &mut broker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(order.side, OrderSide::Buy);
        // All-in with the 0.1% reserve, at the bar close.
        assert!((order.qty - 100_000.0 * 0.999 / 102.0).abs() < 1e-9);
        assert_eq!(order.filled_avg_price, Some(102.0));
    }

    #[tokio::test]
    async fn test_no_pyramiding_when_long() {
        let mut broker = SimBroker::new(100_000.0);
        let mut agent = SignalAgent::new(ConsecutiveChangeStrategy);

        let window = bars(&[100.0, 101.0, 102.0]);
        agent
            .handle_tick("BTC/USD", &window, &mut broker)
            .await
            .unwrap();

        // A second buy signal while long places nothing.
        let window = bars(&[101.0, 102.0, 103.0]);
        let order = agent
            .handle_tick("BTC/USD", &window, &mut broker)
            .await
            .unwrap();
        assert!(order.is_none());
    }

    #[tokio::test]
    async fn test_sell_signal_liquidates_fully() {
        let mut broker = SimBroker::new(100_000.0);
        let mut agent = SignalAgent::new(ConsecutiveChangeStrategy);

        agent
            .handle_tick("BTC/USD", &bars(&[100.0, 101.0, 102.0]), &mut broker)
            .await
            .unwrap();

        let order = agent
            .handle_tick("BTC/USD", &bars(&[102.0, 101.0, 100.0]), &mut broker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(order.side, OrderSide::Sell);
        assert!(broker.get_open_position("BTC/USD").await.unwrap().is_flat());
    }

    #[tokio::test]
    async fn test_sell_signal_when_flat_does_nothing() {
        let mut broker = SimBroker::new(100_000.0);
        let mut agent = SignalAgent::new(ConsecutiveChangeStrategy);

        let order = agent
            .handle_tick("BTC/USD", &bars(&[102.0, 101.0, 100.0]), &mut broker)
            .await
            .unwrap();
        assert!(order.is_none());
    }

    #[test]
    fn test_fixed_fraction_sizing() {
        let sizing = SizingPolicy::FixedFraction { fraction: 0.25 };
        assert!((sizing.buy_qty(10_000.0, 100.0) - 25.0).abs() < 1e-12);
        assert_eq!(sizing.buy_qty(10_000.0, 0.0), 0.0);
    }
}
