//! Streaming evaluation loop over a live bar feed.

use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::agent::Agent;
use crate::broker::Broker;
use crate::data::BarStream;
use crate::models::Bar;

/// Drives an agent from a live bar stream: buffer each symbol's bars, and
/// on every new bar evaluate the same trailing window a backtest would see.
///
/// Runs until the feed closes or Ctrl-C arrives, then liquidation is left
/// to the operator; shutdown only stops the stream and logs final state.
pub struct LiveEngine<B: Broker, A: Agent, S: BarStream> {
    broker: B,
    agent: A,
    stream: S,
    symbols: Vec<String>,
    window_size: usize,
    buffers: HashMap<String, VecDeque<Bar>>,
    last_portfolio_log: HashMap<String, DateTime<Utc>>,
    is_running: bool,
}

impl<B: Broker, A: Agent, S: BarStream> LiveEngine<B, A, S> {
    pub fn new(broker: B, agent: A, stream: S, symbols: Vec<String>, window_size: usize) -> Self {
        let buffers = symbols
            .iter()
            .map(|s| (s.clone(), VecDeque::new()))
            .collect();

        Self {
            broker,
            agent,
            stream,
            symbols,
            window_size,
            buffers,
            last_portfolio_log: HashMap::new(),
            is_running: false,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    #[cfg(test)]
    fn buffer_len(&self, symbol: &str) -> usize {
        self.buffers.get(symbol).map(VecDeque::len).unwrap_or(0)
    }

    /// Run until the stream ends or Ctrl-C.
    pub async fn run(&mut self) -> Result<()> {
        info!(symbols = ?self.symbols, window = self.window_size, "Starting live engine");

        let mut rx = self.stream.start().await?;
        self.is_running = true;

        match self.broker.get_account().await {
            Ok(account) => {
                info!(
                    equity = account.equity,
                    buying_power = account.buying_power,
                    cash = account.cash,
                    "Account ready"
                );
            }
            Err(e) => warn!(error = %e, "Could not fetch account info"),
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
                bar = rx.recv() => {
                    match bar {
                        Some(bar) => self.on_bar(bar).await,
                        None => {
                            info!("Bar stream closed");
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn on_bar(&mut self, bar: Bar) {
        let symbol = bar.symbol.clone();
        let Some(buffer) = self.buffers.get_mut(&symbol) else {
            debug!(symbol = %symbol, "Ignoring bar for unsubscribed symbol");
            return;
        };

        info!(symbol = %symbol, close = bar.close, ts = %bar.ts, "Bar received");

        buffer.push_back(bar);

        // Keep 3x the window so a strategy never starves after trimming.
        let max_bars = self.window_size * 3;
        while buffer.len() > max_bars {
            buffer.pop_front();
        }

        if buffer.len() >= self.window_size {
            self.evaluate_symbol(&symbol).await;
        } else {
            debug!(
                symbol = %symbol,
                have = buffer.len(),
                need = self.window_size + 1,
                "Waiting for more bars"
            );
        }
    }

    async fn evaluate_symbol(&mut self, symbol: &str) {
        let Some(buffer) = self.buffers.get(symbol) else {
            return;
        };

        // Same slice a backtest tick sees: the trailing window plus the
        // bar that just closed.
        let needed = self.window_size + 1;
        if buffer.len() < needed {
            warn!(symbol = %symbol, have = buffer.len(), need = needed, "Not enough bars yet");
            return;
        }

        let window: Vec<Bar> = buffer.iter().skip(buffer.len() - needed).cloned().collect();
        let current_price = window[window.len() - 1].close;

        self.broker.update_price(symbol, current_price);

        if let Err(e) = self.agent.handle_tick(symbol, &window, &mut self.broker).await {
            error!(symbol = %symbol, error = %e, "Tick evaluation failed");
            return;
        }

        self.log_portfolio(symbol, current_price).await;
    }

    /// At most one portfolio snapshot per symbol per minute.
    async fn log_portfolio(&mut self, symbol: &str, current_price: f64) {
        let now = Utc::now();
        let due = self
            .last_portfolio_log
            .get(symbol)
            .map(|last| now - *last > Duration::seconds(60))
            .unwrap_or(true);
        if !due {
            return;
        }

        match (
            self.broker.get_account().await,
            self.broker.get_all_positions().await,
        ) {
            (Ok(account), Ok(positions)) => {
                info!(
                    symbol = %symbol,
                    price = current_price,
                    equity = account.equity,
                    positions = positions.len(),
                    "Portfolio"
                );
                for pos in &positions {
                    info!(
                        symbol = %pos.symbol,
                        qty = pos.qty,
                        price = pos.current_price,
                        unrealized_pl = pos.unrealized_pl,
                        "Position"
                    );
                }
                self.last_portfolio_log.insert(symbol.to_string(), now);
            }
            (Err(e), _) | (_, Err(e)) => warn!(error = %e, "Could not fetch account info"),
        }
    }

    async fn shutdown(&mut self) {
        if !self.is_running {
            return;
        }
        self.is_running = false;

        info!("Shutting down live engine");
        self.stream.stop().await;

        match (
            self.broker.get_account().await,
            self.broker.get_all_positions().await,
        ) {
            (Ok(account), Ok(positions)) => {
                info!(
                    equity = account.equity,
                    cash = account.cash,
                    buying_power = account.buying_power,
                    open_positions = positions.len(),
                    "Final account state"
                );
                for pos in &positions {
                    info!(
                        symbol = %pos.symbol,
                        qty = pos.qty,
                        price = pos.current_price,
                        unrealized_pl = pos.unrealized_pl,
                        "Open position"
                    );
                }
            }
            (Err(e), _) | (_, Err(e)) => error!(error = %e, "Error getting final state"),
        }

        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SignalAgent;
    use crate::broker::{Broker, SimBroker};
    use crate::data::ChannelFeed;
    use crate::strategy::ConsecutiveChangeStrategy;
    use chrono::TimeZone;

    fn bar(symbol: &str, minute: u32, close: f64) -> Bar {
        Bar::new(
            symbol,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
            close,
        )
    }

    fn live_engine(
        feed: ChannelFeed,
        window_size: usize,
    ) -> LiveEngine<SimBroker, SignalAgent<ConsecutiveChangeStrategy>, ChannelFeed> {
        LiveEngine::new(
            SimBroker::new(10_000.0),
            SignalAgent::new(ConsecutiveChangeStrategy),
            feed,
            vec!["BTC/USD".to_string()],
            window_size,
        )
    }

    #[tokio::test]
    async fn test_trades_from_stream_until_it_closes() {
        let (feed, tx) = ChannelFeed::new(16);
        let mut engine = live_engine(feed, 2);

        for (i, close) in [100.0, 101.0, 102.0].into_iter().enumerate() {
            tx.send(bar("BTC/USD", i as u32, close)).await.unwrap();
        }
        drop(tx);

        engine.run().await.unwrap();

        // Two rises on the third bar: the agent went long.
        let pos = engine
            .broker()
            .get_open_position("BTC/USD")
            .await
            .unwrap();
        assert!(pos.qty > 0.0);
        assert_eq!(pos.avg_entry_price, 102.0);
    }

    #[tokio::test]
    async fn test_buffer_trims_to_three_windows() {
        let (feed, tx) = ChannelFeed::new(64);
        let mut engine = live_engine(feed, 2);

        for i in 0..20 {
            // Alternate closes so no trade fires.
            let close = if i % 2 == 0 { 100.0 } else { 101.0 };
            tx.send(bar("BTC/USD", i, close)).await.unwrap();
        }
        drop(tx);

        engine.run().await.unwrap();
        assert_eq!(engine.buffer_len("BTC/USD"), 6);
    }

    #[tokio::test]
    async fn test_unsubscribed_symbol_ignored() {
        let (feed, tx) = ChannelFeed::new(16);
        let mut engine = live_engine(feed, 2);

        for i in 0..5 {
            tx.send(bar("DOGE/USD", i, 0.1 + f64::from(i))).await.unwrap();
        }
        drop(tx);

        engine.run().await.unwrap();
        assert!(engine
            .broker()
            .get_all_positions()
            .await
            .unwrap()
            .is_empty());
    }
}
