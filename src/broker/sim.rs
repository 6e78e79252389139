//! Local simulated broker.
//!
//! Fills every accepted market or limit order instantly and in full at a
//! deterministic price, charging the same fees the live venue would. Used
//! for backtests and paper sessions; no network, no latency, no slippage.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::models::{
    Account, Clock, Order, OrderRequest, OrderSide, OrderStatus, PositionView, StatusFilter,
};

use super::{Broker, BrokerError, FeeSchedule, Ledger, LedgerEntry, OrderExecutor};

/// Last-known reference price per symbol.
#[derive(Debug, Clone, Default)]
pub struct PriceTape {
    prices: HashMap<String, f64>,
}

impl PriceTape {
    pub fn set(&mut self, symbol: &str, price: f64) {
        self.prices.insert(symbol.to_string(), price);
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }
}

/// In-memory broker simulator.
pub struct SimBroker {
    ledger: Ledger,
    executor: OrderExecutor,
    tape: PriceTape,
    orders: Vec<Order>,
}

impl SimBroker {
    pub fn new(initial_cash: f64) -> Self {
        Self::with_fees(initial_cash, FeeSchedule::default())
    }

    pub fn with_fees(initial_cash: f64, fees: FeeSchedule) -> Self {
        Self {
            ledger: Ledger::new(initial_cash),
            executor: OrderExecutor::new(fees),
            tape: PriceTape::default(),
            orders: Vec::new(),
        }
    }

    /// Mark price for a symbol: tape if quoted, otherwise the position's
    /// own entry price so equity never collapses to zero for lack of a tick.
    fn mark_price(&self, symbol: &str, fallback: f64) -> f64 {
        self.tape.get(symbol).unwrap_or(fallback)
    }

    pub fn trade_history(&self) -> &[LedgerEntry] {
        self.ledger.history()
    }
}

impl Broker for SimBroker {
    fn update_price(&mut self, symbol: &str, price: f64) {
        self.tape.set(symbol, price);
    }

    async fn get_account(&self) -> Result<Account, BrokerError> {
        let long_market_value: f64 = self
            .ledger
            .positions()
            .map(|p| p.market_value(self.mark_price(&p.symbol, p.avg_entry_price)))
            .sum();

        Ok(Account {
            cash: self.ledger.cash,
            equity: self.ledger.cash + long_market_value,
            buying_power: self.ledger.cash,
            long_market_value,
            initial_cash: self.ledger.initial_cash,
            currency: "USD".to_string(),
        })
    }

    async fn get_clock(&self) -> Result<Clock, BrokerError> {
        // The simulated market never closes.
        Ok(Clock {
            is_open: true,
            timestamp: Utc::now(),
        })
    }

    async fn get_all_positions(&self) -> Result<Vec<PositionView>, BrokerError> {
        Ok(self
            .ledger
            .positions()
            .map(|p| PositionView::from_position(p, self.mark_price(&p.symbol, p.avg_entry_price)))
            .collect())
    }

    async fn get_open_position(&self, symbol: &str) -> Result<PositionView, BrokerError> {
        Ok(match self.ledger.position(symbol) {
            Some(p) => PositionView::from_position(p, self.mark_price(symbol, p.avg_entry_price)),
            None => PositionView::flat(symbol),
        })
    }

    async fn close_all_positions(
        &mut self,
        cancel_orders: bool,
    ) -> Result<Vec<Order>, BrokerError> {
        if cancel_orders {
            self.cancel_orders().await?;
        }

        let mut closed = Vec::new();
        for symbol in self.ledger.symbols() {
            match self.close_position(&symbol).await {
                Ok(Some(order)) => closed.push(order),
                Ok(None) => {}
                Err(e) => warn!(symbol = %symbol, error = %e, "Failed to close position"),
            }
        }
        Ok(closed)
    }

    async fn close_position(&mut self, symbol: &str) -> Result<Option<Order>, BrokerError> {
        let qty = match self.ledger.position(symbol) {
            Some(p) if p.qty > 0.0 => p.qty,
            _ => return Ok(None),
        };

        let order = self
            .submit_order(OrderRequest::market(symbol, qty, OrderSide::Sell))
            .await?;
        Ok(Some(order))
    }

    async fn submit_order(&mut self, request: OrderRequest) -> Result<Order, BrokerError> {
        let tape_price = self.tape.get(&request.symbol);
        let order = self
            .executor
            .execute(&mut self.ledger, &request, tape_price, Utc::now())?;

        info!(
            symbol = %order.symbol,
            side = order.side.as_str(),
            qty = order.filled_qty,
            price = order.filled_avg_price.unwrap_or(0.0),
            fee = order.fee_cash,
            "Order filled"
        );

        self.orders.push(order.clone());
        Ok(order)
    }

    async fn get_orders(
        &self,
        status: StatusFilter,
        limit: usize,
    ) -> Result<Vec<Order>, BrokerError> {
        Ok(self
            .orders
            .iter()
            .rev()
            .filter(|o| status.matches(o.status))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_order_by_id(&self, order_id: &str) -> Result<Order, BrokerError> {
        self.orders
            .iter()
            .find(|o| o.id == order_id)
            .cloned()
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.to_string()))
    }

    async fn cancel_orders(&mut self) -> Result<usize, BrokerError> {
        let mut cancelled = 0;
        for order in &mut self.orders {
            if order.status.is_open() {
                order.status = OrderStatus::Canceled;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn cancel_order_by_id(&mut self, order_id: &str) -> Result<(), BrokerError> {
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.to_string()))?;

        if !order.status.is_open() {
            return Err(BrokerError::InvalidCancelState {
                id: order.id.clone(),
                status: order.status.as_str().to_string(),
            });
        }

        order.status = OrderStatus::Canceled;
        Ok(())
    }
}
