//! Turns order requests into immediate fills against a ledger.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AssetClass, Order, OrderRequest, OrderSide, OrderStatus, OrderType,
};

use super::{BrokerError, FeeSchedule, Ledger, LedgerEntry};

/// Stateless fill engine. Every accepted order fills in full at a single
/// price; partial fills and resting limit orders are not modeled.
#[derive(Debug, Clone, Default)]
pub struct OrderExecutor {
    fees: FeeSchedule,
}

impl OrderExecutor {
    pub fn new(fees: FeeSchedule) -> Self {
        Self { fees }
    }

    /// Resolve the fill price for a request: explicit limit price first,
    /// then the caller's reference price, then the broker tape.
    fn fill_price(
        &self,
        request: &OrderRequest,
        tape_price: Option<f64>,
    ) -> Result<f64, BrokerError> {
        let price = match request.order_type {
            OrderType::Limit => request.limit_price,
            OrderType::Market => None,
        };

        price
            .or(request.reference_price)
            .or(tape_price)
            .ok_or_else(|| BrokerError::NoPriceData {
                symbol: request.symbol.clone(),
            })
    }

    /// Execute a request against the ledger, returning the filled order.
    /// On any error the ledger is unchanged and nothing is recorded.
    pub fn execute(
        &self,
        ledger: &mut Ledger,
        request: &OrderRequest,
        tape_price: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<Order, BrokerError> {
        let price = self.fill_price(request, tape_price)?;
        let asset_class = AssetClass::from_symbol(&request.symbol);

        let (filled_qty, fee_cash) = match request.side {
            OrderSide::Buy => {
                let cost = request.qty * price;
                // Crypto taker fees come out of the filled quantity, not
                // cash; the full notional is still debited.
                let filled_qty = if asset_class.is_crypto() {
                    request.qty * (1.0 - self.fees.crypto_taker_rate)
                } else {
                    request.qty
                };
                ledger.apply_buy(&request.symbol, asset_class, filled_qty, price, cost)?;
                (filled_qty, 0.0)
            }
            OrderSide::Sell => {
                let fee = self
                    .fees
                    .cash_fee(asset_class, OrderSide::Sell, request.qty, price);
                ledger.apply_sell(&request.symbol, request.qty, price, fee)?;
                (request.qty, fee)
            }
        };

        let order = Order {
            id: Uuid::new_v4().to_string(),
            client_order_id: Uuid::new_v4().to_string(),
            symbol: request.symbol.clone(),
            asset_class,
            side: request.side,
            order_type: request.order_type,
            time_in_force: request.time_in_force,
            qty: request.qty,
            filled_qty,
            limit_price: request.limit_price,
            filled_avg_price: Some(price),
            status: OrderStatus::Filled,
            fee_cash,
            created_at: now,
            filled_at: Some(now),
        };

        ledger.record(LedgerEntry {
            ts: now,
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: filled_qty,
            fill_price: price,
            fee_cash,
            cash_after: ledger.cash,
        });

        Ok(order)
    }
}
