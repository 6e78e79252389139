//! Order-execution backends behind a uniform broker contract.
//!
//! Two interchangeable implementations:
//! - [`SimBroker`]: local simulator with full fee and cost-basis accounting
//! - [`AlpacaBroker`]: thin REST proxy to the Alpaca trading API
//!
//! Agent and engine code only sees the [`Broker`] trait, so strategies run
//! unchanged in backtests and live sessions.

mod alpaca;
mod executor;
mod fees;
mod ledger;
mod sim;

pub use alpaca::AlpacaBroker;
pub use executor::OrderExecutor;
pub use fees::FeeSchedule;
pub use ledger::{Ledger, LedgerEntry, DUST_EPSILON};
pub use sim::{PriceTape, SimBroker};

use crate::models::{Account, Clock, Order, OrderRequest, PositionView, StatusFilter};

/// Failures surfaced by order submission and order management.
///
/// All of these are synchronous, terminal for the attempt in question, and
/// never retried by the execution path.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("cannot fill market order for {symbol}: no price data")]
    NoPriceData { symbol: String },

    #[error("insufficient cash: need {required}, have {available}")]
    InsufficientCash { required: f64, available: f64 },

    #[error("insufficient position in {symbol}: held {held}, sell {requested}")]
    InsufficientPosition {
        symbol: String,
        held: f64,
        requested: f64,
    },

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("cannot cancel order {id} with status {status}")]
    InvalidCancelState { id: String, status: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("malformed api response: {0}")]
    Parse(String),
}

/// Uniform broker contract shared by the simulator and the live backend.
#[allow(async_fn_in_trait)]
pub trait Broker {
    /// Push a new reference price onto the broker's tape. Only the simulator
    /// consumes this; the live venue marks to market on its own.
    fn update_price(&mut self, _symbol: &str, _price: f64) {}

    async fn get_account(&self) -> Result<Account, BrokerError>;

    async fn get_clock(&self) -> Result<Clock, BrokerError>;

    async fn get_all_positions(&self) -> Result<Vec<PositionView>, BrokerError>;

    /// Position snapshot for one symbol. Returns a canonical flat record
    /// (qty 0) instead of failing when no position exists.
    async fn get_open_position(&self, symbol: &str) -> Result<PositionView, BrokerError>;

    async fn close_all_positions(&mut self, cancel_orders: bool)
        -> Result<Vec<Order>, BrokerError>;

    /// Liquidate one symbol with a full-quantity market sell. `None` when
    /// there is nothing to close.
    async fn close_position(&mut self, symbol: &str) -> Result<Option<Order>, BrokerError>;

    async fn submit_order(&mut self, request: OrderRequest) -> Result<Order, BrokerError>;

    /// Most recent `limit` orders in the given status bucket, newest first.
    async fn get_orders(
        &self,
        status: StatusFilter,
        limit: usize,
    ) -> Result<Vec<Order>, BrokerError>;

    async fn get_order_by_id(&self, order_id: &str) -> Result<Order, BrokerError>;

    /// Cancel every still-open order; returns how many were cancelled.
    async fn cancel_orders(&mut self) -> Result<usize, BrokerError>;

    async fn cancel_order_by_id(&mut self, order_id: &str) -> Result<(), BrokerError>;
}
