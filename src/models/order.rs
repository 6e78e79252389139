//! Order models: sides, types, lifecycle status, requests, and fill records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AssetClass;

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Execution style of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }
}

/// How long an order stays working at the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
        }
    }
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Accepted,
    PendingNew,
    Filled,
    Canceled,
    Expired,
}

impl OrderStatus {
    /// Whether the order is still working and therefore cancellable.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::Accepted | OrderStatus::PendingNew
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Accepted => "accepted",
            OrderStatus::PendingNew => "pending_new",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Expired => "expired",
        }
    }
}

/// Coarse status bucket used when listing orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Open,
    Closed,
    All,
}

impl StatusFilter {
    pub fn matches(&self, status: OrderStatus) -> bool {
        match self {
            StatusFilter::Open => status.is_open(),
            StatusFilter::Closed => !status.is_open(),
            StatusFilter::All => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::Open => "open",
            StatusFilter::Closed => "closed",
            StatusFilter::All => "all",
        }
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(StatusFilter::Open),
            "closed" => Ok(StatusFilter::Closed),
            "all" => Ok(StatusFilter::All),
            other => Err(format!("unknown order status filter: {other}")),
        }
    }
}

/// Parameters for a new order submission.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub qty: f64,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,

    /// Required for limit orders.
    pub limit_price: Option<f64>,

    /// Optional execution price hint for the simulator; the live backend
    /// ignores it and fills at the venue.
    pub reference_price: Option<f64>,
}

impl OrderRequest {
    /// A GTC market order.
    pub fn market(symbol: impl Into<String>, qty: f64, side: OrderSide) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            limit_price: None,
            reference_price: None,
        }
    }

    /// A GTC limit order.
    pub fn limit(symbol: impl Into<String>, qty: f64, side: OrderSide, limit_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            limit_price: Some(limit_price),
            reference_price: None,
        }
    }

    pub fn with_reference_price(mut self, price: f64) -> Self {
        self.reference_price = Some(price);
        self
    }
}

/// A submitted order. In the simulator every order is created and terminally
/// filled within a single `submit_order` call; only cancel calls touch the
/// status afterwards.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,

    /// Quantity the caller asked for.
    pub qty: f64,

    /// Quantity actually credited/debited. Differs from `qty` only for
    /// crypto buys, where the taker fee is paid in kind.
    pub filled_qty: f64,

    pub limit_price: Option<f64>,
    pub filled_avg_price: Option<f64>,
    pub status: OrderStatus,

    /// Fee deducted from cash, in dollars. Zero for crypto buys (in-kind)
    /// and equity buys (commission-free).
    pub fee_cash: f64,

    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}
