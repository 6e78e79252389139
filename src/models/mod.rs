//! Domain models for bars, orders, positions, and account state.

mod account;
mod bar;
mod order;
mod position;

pub use account::{Account, Clock};
pub use bar::Bar;
pub use order::{
    Order, OrderRequest, OrderSide, OrderStatus, OrderType, StatusFilter, TimeInForce,
};
pub use position::{AssetClass, Position, PositionView};
