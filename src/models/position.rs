//! Position model and the derived snapshot returned by broker queries.

use serde::{Deserialize, Serialize};

/// Asset class of a tradable symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    UsEquity,
    Crypto,
}

/// Quote-currency suffixes that mark a symbol as a crypto pair.
const CRYPTO_SUFFIXES: [&str; 4] = ["/USD", "/BTC", "/ETH", "/USDT"];

impl AssetClass {
    /// Classify a symbol from its spelling: a `/` pair separator or a known
    /// quote-currency suffix means crypto, anything else is a US equity.
    /// The fee schedule depends on this heuristic staying put.
    pub fn from_symbol(symbol: &str) -> Self {
        let upper = symbol.to_uppercase();
        if symbol.contains('/') || CRYPTO_SUFFIXES.iter().any(|s| upper.contains(s)) {
            AssetClass::Crypto
        } else {
            AssetClass::UsEquity
        }
    }

    pub fn is_crypto(&self) -> bool {
        matches!(self, AssetClass::Crypto)
    }

    /// Short key used in table names and CLI arguments.
    pub fn key(&self) -> &'static str {
        match self {
            AssetClass::UsEquity => "stock",
            AssetClass::Crypto => "crypto",
        }
    }
}

impl std::str::FromStr for AssetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crypto" => Ok(AssetClass::Crypto),
            "stock" | "equity" | "us_equity" => Ok(AssetClass::UsEquity),
            other => Err(format!("unknown asset class: {other}")),
        }
    }
}

/// An open long position as held by the ledger.
///
/// Invariant: `qty >= 0`. A position whose quantity collapses below the dust
/// epsilon after a sell is removed from the ledger rather than kept around.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
    pub avg_entry_price: f64,
    pub asset_class: AssetClass,
}

impl Position {
    pub fn cost_basis(&self) -> f64 {
        self.qty * self.avg_entry_price
    }

    pub fn market_value(&self, mark_price: f64) -> f64 {
        self.qty * mark_price
    }
}

/// Position snapshot with mark-to-market fields, as returned by
/// `get_open_position` / `get_all_positions` on either backend.
#[derive(Debug, Clone)]
pub struct PositionView {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub qty: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub cost_basis: f64,
    pub unrealized_pl: f64,
    pub unrealized_plpc: f64,
}

impl PositionView {
    /// Build a snapshot from a held position and a mark price.
    pub fn from_position(pos: &Position, mark_price: f64) -> Self {
        let market_value = pos.market_value(mark_price);
        let cost_basis = pos.cost_basis();
        let unrealized_pl = market_value - cost_basis;
        let unrealized_plpc = if cost_basis != 0.0 {
            unrealized_pl / cost_basis
        } else {
            0.0
        };

        Self {
            symbol: pos.symbol.clone(),
            asset_class: pos.asset_class,
            qty: pos.qty,
            avg_entry_price: pos.avg_entry_price,
            current_price: mark_price,
            market_value,
            cost_basis,
            unrealized_pl,
            unrealized_plpc,
        }
    }

    /// Canonical flat record for a symbol with no open position. Mirrors the
    /// live backend, which turns a 404 into a neutral snapshot instead of an
    /// error.
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            asset_class: AssetClass::from_symbol(symbol),
            qty: 0.0,
            avg_entry_price: 0.0,
            current_price: 0.0,
            market_value: 0.0,
            cost_basis: 0.0,
            unrealized_pl: 0.0,
            unrealized_plpc: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.qty <= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_class_heuristic() {
        assert_eq!(AssetClass::from_symbol("BTC/USD"), AssetClass::Crypto);
        assert_eq!(AssetClass::from_symbol("eth/usdt"), AssetClass::Crypto);
        assert_eq!(AssetClass::from_symbol("SOL/BTC"), AssetClass::Crypto);
        assert_eq!(AssetClass::from_symbol("AAPL"), AssetClass::UsEquity);
        assert_eq!(AssetClass::from_symbol("MSFT"), AssetClass::UsEquity);
    }

    #[test]
    fn test_snapshot_pnl() {
        let pos = Position {
            symbol: "AAPL".to_string(),
            qty: 100.0,
            avg_entry_price: 150.0,
            asset_class: AssetClass::UsEquity,
        };

        let view = PositionView::from_position(&pos, 160.0);
        assert_eq!(view.market_value, 16_000.0);
        assert_eq!(view.cost_basis, 15_000.0);
        assert_eq!(view.unrealized_pl, 1_000.0);
        assert!((view.unrealized_plpc - 1_000.0 / 15_000.0).abs() < 1e-12);
    }

    #[test]
    fn test_flat_snapshot() {
        let view = PositionView::flat("BTC/USD");
        assert!(view.is_flat());
        assert_eq!(view.qty, 0.0);
        assert_eq!(view.unrealized_plpc, 0.0);
        assert_eq!(view.asset_class, AssetClass::Crypto);
    }
}
