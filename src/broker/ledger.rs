//! Cash and position accounting for the simulator.
//!
//! The ledger is the single source of truth for simulated state: cash,
//! open positions, and an append-only trade history. All mutations are
//! validate-before-mutate, so a rejected trade leaves the ledger untouched.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{AssetClass, OrderSide, Position};

use super::BrokerError;

/// Positions whose quantity falls below this after a sell are removed
/// outright instead of lingering as float residue.
pub const DUST_EPSILON: f64 = 1e-9;

/// One executed trade, recorded at fill time.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub ts: DateTime<Utc>,
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,

    /// Quantity that actually moved (post in-kind fee for crypto buys).
    pub qty: f64,

    pub fill_price: f64,
    pub fee_cash: f64,

    /// Cash balance after this trade settled.
    pub cash_after: f64,
}

/// Simulated account state.
#[derive(Debug)]
pub struct Ledger {
    pub initial_cash: f64,
    pub cash: f64,
    positions: HashMap<String, Position>,
    history: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            positions: HashMap::new(),
            history: Vec::new(),
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn history(&self) -> &[LedgerEntry] {
        &self.history
    }

    /// Settle a buy: deduct the full notional cost, then fold the filled
    /// quantity into the position at a weighted-average entry price.
    ///
    /// `cost` is what leaves cash (requested qty x price); `filled_qty` is
    /// what lands in the position, which is smaller for crypto where the
    /// taker fee is paid in kind.
    pub fn apply_buy(
        &mut self,
        symbol: &str,
        asset_class: AssetClass,
        filled_qty: f64,
        fill_price: f64,
        cost: f64,
    ) -> Result<(), BrokerError> {
        if cost > self.cash {
            return Err(BrokerError::InsufficientCash {
                required: cost,
                available: self.cash,
            });
        }

        self.cash -= cost;

        match self.positions.get_mut(symbol) {
            Some(pos) => {
                let new_qty = pos.qty + filled_qty;
                pos.avg_entry_price =
                    (pos.qty * pos.avg_entry_price + filled_qty * fill_price) / new_qty;
                pos.qty = new_qty;
            }
            None => {
                self.positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        qty: filled_qty,
                        avg_entry_price: fill_price,
                        asset_class,
                    },
                );
            }
        }

        Ok(())
    }

    /// Settle a sell: credit gross proceeds minus the cash fee and shrink
    /// the position, dropping it entirely once only dust remains.
    pub fn apply_sell(
        &mut self,
        symbol: &str,
        qty: f64,
        fill_price: f64,
        fee_cash: f64,
    ) -> Result<(), BrokerError> {
        let held = self.positions.get(symbol).map(|p| p.qty).unwrap_or(0.0);
        if qty > held {
            return Err(BrokerError::InsufficientPosition {
                symbol: symbol.to_string(),
                held,
                requested: qty,
            });
        }

        self.cash += qty * fill_price - fee_cash;

        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.qty -= qty;
            if pos.qty <= DUST_EPSILON {
                self.positions.remove(symbol);
            }
        }

        Ok(())
    }

    pub fn record(&mut self, entry: LedgerEntry) {
        self.history.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_weighted_average_entry() {
        let mut ledger = Ledger::new(1_000_000.0);

        ledger
            .apply_buy("BTC/USD", AssetClass::Crypto, 1.0, 50_000.0, 50_000.0)
            .unwrap();
        ledger
            .apply_buy("BTC/USD", AssetClass::Crypto, 1.0, 60_000.0, 60_000.0)
            .unwrap();

        let pos = ledger.position("BTC/USD").unwrap();
        assert!((pos.avg_entry_price - 55_000.0).abs() < 1e-9);
        assert!((pos.qty - 2.0).abs() < 1e-12);
        assert!((ledger.cash - 890_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_cash_leaves_ledger_untouched() {
        let mut ledger = Ledger::new(100.0);

        let err = ledger
            .apply_buy("AAPL", AssetClass::UsEquity, 10.0, 150.0, 1_500.0)
            .unwrap_err();

        assert!(matches!(err, BrokerError::InsufficientCash { .. }));
        assert_eq!(ledger.cash, 100.0);
        assert!(ledger.position("AAPL").is_none());
    }

    #[test]
    fn test_insufficient_position_leaves_ledger_untouched() {
        let mut ledger = Ledger::new(10_000.0);
        ledger
            .apply_buy("AAPL", AssetClass::UsEquity, 10.0, 100.0, 1_000.0)
            .unwrap();

        let err = ledger.apply_sell("AAPL", 20.0, 110.0, 0.02).unwrap_err();

        assert!(matches!(err, BrokerError::InsufficientPosition { .. }));
        assert_eq!(ledger.position("AAPL").unwrap().qty, 10.0);
        assert!((ledger.cash - 9_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_sell_dust_removes_position() {
        let mut ledger = Ledger::new(10_000.0);
        ledger
            .apply_buy("BTC/USD", AssetClass::Crypto, 0.9975, 1_000.0, 1_000.0)
            .unwrap();

        // Selling the full filled quantity leaves (at most) float residue,
        // which must not survive as a phantom position.
        ledger.apply_sell("BTC/USD", 0.9975, 1_100.0, 2.74).unwrap();

        assert!(ledger.position("BTC/USD").is_none());
    }

    #[test]
    fn test_partial_sell_keeps_entry_price() {
        let mut ledger = Ledger::new(100_000.0);
        ledger
            .apply_buy("AAPL", AssetClass::UsEquity, 100.0, 150.0, 15_000.0)
            .unwrap();

        ledger.apply_sell("AAPL", 40.0, 160.0, 0.07).unwrap();

        let pos = ledger.position("AAPL").unwrap();
        assert!((pos.qty - 60.0).abs() < 1e-12);
        assert_eq!(pos.avg_entry_price, 150.0);
    }
}
