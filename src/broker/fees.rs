//! Trade fee schedule mirroring Alpaca's published structure:
//! crypto pays a taker percentage on both sides, equities are
//! commission-free but sells incur SEC and TAF regulatory fees.

use crate::models::{AssetClass, OrderSide};

/// Fee rates with Alpaca / regulatory defaults.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    /// Crypto taker fee rate applied to notional (tier 1 default, 0.25%).
    pub crypto_taker_rate: f64,

    /// SEC fee rate on equity sell notional ($8 per $1,000,000).
    pub sec_fee_rate: f64,

    /// TAF per-share rate on equity sells.
    pub taf_rate: f64,

    /// TAF per-trade cap in dollars.
    pub taf_cap: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            crypto_taker_rate: 0.0025,
            sec_fee_rate: 8.00 / 1_000_000.0,
            taf_rate: 0.000166,
            taf_cap: 8.30,
        }
    }
}

/// Round to the nearest cent. Applied to the regulatory fees only; crypto
/// fees and quantities are never rounded, to keep equity curves reproducible.
fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

impl FeeSchedule {
    /// Fee charged against cash for a fill.
    ///
    /// Note the asymmetry for crypto buys: the venue takes the taker fee in
    /// kind (the filled quantity shrinks), so the executor charges no cash
    /// fee there even though this function prices both sides.
    pub fn cash_fee(&self, asset_class: AssetClass, side: OrderSide, qty: f64, price: f64) -> f64 {
        let notional = qty * price;

        match asset_class {
            AssetClass::Crypto => notional * self.crypto_taker_rate,
            AssetClass::UsEquity => match side {
                OrderSide::Buy => 0.0,
                OrderSide::Sell => {
                    let sec_fee = round_cents(notional * self.sec_fee_rate).max(0.01);
                    let taf_fee = round_cents(qty * self.taf_rate).max(0.01).min(self.taf_cap);
                    sec_fee + taf_fee
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_fee_both_sides() {
        let fees = FeeSchedule::default();

        let buy = fees.cash_fee(AssetClass::Crypto, OrderSide::Buy, 1.0, 50_000.0);
        let sell = fees.cash_fee(AssetClass::Crypto, OrderSide::Sell, 1.0, 50_000.0);

        assert_eq!(buy, 125.0);
        assert_eq!(sell, 125.0);
    }

    #[test]
    fn test_equity_buy_is_free() {
        let fees = FeeSchedule::default();
        assert_eq!(
            fees.cash_fee(AssetClass::UsEquity, OrderSide::Buy, 100.0, 150.0),
            0.0
        );
    }

    #[test]
    fn test_equity_sell_regulatory_fees() {
        let fees = FeeSchedule::default();

        // 100 shares @ $160: SEC = round(16000 * 8e-6) = 0.13, TAF = 0.02
        let fee = fees.cash_fee(AssetClass::UsEquity, OrderSide::Sell, 100.0, 160.0);
        assert!((fee - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_equity_sell_fee_minimums() {
        let fees = FeeSchedule::default();

        // Tiny notional: both fees floor at one cent each.
        let fee = fees.cash_fee(AssetClass::UsEquity, OrderSide::Sell, 1.0, 10.0);
        assert!((fee - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_taf_cap() {
        let fees = FeeSchedule::default();

        // 100k shares: TAF would be 16.60 uncapped, clamps at 8.30.
        let notional = 100_000.0 * 5.0;
        let expected_sec = ((notional * fees.sec_fee_rate) * 100.0).round() / 100.0;
        let fee = fees.cash_fee(AssetClass::UsEquity, OrderSide::Sell, 100_000.0, 5.0);
        assert!((fee - (expected_sec.max(0.01) + 8.30)).abs() < 1e-12);
    }
}
