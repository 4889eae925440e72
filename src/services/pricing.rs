//! Order money arithmetic.
//!
//! One routine computes every derived money field so carts (preview) and
//! checkout (persisted) can never disagree. All figures are server-computed;
//! client-supplied amounts are never read.

use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::CheckoutConfig;

/// Derived money fields for a cart or order.
/// Invariant: `total == max(0, subtotal + tax + shipping_cost - discount)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
}

pub fn compute_totals(cfg: &CheckoutConfig, subtotal: Decimal, discount: Decimal) -> Totals {
    // Discount can never exceed the subtotal or go negative.
    let discount = discount.min(subtotal).max(Decimal::ZERO);

    let tax = (subtotal * cfg.tax_rate).round_dp(2);

    // Free shipping is keyed off the subtotal alone, before discount.
    let shipping_cost = if subtotal >= cfg.free_shipping_threshold {
        Decimal::ZERO
    } else {
        cfg.flat_shipping_fee
    };

    let total = (subtotal + tax + shipping_cost - discount).max(Decimal::ZERO);

    Totals {
        subtotal,
        discount,
        tax,
        shipping_cost,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cfg() -> CheckoutConfig {
        CheckoutConfig::default()
    }

    #[test]
    fn two_item_cart_above_free_shipping_threshold() {
        // 10,000 x 1 + 25,000 x 2 = 60,000 subtotal
        let totals = compute_totals(&cfg(), dec!(60000), Decimal::ZERO);
        assert_eq!(totals.subtotal, dec!(60000));
        assert_eq!(totals.tax, dec!(4800));
        assert_eq!(totals.shipping_cost, dec!(0));
        assert_eq!(totals.total, dec!(64800));
    }

    #[test]
    fn below_threshold_pays_flat_shipping() {
        let totals = compute_totals(&cfg(), dec!(30000), Decimal::ZERO);
        assert_eq!(totals.tax, dec!(2400));
        assert_eq!(totals.shipping_cost, dec!(2500));
        assert_eq!(totals.total, dec!(34900));
    }

    #[test]
    fn threshold_is_inclusive() {
        let totals = compute_totals(&cfg(), dec!(50000), Decimal::ZERO);
        assert_eq!(totals.shipping_cost, dec!(0));
    }

    #[test]
    fn discount_clamps_to_subtotal_and_total_stays_non_negative() {
        let totals = compute_totals(&cfg(), dec!(100), dec!(5000));
        assert_eq!(totals.discount, dec!(100));
        // tax 8 + shipping 2500 - discount 100
        assert_eq!(totals.total, dec!(2508));
        assert!(totals.total >= Decimal::ZERO);
    }

    #[test]
    fn negative_discount_is_ignored() {
        let totals = compute_totals(&cfg(), dec!(100), dec!(-50));
        assert_eq!(totals.discount, Decimal::ZERO);
    }

    #[test]
    fn invariant_holds() {
        for (sub, disc) in [
            (dec!(60000), dec!(0)),
            (dec!(123.45), dec!(20)),
            (dec!(49999.99), dec!(10000)),
        ] {
            let t = compute_totals(&cfg(), sub, disc);
            assert_eq!(
                t.total,
                (t.subtotal + t.tax + t.shipping_cost - t.discount).max(Decimal::ZERO)
            );
        }
    }
}
