//! Discount calculation
//!
//! Callers check validity first; nothing here re-validates. Amounts are rounded
//! half-up to 2 decimal places once, after the formula and any cap.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::aggregates::{CheckoutContext, DiscountInstrument, DiscountType};
use crate::domain::value_objects::round_currency;
use crate::engine::validity::qualifying_lines;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DiscountOutcome {
    /// Cart-level discount, always within `[0, subtotal]`.
    pub amount: Decimal,
    /// Shipping is priced elsewhere; this only tells the caller to waive it.
    pub waive_shipping: bool,
}

impl DiscountOutcome {
    pub fn none() -> Self { Self { amount: Decimal::ZERO, waive_shipping: false } }
}

pub fn compute_discount(instrument: &DiscountInstrument, ctx: &CheckoutContext) -> DiscountOutcome {
    let subtotal = ctx.subtotal.max(Decimal::ZERO);
    let raw = match instrument.discount_type() {
        DiscountType::Percentage => {
            let amount = subtotal * instrument.value() / Decimal::ONE_HUNDRED;
            match instrument.max_discount_amount() {
                Some(cap) => amount.min(cap),
                None => amount,
            }
        }
        DiscountType::FixedAmount => instrument.value().min(subtotal),
        DiscountType::FreeShipping => return DiscountOutcome { amount: Decimal::ZERO, waive_shipping: true },
        DiscountType::BuyOneGetOne => cheapest_free_unit(instrument, ctx),
    };
    DiscountOutcome { amount: round_currency(raw).min(subtotal).max(Decimal::ZERO), waive_shipping: false }
}

/// Price of the cheapest qualifying line, or zero with fewer than two lines in scope.
fn cheapest_free_unit(instrument: &DiscountInstrument, ctx: &CheckoutContext) -> Decimal {
    let mut count = 0usize;
    let mut cheapest: Option<Decimal> = None;
    for line in qualifying_lines(instrument, ctx) {
        count += 1;
        cheapest = Some(cheapest.map_or(line.amount, |c| c.min(line.amount)));
    }
    match cheapest {
        Some(amount) if count >= 2 => amount,
        _ => Decimal::ZERO,
    }
}
