//! Stacking resolution
//!
//! One non-stackable instrument beats any number of stackable ones. Stackable
//! instruments are each computed against the original subtotal and summed,
//! with the sum capped at the subtotal. Free shipping is picked separately and
//! at most once.

use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::domain::aggregates::{CheckoutContext, DiscountInstrument, InstrumentKind};
use crate::domain::value_objects::{CouponCode, InstrumentId};
use crate::engine::{calculation::compute_discount, validity::is_valid};
use crate::{DiscountError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode { None, Exclusive, Stacked }

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppliedInstrument {
    pub id: InstrumentId,
    pub kind: InstrumentKind,
    pub code: Option<CouponCode>,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectionResult {
    pub mode: SelectionMode,
    pub applied: Vec<AppliedInstrument>,
    pub total_discount: Decimal,
    pub waive_shipping: bool,
    pub free_shipping_instrument: Option<InstrumentId>,
}

impl SelectionResult {
    pub fn empty() -> Self {
        Self { mode: SelectionMode::None, applied: vec![], total_discount: Decimal::ZERO, waive_shipping: false, free_shipping_instrument: None }
    }

    pub fn is_empty(&self) -> bool { self.applied.is_empty() && self.free_shipping_instrument.is_none() }

    /// Everything that must be committed once the order is persisted.
    pub fn selected_ids(&self) -> Vec<InstrumentId> {
        self.applied.iter().map(|a| a.id.clone()).chain(self.free_shipping_instrument.clone()).collect()
    }

    /// Selected ids paired with the amount each takes off the order.
    pub fn commitments(&self) -> Vec<(InstrumentId, Decimal)> {
        self.applied
            .iter()
            .map(|a| (a.id.clone(), a.amount))
            .chain(self.free_shipping_instrument.clone().map(|id| (id, Decimal::ZERO)))
            .collect()
    }

    pub fn contains(&self, id: &InstrumentId) -> bool {
        self.free_shipping_instrument.as_ref() == Some(id) || self.applied.iter().any(|a| &a.id == id)
    }

    /// Turns the empty outcome into an error for callers that asked for a specific code.
    pub fn ensure_applicable(self) -> Result<Self> {
        if self.is_empty() { Err(DiscountError::NoApplicableInstrument) } else { Ok(self) }
    }
}

/// Soonest-expiring first, then id ascending.
fn tie_break(a: &DiscountInstrument, b: &DiscountInstrument) -> Ordering {
    a.valid_until().cmp(&b.valid_until()).then_with(|| a.id().cmp(b.id()))
}

/// Greatest amount first, then the tie-break.
fn by_amount(a: &(&DiscountInstrument, Decimal), b: &(&DiscountInstrument, Decimal)) -> Ordering {
    b.1.cmp(&a.1).then_with(|| tie_break(a.0, b.0))
}

fn applied(instrument: &DiscountInstrument, amount: Decimal) -> AppliedInstrument {
    AppliedInstrument { id: instrument.id().clone(), kind: instrument.kind(), code: instrument.code().cloned(), amount }
}

pub fn resolve(instruments: &[DiscountInstrument], ctx: &CheckoutContext) -> SelectionResult {
    let mut seen = HashSet::new();
    let mut monetary: Vec<(&DiscountInstrument, Decimal)> = vec![];
    let mut shipping: Vec<&DiscountInstrument> = vec![];

    for instrument in instruments {
        if !seen.insert(instrument.id()) || !is_valid(instrument, ctx) { continue; }
        let outcome = compute_discount(instrument, ctx);
        if outcome.waive_shipping {
            shipping.push(instrument);
        } else {
            monetary.push((instrument, outcome.amount));
        }
    }

    let free_shipping_instrument = shipping.into_iter().min_by(|a, b| tie_break(a, b)).map(|i| i.id().clone());
    monetary.sort_by(by_amount);

    let subtotal = ctx.subtotal.max(Decimal::ZERO);
    let (mode, applied) = match monetary.iter().find(|(i, _)| !i.is_stackable()) {
        // a zero-yield winner still shuts out the stackables
        Some((winner, amount)) => {
            let applied = if *amount > Decimal::ZERO { vec![applied(winner, *amount)] } else { vec![] };
            (SelectionMode::Exclusive, applied)
        }
        None if monetary.iter().any(|(_, amount)| *amount > Decimal::ZERO) => {
            let mut remaining = subtotal;
            let mut stacked = vec![];
            for (instrument, amount) in &monetary {
                let share = (*amount).min(remaining);
                if share <= Decimal::ZERO { break; }
                remaining -= share;
                stacked.push(applied(instrument, share));
            }
            (SelectionMode::Stacked, stacked)
        }
        None => (SelectionMode::None, vec![]),
    };

    let total_discount = applied.iter().map(|a| a.amount).sum::<Decimal>().min(subtotal);
    let result = SelectionResult {
        mode,
        applied,
        total_discount,
        waive_shipping: free_shipping_instrument.is_some(),
        free_shipping_instrument,
    };
    tracing::debug!(
        user_id = %ctx.user_id,
        candidates = instruments.len(),
        mode = ?result.mode,
        total_discount = %result.total_discount,
        waive_shipping = result.waive_shipping,
        "Resolved discounts"
    );
    result
}
