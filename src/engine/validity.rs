//! Validity predicate
//!
//! "Active" is only the manual kill-switch on the instrument. "Valid" is the
//! full predicate below, evaluated against an injected checkout context.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::aggregates::{CartLine, CheckoutContext, DiscountInstrument, ALL_USERS};

/// First rule an instrument failed for a given checkout.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Ineligibility {
    Inactive,
    NotYetActive { valid_from: DateTime<Utc> },
    Expired { valid_until: DateTime<Utc> },
    Exhausted { used: u32, limit: u32 },
    PerUserLimitReached { used: u32, limit: u32 },
    AssignedToAnotherUser,
    BelowMinimumOrder { min_order_amount: Decimal },
    SegmentMismatch,
    NoQualifyingItems,
}

impl Ineligibility {
    pub fn user_message(&self) -> String {
        match self {
            Self::Inactive => "This coupon is no longer active".to_string(),
            Self::NotYetActive { valid_from } => format!("This offer starts on {}", valid_from.format("%Y-%m-%d")),
            Self::Expired { .. } => "This coupon has expired".to_string(),
            Self::Exhausted { .. } => "This offer has been fully redeemed".to_string(),
            Self::PerUserLimitReached { limit, .. } => format!("You have already used this offer {limit} time(s)"),
            Self::AssignedToAnotherUser => "This coupon belongs to another account".to_string(),
            Self::BelowMinimumOrder { min_order_amount } => format!("Minimum order amount of {min_order_amount} required"),
            Self::SegmentMismatch => "This offer is not available for your account".to_string(),
            Self::NoQualifyingItems => "No items in your cart qualify for this offer".to_string(),
        }
    }
}

impl std::fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.user_message()) }
}

/// Returns `None` when the instrument may be applied to this checkout.
pub fn diagnose(instrument: &DiscountInstrument, ctx: &CheckoutContext) -> Option<Ineligibility> {
    if !instrument.is_active() {
        return Some(Ineligibility::Inactive);
    }
    if ctx.now < instrument.valid_from() {
        return Some(Ineligibility::NotYetActive { valid_from: instrument.valid_from() });
    }
    if ctx.now > instrument.valid_until() {
        return Some(Ineligibility::Expired { valid_until: instrument.valid_until() });
    }
    if let Some(limit) = instrument.usage_limit() {
        if instrument.usage_count() >= limit {
            return Some(Ineligibility::Exhausted { used: instrument.usage_count(), limit });
        }
    }
    if let Some(limit) = instrument.per_user_limit() {
        let used = ctx.redemptions_of(instrument.id());
        if used >= limit {
            return Some(Ineligibility::PerUserLimitReached { used, limit });
        }
    }
    if matches!(instrument.assigned_user(), Some(owner) if owner != ctx.user_id) {
        return Some(Ineligibility::AssignedToAnotherUser);
    }
    if ctx.subtotal < instrument.min_order_amount() {
        return Some(Ineligibility::BelowMinimumOrder { min_order_amount: instrument.min_order_amount() });
    }
    let groups = instrument.target_user_groups();
    if !groups.is_empty() && !groups.contains(ALL_USERS) && !groups.contains(&ctx.user_segment) {
        return Some(Ineligibility::SegmentMismatch);
    }
    if !instrument.target_categories().is_empty() && qualifying_lines(instrument, ctx).next().is_none() {
        return Some(Ineligibility::NoQualifyingItems);
    }
    None
}

pub fn is_valid(instrument: &DiscountInstrument, ctx: &CheckoutContext) -> bool {
    diagnose(instrument, ctx).is_none()
}

/// Cart lines in scope: inside the target categories (all lines when none are
/// set) and not explicitly excluded.
pub(crate) fn qualifying_lines<'a>(instrument: &'a DiscountInstrument, ctx: &'a CheckoutContext) -> impl Iterator<Item = &'a CartLine> + 'a {
    let categories = instrument.target_categories();
    let excluded = instrument.excluded_products();
    ctx.lines.iter().filter(move |line| {
        (categories.is_empty() || categories.contains(&line.category)) && !excluded.contains(&line.product_id)
    })
}
