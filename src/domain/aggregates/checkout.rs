//! Checkout context handed to the engine by the order service

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::value_objects::InstrumentId;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub category: String,
    pub amount: Decimal,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, category: impl Into<String>, amount: Decimal) -> Self {
        Self { product_id: product_id.into(), category: category.into(), amount }
    }
}

/// Ephemeral snapshot of a checkout. `now` is always injected, never read from the clock.
#[derive(Clone, Debug)]
pub struct CheckoutContext {
    pub subtotal: Decimal,
    pub lines: Vec<CartLine>,
    pub user_id: String,
    pub user_segment: String,
    pub now: DateTime<Utc>,
    pub prior_redemptions: HashMap<InstrumentId, u32>,
}

impl CheckoutContext {
    pub fn new(subtotal: Decimal, user_id: impl Into<String>, user_segment: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            subtotal, lines: vec![], user_id: user_id.into(), user_segment: user_segment.into(),
            now, prior_redemptions: HashMap::new(),
        }
    }

    pub fn from_lines(lines: Vec<CartLine>, user_id: impl Into<String>, user_segment: impl Into<String>, now: DateTime<Utc>) -> Self {
        let subtotal = lines.iter().map(|l| l.amount).sum();
        Self { lines, ..Self::new(subtotal, user_id, user_segment, now) }
    }

    pub fn with_lines(mut self, lines: Vec<CartLine>) -> Self { self.lines = lines; self }

    pub fn with_prior_redemptions(mut self, prior: HashMap<InstrumentId, u32>) -> Self {
        self.prior_redemptions = prior;
        self
    }

    pub fn redemptions_of(&self, id: &InstrumentId) -> u32 {
        self.prior_redemptions.get(id).copied().unwrap_or(0)
    }
}
