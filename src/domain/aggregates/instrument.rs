//! Discount Instrument Aggregate
//!
//! Coupons, special offers and event discounts share one shape; `kind` only
//! records where the instrument came from. Every instance is built through
//! [`InstrumentBuilder`], so the data-model invariants hold for anything the
//! engine evaluates.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::domain::value_objects::{CouponCode, InstrumentId};
use crate::{DiscountError, Result};

/// Segment label that opts an instrument into every user group.
pub const ALL_USERS: &str = "all";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind { Coupon, SpecialOffer, EventDiscount }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType { Percentage, FixedAmount, FreeShipping, BuyOneGetOne }

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Coupon => "coupon", Self::SpecialOffer => "special_offer", Self::EventDiscount => "event_discount" }
    }
}

impl FromStr for InstrumentKind {
    type Err = DiscountError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "coupon" => Ok(Self::Coupon),
            "special_offer" => Ok(Self::SpecialOffer),
            "event_discount" => Ok(Self::EventDiscount),
            other => Err(DiscountError::InvalidInstrumentConfig(format!("unknown instrument kind '{other}'"))),
        }
    }
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::FixedAmount => "fixed_amount",
            Self::FreeShipping => "free_shipping",
            Self::BuyOneGetOne => "buy_one_get_one",
        }
    }
}

impl FromStr for DiscountType {
    type Err = DiscountError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "percentage" => Ok(Self::Percentage),
            "fixed_amount" => Ok(Self::FixedAmount),
            "free_shipping" => Ok(Self::FreeShipping),
            "buy_one_get_one" => Ok(Self::BuyOneGetOne),
            other => Err(DiscountError::InvalidInstrumentConfig(format!("unknown discount type '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiscountInstrument {
    id: InstrumentId,
    kind: InstrumentKind,
    code: Option<CouponCode>,
    name: String,
    discount_type: DiscountType,
    value: Decimal,
    min_order_amount: Decimal,
    max_discount_amount: Option<Decimal>,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    usage_limit: Option<u32>,
    usage_count: u32,
    per_user_limit: Option<u32>,
    target_user_groups: BTreeSet<String>,
    target_categories: BTreeSet<String>,
    excluded_products: BTreeSet<String>,
    assigned_user: Option<String>,
    is_active: bool,
    stackable: bool,
}

impl DiscountInstrument {
    pub fn builder(
        kind: InstrumentKind,
        discount_type: DiscountType,
        value: Decimal,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> InstrumentBuilder {
        InstrumentBuilder::new(kind, discount_type, value, valid_from, valid_until)
    }

    /// Single-use percentage coupon handed out by the spin wheel.
    pub fn spin_reward(user_id: &str, percent: Decimal, now: DateTime<Utc>) -> Result<Self> {
        let suffix: String = uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        Self::builder(InstrumentKind::Coupon, DiscountType::Percentage, percent, now, now + Duration::days(30))
            .code(format!("SPIN{suffix}"))
            .name(format!("Lucky Spin Reward - {percent}% Off"))
            .min_order_amount(Decimal::new(1000, 0))
            .max_discount_amount(Decimal::new(2000, 0))
            .usage_limit(1)
            .per_user_limit(1)
            .assigned_user(user_id)
            .build()
    }

    pub fn id(&self) -> &InstrumentId { &self.id }
    pub fn kind(&self) -> InstrumentKind { self.kind }
    pub fn code(&self) -> Option<&CouponCode> { self.code.as_ref() }
    pub fn name(&self) -> &str { &self.name }
    pub fn discount_type(&self) -> DiscountType { self.discount_type }
    pub fn value(&self) -> Decimal { self.value }
    pub fn min_order_amount(&self) -> Decimal { self.min_order_amount }
    pub fn max_discount_amount(&self) -> Option<Decimal> { self.max_discount_amount }
    pub fn valid_from(&self) -> DateTime<Utc> { self.valid_from }
    pub fn valid_until(&self) -> DateTime<Utc> { self.valid_until }
    pub fn usage_limit(&self) -> Option<u32> { self.usage_limit }
    pub fn usage_count(&self) -> u32 { self.usage_count }
    pub fn per_user_limit(&self) -> Option<u32> { self.per_user_limit }
    pub fn target_user_groups(&self) -> &BTreeSet<String> { &self.target_user_groups }
    pub fn target_categories(&self) -> &BTreeSet<String> { &self.target_categories }
    pub fn excluded_products(&self) -> &BTreeSet<String> { &self.excluded_products }
    pub fn assigned_user(&self) -> Option<&str> { self.assigned_user.as_deref() }
    pub fn is_active(&self) -> bool { self.is_active }
    pub fn is_stackable(&self) -> bool { self.stackable }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit.map(|limit| self.usage_count >= limit).unwrap_or(false)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now > self.valid_until }

    /// Inert instruments can never become valid again without an admin edit.
    pub fn is_inert(&self, now: DateTime<Utc>) -> bool { self.is_exhausted() || self.is_expired(now) }

    /// Copy of this instrument with a usage counter read back from the store.
    pub fn with_usage_count(&self, usage_count: u32) -> Self {
        Self { usage_count, ..self.clone() }
    }

    pub fn deactivated(&self) -> Self {
        Self { is_active: false, ..self.clone() }
    }
}

pub struct InstrumentBuilder {
    id: Option<InstrumentId>,
    kind: InstrumentKind,
    code: Option<String>,
    name: String,
    discount_type: DiscountType,
    value: Decimal,
    min_order_amount: Decimal,
    max_discount_amount: Option<Decimal>,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    usage_limit: Option<u32>,
    usage_count: u32,
    per_user_limit: Option<u32>,
    target_user_groups: BTreeSet<String>,
    target_categories: BTreeSet<String>,
    excluded_products: BTreeSet<String>,
    assigned_user: Option<String>,
    is_active: bool,
    stackable: bool,
}

impl InstrumentBuilder {
    pub fn new(
        kind: InstrumentKind,
        discount_type: DiscountType,
        value: Decimal,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None, kind, code: None, name: String::new(), discount_type, value,
            min_order_amount: Decimal::ZERO, max_discount_amount: None, valid_from, valid_until,
            usage_limit: None, usage_count: 0, per_user_limit: None,
            target_user_groups: BTreeSet::new(), target_categories: BTreeSet::new(),
            excluded_products: BTreeSet::new(), assigned_user: None, is_active: true, stackable: false,
        }
    }

    pub fn id(mut self, id: impl Into<InstrumentId>) -> Self { self.id = Some(id.into()); self }
    pub fn code(mut self, code: impl Into<String>) -> Self { self.code = Some(code.into()); self }
    pub fn name(mut self, name: impl Into<String>) -> Self { self.name = name.into(); self }
    pub fn min_order_amount(mut self, amount: Decimal) -> Self { self.min_order_amount = amount; self }
    pub fn max_discount_amount(mut self, amount: Decimal) -> Self { self.max_discount_amount = Some(amount); self }
    pub fn usage_limit(mut self, limit: u32) -> Self { self.usage_limit = Some(limit); self }
    pub fn usage_count(mut self, count: u32) -> Self { self.usage_count = count; self }
    pub fn per_user_limit(mut self, limit: u32) -> Self { self.per_user_limit = Some(limit); self }
    pub fn assigned_user(mut self, user_id: impl Into<String>) -> Self { self.assigned_user = Some(user_id.into()); self }
    pub fn active(mut self, is_active: bool) -> Self { self.is_active = is_active; self }
    pub fn stackable(mut self, stackable: bool) -> Self { self.stackable = stackable; self }

    pub fn target_user_groups<I, S>(mut self, groups: I) -> Self where I: IntoIterator<Item = S>, S: Into<String> {
        self.target_user_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn target_categories<I, S>(mut self, categories: I) -> Self where I: IntoIterator<Item = S>, S: Into<String> {
        self.target_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn excluded_products<I, S>(mut self, products: I) -> Self where I: IntoIterator<Item = S>, S: Into<String> {
        self.excluded_products = products.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<DiscountInstrument> {
        let invalid = |msg: &str| Err(DiscountError::InvalidInstrumentConfig(msg.to_string()));
        if self.valid_from >= self.valid_until { return invalid("valid_from must be before valid_until"); }
        if self.value < Decimal::ZERO { return invalid("value must not be negative"); }
        if self.discount_type == DiscountType::Percentage && self.value > Decimal::ONE_HUNDRED {
            return invalid("percentage value must be within 0..=100");
        }
        if self.min_order_amount < Decimal::ZERO { return invalid("min_order_amount must not be negative"); }
        if matches!(self.max_discount_amount, Some(cap) if cap <= Decimal::ZERO) {
            return invalid("max_discount_amount must be greater than zero");
        }
        let cents = |amount: Decimal| amount.normalize().scale() <= 2;
        if !cents(self.value) || !cents(self.min_order_amount) || !self.max_discount_amount.map_or(true, cents) {
            return invalid("amounts allow at most two decimal places");
        }
        if matches!(self.usage_limit, Some(limit) if self.usage_count > limit) {
            return invalid("usage_count exceeds usage_limit");
        }
        let code = match self.code {
            Some(raw) => Some(CouponCode::new(raw).map_err(|e| DiscountError::InvalidInstrumentConfig(e.to_string()))?),
            None => None,
        };
        let id = self.id.unwrap_or_else(InstrumentId::generate);
        let name = if self.name.is_empty() {
            code.as_ref().map(|c| c.to_string()).unwrap_or_else(|| id.to_string())
        } else {
            self.name
        };
        Ok(DiscountInstrument {
            id, kind: self.kind, code, name, discount_type: self.discount_type, value: self.value,
            min_order_amount: self.min_order_amount, max_discount_amount: self.max_discount_amount,
            valid_from: self.valid_from, valid_until: self.valid_until, usage_limit: self.usage_limit,
            usage_count: self.usage_count, per_user_limit: self.per_user_limit,
            target_user_groups: self.target_user_groups, target_categories: self.target_categories,
            excluded_products: self.excluded_products, assigned_user: self.assigned_user,
            is_active: self.is_active, stackable: self.stackable,
        })
    }
}
