//! Campaign Aggregate
//!
//! A campaign (storefront "event") bundles discounts that share a time window
//! and targeting rules. Its discounts only become evaluable while the campaign
//! is `Active`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::instrument::{DiscountInstrument, DiscountType, InstrumentKind};
use crate::domain::events::PromotionEvent;
use crate::{DiscountError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus { #[default] Draft, Scheduled, Active, Paused, Completed }

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

/// Targeting shared by every discount in the campaign. A `max_discount` of zero means uncapped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignRules {
    #[serde(default)] pub min_order_amount: Decimal,
    #[serde(default)] pub max_discount: Decimal,
    #[serde(default)] pub user_groups: Vec<String>,
    #[serde(default)] pub categories: Vec<String>,
    #[serde(default)] pub excluded_products: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampaignDiscount {
    pub id: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    #[serde(default)] pub stackable: bool,
    #[serde(default)] pub usage_limit: Option<u32>,
    #[serde(default)] pub per_user_limit: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Campaign {
    id: String,
    name: String,
    status: CampaignStatus,
    priority: u8,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    rules: CampaignRules,
    discounts: Vec<CampaignDiscount>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<PromotionEvent>,
}

impl Campaign {
    pub fn create(name: impl Into<String>, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>, priority: u8, rules: CampaignRules) -> Result<Self> {
        if starts_at >= ends_at {
            return Err(DiscountError::InvalidInstrumentConfig("campaign must start before it ends".into()));
        }
        if !(1..=10).contains(&priority) {
            return Err(DiscountError::InvalidInstrumentConfig("campaign priority must be within 1..=10".into()));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7().to_string(), name: name.into(), status: CampaignStatus::Draft, priority,
            starts_at, ends_at, rules, discounts: vec![], created_at: now, updated_at: now, events: vec![],
        })
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn status(&self) -> CampaignStatus { self.status }
    pub fn priority(&self) -> u8 { self.priority }
    pub fn rules(&self) -> &CampaignRules { &self.rules }
    pub fn discounts(&self) -> &[CampaignDiscount] { &self.discounts }

    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Active && self.starts_at <= now && now <= self.ends_at
    }

    pub fn add_discount(&mut self, discount: CampaignDiscount) -> Result<()> {
        if self.status == CampaignStatus::Completed {
            return Err(DiscountError::CampaignClosed(self.id.clone()));
        }
        // surface bad values now rather than on activation
        self.instrument_for(&discount)?;
        self.discounts.retain(|d| d.id != discount.id);
        self.discounts.push(discount);
        self.touch();
        Ok(())
    }

    pub fn schedule(&mut self) -> Result<()> {
        self.transition(CampaignStatus::Scheduled, &[CampaignStatus::Draft])
    }

    pub fn activate(&mut self) -> Result<()> {
        self.transition(CampaignStatus::Active, &[CampaignStatus::Draft, CampaignStatus::Scheduled, CampaignStatus::Paused])
    }

    pub fn pause(&mut self) -> Result<()> {
        self.transition(CampaignStatus::Paused, &[CampaignStatus::Active])
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(
            CampaignStatus::Completed,
            &[CampaignStatus::Draft, CampaignStatus::Scheduled, CampaignStatus::Active, CampaignStatus::Paused],
        )
    }

    /// Expands the embedded discounts into evaluable instruments.
    pub fn instruments(&self) -> Result<Vec<DiscountInstrument>> {
        self.discounts.iter().map(|d| self.instrument_for(d)).collect()
    }

    fn instrument_for(&self, discount: &CampaignDiscount) -> Result<DiscountInstrument> {
        let mut builder = DiscountInstrument::builder(InstrumentKind::EventDiscount, discount.discount_type, discount.value, self.starts_at, self.ends_at)
            .id(format!("{}:{}", self.id, discount.id))
            .name(format!("{} - {}", self.name, discount.id))
            .min_order_amount(self.rules.min_order_amount)
            .target_user_groups(self.rules.user_groups.iter().cloned())
            .target_categories(self.rules.categories.iter().cloned())
            .excluded_products(self.rules.excluded_products.iter().cloned())
            .active(self.status == CampaignStatus::Active)
            .stackable(discount.stackable);
        if self.rules.max_discount > Decimal::ZERO { builder = builder.max_discount_amount(self.rules.max_discount); }
        if let Some(limit) = discount.usage_limit { builder = builder.usage_limit(limit); }
        if let Some(limit) = discount.per_user_limit { builder = builder.per_user_limit(limit); }
        builder.build()
    }

    fn transition(&mut self, to: CampaignStatus, allowed_from: &[CampaignStatus]) -> Result<()> {
        let from = self.status;
        if !allowed_from.contains(&from) {
            return Err(DiscountError::InvalidCampaignTransition { from, to });
        }
        self.status = to;
        self.touch();
        self.raise_event(PromotionEvent::CampaignStatusChanged { campaign_id: self.id.clone(), from, to });
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<PromotionEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: PromotionEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
