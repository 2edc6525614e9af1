//! OpenSASE Promotions
//!
//! Discount resolution engine for the OpenSASE storefront.
//!
//! ## Features
//! - Unified coupon / special offer / event discount model
//! - Validity predicate with shopper-facing ineligibility reasons
//! - Percentage, fixed, free-shipping and buy-one-get-one calculation
//! - Stacking resolution (exclusive vs. stacked selections)
//! - Race-safe redemption accounting against a pluggable store
//! - Campaign lifecycle with embedded discounts

pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod store;

pub use domain::aggregates::{
    CartLine, Campaign, CampaignDiscount, CampaignRules, CampaignStatus, CheckoutContext,
    DiscountInstrument, DiscountType, InstrumentBuilder, InstrumentKind,
};
pub use domain::events::PromotionEvent;
pub use domain::value_objects::{CouponCode, InstrumentId};
pub use engine::{
    commit, compute_discount, diagnose, is_valid, redeem_with_retry, resolve, AppliedInstrument,
    DiscountOutcome, Ineligibility, Redemption, SelectionMode, SelectionResult,
};
pub use store::{InMemoryStore, InstrumentStore, PgInstrumentStore};

use domain::aggregates::CampaignStatus as Status;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum DiscountError {
    #[error("Invalid instrument config: {0}")]
    InvalidInstrumentConfig(String),

    #[error("Usage limit exceeded for instrument {instrument_id}")]
    UsageLimitExceeded { instrument_id: InstrumentId },

    #[error("No applicable discount instrument")]
    NoApplicableInstrument,

    #[error("Instrument not found: {0}")]
    InstrumentNotFound(InstrumentId),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("Cannot move campaign from {from:?} to {to:?}")]
    InvalidCampaignTransition { from: Status, to: Status },

    #[error("Campaign {0} is completed and can no longer be changed")]
    CampaignClosed(String),

    #[error("Usage limit exceeded for instrument {instrument_id} after {} redemption(s) were committed", .committed.len())]
    RedemptionIncomplete { instrument_id: InstrumentId, committed: Vec<Redemption> },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for DiscountError {
    fn from(e: sqlx::Error) -> Self {
        DiscountError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiscountError>;
