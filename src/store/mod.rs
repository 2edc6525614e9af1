//! Instrument storage
//!
//! The engine never owns persistence. A store hands out candidate instruments
//! and performs the one mutation the engine needs: a conditional usage
//! increment that fails instead of overselling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::aggregates::{Campaign, DiscountInstrument};
use crate::domain::value_objects::{CouponCode, InstrumentId};
use crate::engine::Redemption;
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgInstrumentStore;

#[async_trait]
pub trait InstrumentStore: Send + Sync {
    /// Creates or replaces an instrument. An existing usage counter is kept.
    async fn insert(&self, instrument: DiscountInstrument) -> Result<()>;

    async fn get(&self, id: &InstrumentId) -> Result<Option<DiscountInstrument>>;

    async fn find_by_code(&self, code: &CouponCode) -> Result<Option<DiscountInstrument>>;

    /// Active, in-window, non-exhausted instruments, soonest expiry first.
    async fn candidates(&self, now: DateTime<Utc>) -> Result<Vec<DiscountInstrument>>;

    /// How often `user_id` has redeemed each instrument.
    async fn prior_redemptions(&self, user_id: &str) -> Result<HashMap<InstrumentId, u32>>;

    /// Increments the usage counter only while it is below the limit and records
    /// the redemption with the amount it took off the order. Fails with
    /// `UsageLimitExceeded` when no use is left.
    async fn commit_redemption(&self, id: &InstrumentId, user_id: &str, order_id: &str, amount: Decimal, now: DateTime<Utc>) -> Result<Redemption>;

    async fn save_campaign(&self, campaign: &Campaign) -> Result<()>;

    async fn campaign(&self, id: &str) -> Result<Option<Campaign>>;
}
