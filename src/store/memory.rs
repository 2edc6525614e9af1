//! In-process instrument store
//!
//! Usage counters are `AtomicU32`s advanced with a compare-and-swap loop, so a
//! commit never needs the map's write lock and two racing commits on the last
//! use cannot both win. Replacing an instrument keeps its counter `Arc`, so a
//! commit holding the previous entry still lands on the live counter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::domain::aggregates::{Campaign, DiscountInstrument};
use crate::domain::value_objects::{CouponCode, InstrumentId};
use crate::engine::Redemption;
use crate::store::InstrumentStore;
use crate::{DiscountError, Result};

struct Entry {
    instrument: DiscountInstrument,
    usage_count: Arc<AtomicU32>,
}

impl Entry {
    fn snapshot(&self) -> DiscountInstrument {
        self.instrument.with_usage_count(self.usage_count.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    instruments: RwLock<HashMap<InstrumentId, Arc<Entry>>>,
    redemptions: Mutex<HashMap<(String, InstrumentId), u32>>,
    campaigns: RwLock<HashMap<String, Campaign>>,
}

impl InMemoryStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl InstrumentStore for InMemoryStore {
    async fn insert(&self, instrument: DiscountInstrument) -> Result<()> {
        let mut instruments = self.instruments.write().await;
        let usage_count = match instruments.get(instrument.id()) {
            Some(existing) => existing.usage_count.clone(),
            None => Arc::new(AtomicU32::new(instrument.usage_count())),
        };
        let entry = Entry { instrument, usage_count };
        instruments.insert(entry.instrument.id().clone(), Arc::new(entry));
        Ok(())
    }

    async fn get(&self, id: &InstrumentId) -> Result<Option<DiscountInstrument>> {
        Ok(self.instruments.read().await.get(id).map(|e| e.snapshot()))
    }

    async fn find_by_code(&self, code: &CouponCode) -> Result<Option<DiscountInstrument>> {
        let instruments = self.instruments.read().await;
        Ok(instruments.values().find(|e| e.instrument.code() == Some(code)).map(|e| e.snapshot()))
    }

    async fn candidates(&self, now: DateTime<Utc>) -> Result<Vec<DiscountInstrument>> {
        let instruments = self.instruments.read().await;
        let mut found: Vec<DiscountInstrument> = instruments
            .values()
            .map(|e| e.snapshot())
            .filter(|i| i.is_active() && i.valid_from() <= now && !i.is_inert(now))
            .collect();
        found.sort_by(|a, b| a.valid_until().cmp(&b.valid_until()).then_with(|| a.id().cmp(b.id())));
        Ok(found)
    }

    async fn prior_redemptions(&self, user_id: &str) -> Result<HashMap<InstrumentId, u32>> {
        let redemptions = self.redemptions.lock().await;
        Ok(redemptions
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|((_, id), count)| (id.clone(), *count))
            .collect())
    }

    async fn commit_redemption(&self, id: &InstrumentId, user_id: &str, order_id: &str, amount: Decimal, now: DateTime<Utc>) -> Result<Redemption> {
        let entry = self
            .instruments
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DiscountError::InstrumentNotFound(id.clone()))?;
        let limit = entry.instrument.usage_limit();
        let previous = entry
            .usage_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| match limit {
                Some(limit) if count >= limit => None,
                _ => count.checked_add(1),
            })
            .map_err(|_| DiscountError::UsageLimitExceeded { instrument_id: id.clone() })?;
        let usage_count = previous + 1;

        *self.redemptions.lock().await.entry((user_id.to_string(), id.clone())).or_insert(0) += 1;

        Ok(Redemption {
            instrument_id: id.clone(),
            user_id: user_id.to_string(),
            order_id: order_id.to_string(),
            amount,
            usage_count,
            exhausted: limit == Some(usage_count),
            redeemed_at: now,
        })
    }

    async fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        self.campaigns.write().await.insert(campaign.id().to_string(), campaign.clone());
        Ok(())
    }

    async fn campaign(&self, id: &str) -> Result<Option<Campaign>> {
        Ok(self.campaigns.read().await.get(id).cloned())
    }
}
