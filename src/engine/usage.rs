//! Usage accounting
//!
//! Runs only after the order is persisted. The counter increment itself lives
//! in the store as a single conditional update; this module adds logging,
//! events and the bounded re-resolve policy for lost races.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;

use crate::domain::aggregates::{CheckoutContext, DiscountInstrument};
use crate::domain::events::PromotionEvent;
use crate::domain::value_objects::InstrumentId;
use crate::engine::resolution::{resolve, SelectionResult};
use crate::store::InstrumentStore;
use crate::{DiscountError, Result};

/// Receipt for one successful commit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Redemption {
    pub instrument_id: InstrumentId,
    pub user_id: String,
    pub order_id: String,
    /// Amount taken off the order; zero for a shipping waiver.
    pub amount: Decimal,
    pub usage_count: u32,
    /// The commit consumed the last remaining use.
    pub exhausted: bool,
    pub redeemed_at: DateTime<Utc>,
}

impl Redemption {
    pub fn events(&self) -> Vec<PromotionEvent> {
        let mut events = vec![PromotionEvent::Redeemed {
            instrument_id: self.instrument_id.clone(),
            user_id: self.user_id.clone(),
            order_id: self.order_id.clone(),
            amount: self.amount,
            usage_count: self.usage_count,
        }];
        if self.exhausted {
            events.push(PromotionEvent::Exhausted { instrument_id: self.instrument_id.clone() });
        }
        events
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RedemptionOutcome {
    pub selection: SelectionResult,
    pub redemptions: Vec<Redemption>,
    /// Instruments dropped after losing a commit race.
    pub lost_races: Vec<InstrumentId>,
}

impl RedemptionOutcome {
    pub fn events(&self) -> Vec<PromotionEvent> {
        self.redemptions.iter().flat_map(Redemption::events).collect()
    }
}

pub async fn commit(
    store: &dyn InstrumentStore,
    instrument_id: &InstrumentId,
    ctx: &CheckoutContext,
    order_id: &str,
    amount: Decimal,
) -> Result<Redemption> {
    match store.commit_redemption(instrument_id, &ctx.user_id, order_id, amount, ctx.now).await {
        Ok(redemption) => {
            tracing::info!(
                instrument_id = %instrument_id,
                user_id = %ctx.user_id,
                order_id,
                amount = %amount,
                usage_count = redemption.usage_count,
                exhausted = redemption.exhausted,
                "Committed redemption"
            );
            Ok(redemption)
        }
        Err(e @ DiscountError::UsageLimitExceeded { .. }) => {
            tracing::warn!(instrument_id = %instrument_id, user_id = %ctx.user_id, order_id, "Lost redemption race");
            Err(e)
        }
        Err(e) => Err(e),
    }
}

/// Resolves and commits the selection for a finalized order. An instrument that
/// loses its commit race is dropped, the candidates are re-read from the store
/// and the selection re-resolved, at most `max_retries` times. Commits that
/// already succeeded are kept; when the budget runs out they are returned in
/// `DiscountError::RedemptionIncomplete`.
pub async fn redeem_with_retry(
    store: &dyn InstrumentStore,
    candidates: &[DiscountInstrument],
    ctx: &CheckoutContext,
    order_id: &str,
    max_retries: u32,
) -> Result<RedemptionOutcome> {
    let offered: HashSet<&InstrumentId> = candidates.iter().map(|i| i.id()).collect();
    let mut excluded: HashSet<InstrumentId> = HashSet::new();
    let mut pool: Vec<DiscountInstrument> = candidates.to_vec();
    let mut redemptions: Vec<Redemption> = vec![];
    let mut lost_races = vec![];
    let mut retries = 0;

    loop {
        let selection = resolve(&pool, ctx);
        let mut lost = None;
        for (id, amount) in selection.commitments() {
            if redemptions.iter().any(|r| r.instrument_id == id) { continue; }
            match commit(store, &id, ctx, order_id, amount).await {
                Ok(redemption) => redemptions.push(redemption),
                Err(DiscountError::UsageLimitExceeded { instrument_id }) => { lost = Some(instrument_id); break; }
                Err(e) => return Err(e),
            }
        }
        let Some(instrument_id) = lost else {
            return Ok(RedemptionOutcome { selection, redemptions, lost_races });
        };
        if retries >= max_retries {
            return Err(if redemptions.is_empty() {
                DiscountError::UsageLimitExceeded { instrument_id }
            } else {
                DiscountError::RedemptionIncomplete { instrument_id, committed: redemptions }
            });
        }
        retries += 1;
        lost_races.push(instrument_id.clone());
        excluded.insert(instrument_id);

        // committed instruments keep their snapshot, everything else is re-read
        let committed: HashSet<InstrumentId> = redemptions.iter().map(|r| r.instrument_id.clone()).collect();
        let fresh = store.candidates(ctx.now).await?;
        pool = pool
            .iter()
            .filter(|i| committed.contains(i.id()))
            .cloned()
            .chain(fresh.into_iter().filter(|i| {
                offered.contains(i.id()) && !excluded.contains(i.id()) && !committed.contains(i.id())
            }))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{DiscountType, InstrumentKind};
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap() }

    fn limited(id: &str, value: i64, limit: u32, used: u32) -> DiscountInstrument {
        DiscountInstrument::builder(InstrumentKind::Coupon, DiscountType::FixedAmount, Decimal::new(value, 0), now() - Duration::days(1), now() + Duration::days(1))
            .id(id).usage_limit(limit).usage_count(used).build().unwrap()
    }

    fn ctx() -> CheckoutContext { CheckoutContext::new(Decimal::new(1000, 0), "u1", "new", now()) }

    #[tokio::test]
    async fn test_commit_consumes_last_use() {
        let store = InMemoryStore::new();
        let coupon = limited("LAST", 100, 2, 1);
        store.insert(coupon.clone()).await.unwrap();

        let redemption = commit(&store, coupon.id(), &ctx(), "order-1", Decimal::new(100, 0)).await.unwrap();
        assert_eq!(redemption.usage_count, 2);
        assert_eq!(redemption.amount, Decimal::new(100, 0));
        assert!(redemption.exhausted);
        assert_eq!(redemption.events().len(), 2);

        let err = commit(&store, coupon.id(), &ctx(), "order-2", Decimal::new(100, 0)).await.unwrap_err();
        assert!(matches!(err, DiscountError::UsageLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_commit_unknown_instrument() {
        let store = InMemoryStore::new();
        let err = commit(&store, &InstrumentId::new("nope"), &ctx(), "order-1", Decimal::ZERO).await.unwrap_err();
        assert!(matches!(err, DiscountError::InstrumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_redeem_falls_back_after_lost_race() {
        let store = InMemoryStore::new();
        // the shopper's snapshot still shows one use left on BIG, the store does not
        let stale_big = limited("BIG", 300, 1, 0);
        store.insert(stale_big.with_usage_count(1)).await.unwrap();
        let small = limited("SMALL", 100, 10, 0);
        store.insert(small.clone()).await.unwrap();

        let outcome = redeem_with_retry(&store, &[stale_big, small], &ctx(), "order-9", 1).await.unwrap();
        assert_eq!(outcome.lost_races, vec![InstrumentId::new("BIG")]);
        assert_eq!(outcome.selection.selected_ids(), vec![InstrumentId::new("SMALL")]);
        assert_eq!(outcome.redemptions.len(), 1);
        assert_eq!(outcome.redemptions[0].amount, Decimal::new(100, 0));
        assert_eq!(outcome.selection.total_discount, Decimal::new(100, 0));
    }

    #[tokio::test]
    async fn test_retry_rereads_store_for_stale_candidates() {
        let store = InMemoryStore::new();
        // the snapshot shows a use left on both BIG and MID; the store has neither
        let big = limited("BIG", 300, 1, 0);
        let mid = limited("MID", 200, 1, 0);
        let small = limited("SMALL", 100, 10, 0);
        store.insert(big.with_usage_count(1)).await.unwrap();
        store.insert(mid.with_usage_count(1)).await.unwrap();
        store.insert(small.clone()).await.unwrap();

        let outcome = redeem_with_retry(&store, &[big, mid, small], &ctx(), "order-4", 1).await.unwrap();
        assert_eq!(outcome.lost_races, vec![InstrumentId::new("BIG")]);
        assert_eq!(outcome.selection.selected_ids(), vec![InstrumentId::new("SMALL")]);
    }

    #[tokio::test]
    async fn test_retry_only_considers_offered_instruments() {
        let store = InMemoryStore::new();
        let big = limited("BIG", 300, 1, 0);
        store.insert(big.with_usage_count(1)).await.unwrap();
        // in the store but never offered to this checkout
        store.insert(limited("CODED", 250, 10, 0)).await.unwrap();

        let outcome = redeem_with_retry(&store, &[big], &ctx(), "order-5", 1).await.unwrap();
        assert!(outcome.selection.is_empty());
        assert!(outcome.redemptions.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_budget_returns_committed_receipts() {
        let store = InMemoryStore::new();
        let stack = |id: &str, value: i64| {
            DiscountInstrument::builder(InstrumentKind::Coupon, DiscountType::FixedAmount, Decimal::new(value, 0), now() - Duration::days(1), now() + Duration::days(1))
                .id(id).usage_limit(1).stackable(true).build().unwrap()
        };
        let (a, b, c) = (stack("A", 500), stack("B", 300), stack("C", 200));
        store.insert(a.clone()).await.unwrap();
        store.insert(b.with_usage_count(1)).await.unwrap();
        store.insert(c.with_usage_count(1)).await.unwrap();

        let err = redeem_with_retry(&store, &[a, b, c], &ctx(), "order-6", 0).await.unwrap_err();
        match err {
            DiscountError::RedemptionIncomplete { instrument_id, committed } => {
                assert_eq!(instrument_id.as_str(), "B");
                assert_eq!(committed.len(), 1);
                assert_eq!(committed[0].instrument_id.as_str(), "A");
                assert_eq!(committed[0].amount, Decimal::new(500, 0));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.get(&InstrumentId::new("A")).await.unwrap().unwrap().usage_count(), 1);
    }

    #[tokio::test]
    async fn test_lost_race_without_commits_is_usage_limit() {
        let store = InMemoryStore::new();
        let a = limited("A", 300, 1, 0);
        store.insert(a.with_usage_count(1)).await.unwrap();

        let err = redeem_with_retry(&store, &[a], &ctx(), "order-7", 0).await.unwrap_err();
        assert!(matches!(err, DiscountError::UsageLimitExceeded { instrument_id } if instrument_id.as_str() == "A"));
    }
}
