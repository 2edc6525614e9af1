use chrono::{DateTime, Duration, TimeZone, Utc};
use opensase_promotions::{
    redeem_with_retry, CheckoutContext, DiscountError, DiscountInstrument, DiscountType, InMemoryStore, InstrumentId,
    InstrumentKind, InstrumentStore,
};
use rust_decimal::Decimal;
use std::sync::Arc;

fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 11, 27, 8, 0, 0).unwrap() }

fn single_use(id: &str, value: i64, stackable: bool) -> DiscountInstrument {
    DiscountInstrument::builder(InstrumentKind::Coupon, DiscountType::FixedAmount, Decimal::new(value, 0), now() - Duration::days(1), now() + Duration::days(1))
        .id(id)
        .usage_limit(1)
        .stackable(stackable)
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_use_is_sold_once() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(single_use("LAST1", 500, false)).await.unwrap();
    let id = InstrumentId::new("LAST1");

    let mut handles = vec![];
    for n in 0..16 {
        let store = store.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            store.commit_redemption(&id, &format!("user-{n}"), &format!("order-{n}"), Decimal::new(500, 0), now()).await
        }));
    }

    let mut won = 0;
    let mut lost = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(redemption) => { won += 1; assert!(redemption.exhausted); }
            Err(DiscountError::UsageLimitExceeded { instrument_id }) => { lost += 1; assert_eq!(instrument_id, id); }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(lost, 15);
    assert_eq!(store.get(&id).await.unwrap().unwrap().usage_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounded_limit_never_oversold() {
    let store = Arc::new(InMemoryStore::new());
    let coupon = DiscountInstrument::builder(InstrumentKind::Coupon, DiscountType::Percentage, Decimal::new(10, 0), now() - Duration::days(1), now() + Duration::days(1))
        .id("BLACKFRIDAY").code("BLACKFRIDAY").usage_limit(25).build().unwrap();
    store.insert(coupon).await.unwrap();

    let handles: Vec<_> = (0..100)
        .map(|n| {
            let store = store.clone();
            tokio::spawn(async move {
                store.commit_redemption(&InstrumentId::new("BLACKFRIDAY"), &format!("user-{n}"), &format!("order-{n}"), Decimal::ONE, now()).await.is_ok()
            })
        })
        .collect();

    let mut won = 0;
    for handle in handles {
        if handle.await.unwrap() { won += 1; }
    }
    assert_eq!(won, 25);
    let stored = store.get(&InstrumentId::new("BLACKFRIDAY")).await.unwrap().unwrap();
    assert_eq!(stored.usage_count(), 25);
    assert!(stored.is_exhausted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_racing_checkouts_fall_back_to_next_best() {
    let store = Arc::new(InMemoryStore::new());
    let flash = single_use("FLASH", 800, false);
    let backup = DiscountInstrument::builder(InstrumentKind::SpecialOffer, DiscountType::FixedAmount, Decimal::new(300, 0), now() - Duration::days(1), now() + Duration::days(7))
        .id("BACKUP").build().unwrap();
    store.insert(flash.clone()).await.unwrap();
    store.insert(backup.clone()).await.unwrap();

    // both shoppers resolved against the same snapshot
    let candidates = vec![flash, backup];
    let handles: Vec<_> = (0..2)
        .map(|n| {
            let store = store.clone();
            let candidates = candidates.clone();
            tokio::spawn(async move {
                let ctx = CheckoutContext::new(Decimal::new(4000, 0), format!("user-{n}"), "new", now());
                redeem_with_retry(store.as_ref(), &candidates, &ctx, &format!("order-{n}"), 1).await
            })
        })
        .collect();

    let mut totals = vec![];
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        totals.push(outcome.selection.total_discount);
    }
    totals.sort();
    assert_eq!(totals, vec![Decimal::new(300, 0), Decimal::new(800, 0)]);
    assert_eq!(store.get(&InstrumentId::new("FLASH")).await.unwrap().unwrap().usage_count(), 1);
    assert_eq!(store.get(&InstrumentId::new("BACKUP")).await.unwrap().unwrap().usage_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reinsert_during_commits_keeps_every_use() {
    let store = Arc::new(InMemoryStore::new());
    let limited = |days: i64| {
        DiscountInstrument::builder(InstrumentKind::EventDiscount, DiscountType::Percentage, Decimal::new(15, 0), now() - Duration::days(1), now() + Duration::days(days))
            .id("SALE:pct").usage_limit(5_000).build().unwrap()
    };
    store.insert(limited(7)).await.unwrap();
    let id = InstrumentId::new("SALE:pct");

    let mut committers = vec![];
    for worker in 0..8 {
        let store = store.clone();
        let id = id.clone();
        committers.push(tokio::spawn(async move {
            let mut won = 0u32;
            for n in 0..500 {
                let order = format!("order-{worker}-{n}");
                if store.commit_redemption(&id, "shopper", &order, Decimal::ONE, now()).await.is_ok() { won += 1; }
                tokio::task::yield_now().await;
            }
            won
        }));
    }
    // campaign transitions re-insert the same instrument while shoppers redeem
    let replacer = {
        let store = store.clone();
        tokio::spawn(async move {
            for n in 0..500 {
                store.insert(limited(7 + n % 3)).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut won = 0;
    for handle in committers {
        won += handle.await.unwrap();
    }
    replacer.await.unwrap();

    assert_eq!(won, 4_000);
    assert_eq!(store.get(&id).await.unwrap().unwrap().usage_count(), won);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reinsert_cannot_oversell_last_use() {
    for round in 0..50 {
        let store = Arc::new(InMemoryStore::new());
        let id = format!("LAST-{round}");
        store.insert(single_use(&id, 500, false)).await.unwrap();
        let id = InstrumentId::new(id);

        let commits: Vec<_> = (0..4)
            .map(|n| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.commit_redemption(&id, &format!("user-{n}"), &format!("order-{n}"), Decimal::ONE, now()).await.is_ok() })
            })
            .collect();
        let replacer = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { store.insert(single_use(id.as_str(), 500, false)).await.unwrap() })
        };

        let mut won = 0;
        for handle in commits {
            if handle.await.unwrap() { won += 1; }
        }
        replacer.await.unwrap();
        assert_eq!(won, 1);
        assert_eq!(store.get(&id).await.unwrap().unwrap().usage_count(), 1);
    }
}
