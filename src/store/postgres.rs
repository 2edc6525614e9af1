//! Postgres instrument store
//!
//! `commit_redemption` is one conditional `UPDATE ... RETURNING` plus the
//! redemption insert, inside a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json, PgPool};
use std::collections::HashMap;

use crate::domain::aggregates::{Campaign, DiscountInstrument};
use crate::domain::value_objects::{CouponCode, InstrumentId};
use crate::engine::Redemption;
use crate::store::InstrumentStore;
use crate::{DiscountError, Result};

#[derive(Clone)]
pub struct PgInstrumentStore { pool: PgPool }

impl PgInstrumentStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
    pub fn pool(&self) -> &PgPool { &self.pool }
}

#[derive(Debug, sqlx::FromRow)]
struct InstrumentRow {
    id: String, kind: String, code: Option<String>, name: String, discount_type: String,
    value: Decimal, min_order_amount: Decimal, max_discount_amount: Option<Decimal>,
    valid_from: DateTime<Utc>, valid_until: DateTime<Utc>,
    usage_limit: Option<i32>, usage_count: i32, per_user_limit: Option<i32>,
    target_user_groups: Vec<String>, target_categories: Vec<String>, excluded_products: Vec<String>,
    assigned_user: Option<String>, is_active: bool, stackable: bool,
}

fn to_count(column: &str, value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| DiscountError::Storage(format!("negative {column}: {value}")))
}

impl TryFrom<InstrumentRow> for DiscountInstrument {
    type Error = DiscountError;

    fn try_from(r: InstrumentRow) -> Result<Self> {
        let mut builder = DiscountInstrument::builder(r.kind.parse()?, r.discount_type.parse()?, r.value, r.valid_from, r.valid_until)
            .id(r.id)
            .name(r.name)
            .min_order_amount(r.min_order_amount)
            .usage_count(to_count("usage_count", r.usage_count)?)
            .target_user_groups(r.target_user_groups)
            .target_categories(r.target_categories)
            .excluded_products(r.excluded_products)
            .active(r.is_active)
            .stackable(r.stackable);
        if let Some(code) = r.code { builder = builder.code(code); }
        if let Some(cap) = r.max_discount_amount { builder = builder.max_discount_amount(cap); }
        if let Some(limit) = r.usage_limit { builder = builder.usage_limit(to_count("usage_limit", limit)?); }
        if let Some(limit) = r.per_user_limit { builder = builder.per_user_limit(to_count("per_user_limit", limit)?); }
        if let Some(user) = r.assigned_user { builder = builder.assigned_user(user); }
        builder.build()
    }
}

const SELECT_INSTRUMENT: &str = "SELECT id, kind, code, name, discount_type, value, min_order_amount, max_discount_amount, valid_from, valid_until, usage_limit, usage_count, per_user_limit, target_user_groups, target_categories, excluded_products, assigned_user, is_active, stackable FROM discount_instruments";

fn to_i32(value: Option<u32>) -> Option<i32> { value.map(|v| i32::try_from(v).unwrap_or(i32::MAX)) }

#[async_trait]
impl InstrumentStore for PgInstrumentStore {
    async fn insert(&self, i: DiscountInstrument) -> Result<()> {
        sqlx::query("INSERT INTO discount_instruments (id, kind, code, name, discount_type, value, min_order_amount, max_discount_amount, valid_from, valid_until, usage_limit, usage_count, per_user_limit, target_user_groups, target_categories, excluded_products, assigned_user, is_active, stackable, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, NOW(), NOW()) ON CONFLICT (id) DO UPDATE SET kind = EXCLUDED.kind, code = EXCLUDED.code, name = EXCLUDED.name, discount_type = EXCLUDED.discount_type, value = EXCLUDED.value, min_order_amount = EXCLUDED.min_order_amount, max_discount_amount = EXCLUDED.max_discount_amount, valid_from = EXCLUDED.valid_from, valid_until = EXCLUDED.valid_until, usage_limit = EXCLUDED.usage_limit, per_user_limit = EXCLUDED.per_user_limit, target_user_groups = EXCLUDED.target_user_groups, target_categories = EXCLUDED.target_categories, excluded_products = EXCLUDED.excluded_products, assigned_user = EXCLUDED.assigned_user, is_active = EXCLUDED.is_active, stackable = EXCLUDED.stackable, updated_at = NOW()")
            .bind(i.id().as_str()).bind(i.kind().as_str()).bind(i.code().map(|c| c.as_str())).bind(i.name())
            .bind(i.discount_type().as_str()).bind(i.value()).bind(i.min_order_amount()).bind(i.max_discount_amount())
            .bind(i.valid_from()).bind(i.valid_until()).bind(to_i32(i.usage_limit())).bind(to_i32(Some(i.usage_count())))
            .bind(to_i32(i.per_user_limit()))
            .bind(i.target_user_groups().iter().cloned().collect::<Vec<_>>())
            .bind(i.target_categories().iter().cloned().collect::<Vec<_>>())
            .bind(i.excluded_products().iter().cloned().collect::<Vec<_>>())
            .bind(i.assigned_user()).bind(i.is_active()).bind(i.is_stackable())
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, id: &InstrumentId) -> Result<Option<DiscountInstrument>> {
        let row = sqlx::query_as::<_, InstrumentRow>(&format!("{SELECT_INSTRUMENT} WHERE id = $1"))
            .bind(id.as_str()).fetch_optional(&self.pool).await?;
        row.map(DiscountInstrument::try_from).transpose()
    }

    async fn find_by_code(&self, code: &CouponCode) -> Result<Option<DiscountInstrument>> {
        let row = sqlx::query_as::<_, InstrumentRow>(&format!("{SELECT_INSTRUMENT} WHERE code = $1"))
            .bind(code.as_str()).fetch_optional(&self.pool).await?;
        row.map(DiscountInstrument::try_from).transpose()
    }

    async fn candidates(&self, now: DateTime<Utc>) -> Result<Vec<DiscountInstrument>> {
        let rows = sqlx::query_as::<_, InstrumentRow>(&format!("{SELECT_INSTRUMENT} WHERE is_active AND valid_from <= $1 AND valid_until >= $1 AND (usage_limit IS NULL OR usage_count < usage_limit) ORDER BY valid_until, id"))
            .bind(now).fetch_all(&self.pool).await?;
        rows.into_iter().map(DiscountInstrument::try_from).collect()
    }

    async fn prior_redemptions(&self, user_id: &str) -> Result<HashMap<InstrumentId, u32>> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT instrument_id, COUNT(*) FROM discount_redemptions WHERE user_id = $1 GROUP BY instrument_id")
            .bind(user_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id, count)| (InstrumentId::new(id), u32::try_from(count).unwrap_or(u32::MAX))).collect())
    }

    async fn commit_redemption(&self, id: &InstrumentId, user_id: &str, order_id: &str, amount: Decimal, now: DateTime<Utc>) -> Result<Redemption> {
        let mut tx = self.pool.begin().await?;
        let updated: Option<(i32, Option<i32>)> = sqlx::query_as("UPDATE discount_instruments SET usage_count = usage_count + 1, updated_at = NOW() WHERE id = $1 AND (usage_limit IS NULL OR usage_count < usage_limit) RETURNING usage_count, usage_limit")
            .bind(id.as_str()).fetch_optional(&mut *tx).await?;
        let Some((usage_count, usage_limit)) = updated else {
            let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM discount_instruments WHERE id = $1")
                .bind(id.as_str()).fetch_optional(&mut *tx).await?;
            tx.rollback().await?;
            return Err(match exists {
                Some(_) => DiscountError::UsageLimitExceeded { instrument_id: id.clone() },
                None => DiscountError::InstrumentNotFound(id.clone()),
            });
        };
        sqlx::query("INSERT INTO discount_redemptions (id, instrument_id, user_id, order_id, amount, redeemed_at) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(uuid::Uuid::now_v7()).bind(id.as_str()).bind(user_id).bind(order_id).bind(amount).bind(now)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(Redemption {
            instrument_id: id.clone(),
            user_id: user_id.to_string(),
            order_id: order_id.to_string(),
            amount,
            usage_count: to_count("usage_count", usage_count)?,
            exhausted: usage_limit == Some(usage_count),
            redeemed_at: now,
        })
    }

    async fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query("INSERT INTO campaigns (id, status, body, updated_at) VALUES ($1, $2, $3, NOW()) ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, body = EXCLUDED.body, updated_at = NOW()")
            .bind(campaign.id()).bind(campaign.status().as_str())
            .bind(Json(campaign)).execute(&self.pool).await?;
        Ok(())
    }

    async fn campaign(&self, id: &str) -> Result<Option<Campaign>> {
        let row: Option<(Json<Campaign>,)> = sqlx::query_as("SELECT body FROM campaigns WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(campaign),)| campaign))
    }
}
