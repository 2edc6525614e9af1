//! HTTP surface for the storefront and admin back-office.

use axum::{extract::{Path, State}, http::StatusCode, routing::{get, post}, Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::domain::aggregates::{Campaign, CampaignDiscount, CampaignRules, CartLine, CheckoutContext, DiscountInstrument, DiscountType, InstrumentKind};
use crate::domain::events::PromotionEvent;
use crate::domain::value_objects::{CouponCode, InstrumentId};
use crate::engine::{compute_discount, diagnose, redeem_with_retry, resolve, Ineligibility, Redemption, RedemptionOutcome, SelectionResult};
use crate::store::InstrumentStore;
use crate::DiscountError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InstrumentStore>,
    pub nats: Option<async_nats::Client>,
    pub commit_max_retries: u32,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-promotions"})) }))
        .route("/api/v1/discounts/resolve", post(resolve_discounts))
        .route("/api/v1/discounts/redeem", post(redeem_discounts))
        .route("/api/v1/coupons/validate", post(validate_coupon))
        .route("/api/v1/coupons/available", get(available_coupons))
        .route("/api/v1/instruments", post(create_instrument))
        .route("/api/v1/spin-rewards", post(issue_spin_reward))
        .route("/api/v1/campaigns", post(create_campaign))
        .route("/api/v1/campaigns/:id", get(get_campaign))
        .route("/api/v1/campaigns/:id/schedule", post(schedule_campaign))
        .route("/api/v1/campaigns/:id/activate", post(activate_campaign))
        .route("/api/v1/campaigns/:id/pause", post(pause_campaign))
        .route("/api/v1/campaigns/:id/complete", post(complete_campaign))
        .with_state(state)
}

fn to_http(e: DiscountError) -> (StatusCode, String) {
    let status = match &e {
        DiscountError::InvalidInstrumentConfig(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DiscountError::UsageLimitExceeded { .. }
        | DiscountError::RedemptionIncomplete { .. }
        | DiscountError::InvalidCampaignTransition { .. }
        | DiscountError::CampaignClosed(_) => StatusCode::CONFLICT,
        DiscountError::NoApplicableInstrument => StatusCode::UNPROCESSABLE_ENTITY,
        DiscountError::InstrumentNotFound(_) | DiscountError::CampaignNotFound(_) => StatusCode::NOT_FOUND,
        DiscountError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR { tracing::error!(error = %e, "Request failed"); }
    (status, e.to_string())
}

fn check(req: &impl Validate) -> ApiResult<()> {
    req.validate().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

async fn publish(state: &AppState, events: Vec<PromotionEvent>) {
    let Some(nats) = &state.nats else { return };
    for event in events {
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => { tracing::warn!(error = %e, "Failed to encode event"); continue; }
        };
        if let Err(e) = nats.publish(event.subject().to_string(), payload.into()).await {
            tracing::warn!(error = %e, subject = event.subject(), "Failed to publish event");
        }
    }
}

// =============================================================================
// Checkout
// =============================================================================

fn default_segment() -> String { "guest".to_string() }

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[serde(default = "default_segment")]
    pub user_segment: String,
    #[serde(default)]
    pub lines: Vec<CartLine>,
    /// Overrides the sum of `lines` when the caller prices the cart itself.
    pub subtotal: Option<Decimal>,
    /// Codes the shopper entered; coded instruments never apply without one.
    #[serde(default)]
    pub codes: Vec<String>,
}

impl CheckoutRequest {
    async fn context(&self, state: &AppState, now: DateTime<Utc>) -> ApiResult<CheckoutContext> {
        if self.lines.iter().any(|l| l.amount < Decimal::ZERO) || matches!(self.subtotal, Some(s) if s < Decimal::ZERO) {
            return Err((StatusCode::BAD_REQUEST, "Amounts must not be negative".to_string()));
        }
        let mut ctx = CheckoutContext::from_lines(self.lines.clone(), &self.user_id, &self.user_segment, now);
        if let Some(subtotal) = self.subtotal { ctx.subtotal = subtotal; }
        let prior = state.store.prior_redemptions(&self.user_id).await.map_err(to_http)?;
        Ok(ctx.with_prior_redemptions(prior))
    }

    async fn candidates(&self, state: &AppState, now: DateTime<Utc>) -> ApiResult<Vec<DiscountInstrument>> {
        let codes: Vec<CouponCode> = self.codes.iter().filter_map(|c| CouponCode::new(c.as_str()).ok()).collect();
        let all = state.store.candidates(now).await.map_err(to_http)?;
        Ok(all.into_iter().filter(|i| i.code().map_or(true, |code| codes.contains(code))).collect())
    }
}

async fn resolve_discounts(State(s): State<AppState>, Json(r): Json<CheckoutRequest>) -> ApiResult<Json<SelectionResult>> {
    check(&r)?;
    let now = Utc::now();
    let ctx = r.context(&s, now).await?;
    let candidates = r.candidates(&s, now).await?;
    Ok(Json(resolve(&candidates, &ctx)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RedeemRequest {
    #[validate(length(min = 1, max = 128))]
    pub order_id: String,
    #[serde(flatten)]
    #[validate]
    pub checkout: CheckoutRequest,
}

async fn redeem_discounts(State(s): State<AppState>, Json(r): Json<RedeemRequest>) -> ApiResult<Json<RedemptionOutcome>> {
    check(&r)?;
    let now = Utc::now();
    let ctx = r.checkout.context(&s, now).await?;
    let candidates = r.checkout.candidates(&s, now).await?;
    let rejected = |id: &InstrumentId| PromotionEvent::RedemptionRejected { instrument_id: id.clone(), user_id: ctx.user_id.clone() };
    match redeem_with_retry(s.store.as_ref(), &candidates, &ctx, &r.order_id, s.commit_max_retries).await {
        Ok(outcome) => {
            publish(&s, outcome.events().into_iter().chain(outcome.lost_races.iter().map(rejected)).collect()).await;
            Ok(Json(outcome))
        }
        Err(DiscountError::RedemptionIncomplete { instrument_id, committed }) => {
            // committed uses stay consumed
            let mut events: Vec<PromotionEvent> = committed.iter().flat_map(Redemption::events).collect();
            events.push(rejected(&instrument_id));
            publish(&s, events).await;
            let body = serde_json::json!({
                "error": format!("Usage limit exceeded for instrument {instrument_id}"),
                "lost_instrument": instrument_id,
                "committed": committed,
            });
            Err((StatusCode::CONFLICT, body.to_string()))
        }
        Err(DiscountError::UsageLimitExceeded { instrument_id }) => {
            publish(&s, vec![rejected(&instrument_id)]).await;
            Err(to_http(DiscountError::UsageLimitExceeded { instrument_id }))
        }
        Err(e) => Err(to_http(e)),
    }
}

// =============================================================================
// Coupons
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[serde(flatten)]
    #[validate]
    pub checkout: CheckoutRequest,
}

#[derive(Debug, Serialize)]
pub struct CouponValidation {
    pub valid: bool,
    pub message: String,
    pub discount_amount: Decimal,
    pub waive_shipping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<DiscountInstrument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Ineligibility>,
}

impl CouponValidation {
    fn rejected(message: impl Into<String>, reason: Option<Ineligibility>) -> Self {
        Self { valid: false, message: message.into(), discount_amount: Decimal::ZERO, waive_shipping: false, coupon: None, reason }
    }
}

fn applied_message(coupon: &DiscountInstrument) -> String {
    match coupon.discount_type() {
        DiscountType::Percentage => format!("Coupon applied! {}% off", coupon.value().normalize()),
        DiscountType::FixedAmount => format!("Coupon applied! {} off", coupon.value().normalize()),
        DiscountType::FreeShipping => "Coupon applied! Free shipping".to_string(),
        DiscountType::BuyOneGetOne => "Coupon applied! Buy one, get one free".to_string(),
    }
}

async fn validate_coupon(State(s): State<AppState>, Json(r): Json<ValidateCouponRequest>) -> ApiResult<Json<CouponValidation>> {
    check(&r)?;
    let Ok(code) = CouponCode::new(r.code.as_str()) else {
        return Ok(Json(CouponValidation::rejected("Invalid coupon code", None)));
    };
    let Some(coupon) = s.store.find_by_code(&code).await.map_err(to_http)? else {
        return Ok(Json(CouponValidation::rejected("Invalid coupon code", None)));
    };
    let ctx = r.checkout.context(&s, Utc::now()).await?;
    if let Some(reason) = diagnose(&coupon, &ctx) {
        return Ok(Json(CouponValidation::rejected(reason.user_message(), Some(reason))));
    }
    let outcome = compute_discount(&coupon, &ctx);
    Ok(Json(CouponValidation {
        valid: true,
        message: applied_message(&coupon),
        discount_amount: outcome.amount,
        waive_shipping: outcome.waive_shipping,
        coupon: Some(coupon),
        reason: None,
    }))
}

async fn available_coupons(State(s): State<AppState>) -> ApiResult<Json<Vec<DiscountInstrument>>> {
    let coupons = s.store.candidates(Utc::now()).await.map_err(to_http)?;
    // personal spin rewards are not advertised
    Ok(Json(coupons.into_iter().filter(|i| i.code().is_some() && i.assigned_user().is_none()).collect()))
}

// =============================================================================
// Instruments
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInstrumentRequest {
    pub id: Option<String>,
    pub kind: InstrumentKind,
    pub code: Option<String>,
    #[serde(default)]
    pub name: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    #[serde(default)]
    pub min_order_amount: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage_limit: Option<u32>,
    pub per_user_limit: Option<u32>,
    #[serde(default)]
    pub target_user_groups: Vec<String>,
    #[serde(default)]
    pub target_categories: Vec<String>,
    #[serde(default)]
    pub excluded_products: Vec<String>,
    pub assigned_user: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub stackable: bool,
}

fn default_true() -> bool { true }

impl CreateInstrumentRequest {
    fn build(self) -> crate::Result<DiscountInstrument> {
        let mut b = DiscountInstrument::builder(self.kind, self.discount_type, self.value, self.valid_from, self.valid_until)
            .name(self.name)
            .min_order_amount(self.min_order_amount)
            .target_user_groups(self.target_user_groups)
            .target_categories(self.target_categories)
            .excluded_products(self.excluded_products)
            .active(self.is_active)
            .stackable(self.stackable);
        if let Some(id) = self.id { b = b.id(id); }
        if let Some(code) = self.code { b = b.code(code); }
        if let Some(cap) = self.max_discount_amount { b = b.max_discount_amount(cap); }
        if let Some(limit) = self.usage_limit { b = b.usage_limit(limit); }
        if let Some(limit) = self.per_user_limit { b = b.per_user_limit(limit); }
        if let Some(user) = self.assigned_user { b = b.assigned_user(user); }
        b.build()
    }
}

async fn create_instrument(State(s): State<AppState>, Json(r): Json<CreateInstrumentRequest>) -> ApiResult<(StatusCode, Json<DiscountInstrument>)> {
    check(&r)?;
    let instrument = r.build().map_err(to_http)?;
    s.store.insert(instrument.clone()).await.map_err(to_http)?;
    tracing::info!(instrument_id = %instrument.id(), kind = instrument.kind().as_str(), "Created instrument");
    Ok((StatusCode::CREATED, Json(instrument)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SpinRewardRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    pub percent: Decimal,
}

async fn issue_spin_reward(State(s): State<AppState>, Json(r): Json<SpinRewardRequest>) -> ApiResult<(StatusCode, Json<DiscountInstrument>)> {
    check(&r)?;
    let coupon = DiscountInstrument::spin_reward(&r.user_id, r.percent, Utc::now()).map_err(to_http)?;
    s.store.insert(coupon.clone()).await.map_err(to_http)?;
    tracing::info!(instrument_id = %coupon.id(), user_id = %r.user_id, "Issued spin reward");
    Ok((StatusCode::CREATED, Json(coupon)))
}

// =============================================================================
// Campaigns
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCampaignRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub rules: CampaignRules,
    #[serde(default)]
    pub discounts: Vec<CampaignDiscount>,
}

fn default_priority() -> u8 { 1 }

async fn create_campaign(State(s): State<AppState>, Json(r): Json<CreateCampaignRequest>) -> ApiResult<(StatusCode, Json<Campaign>)> {
    check(&r)?;
    let mut campaign = Campaign::create(r.name, r.starts_at, r.ends_at, r.priority, r.rules).map_err(to_http)?;
    for discount in r.discounts {
        campaign.add_discount(discount).map_err(to_http)?;
    }
    s.store.save_campaign(&campaign).await.map_err(to_http)?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

async fn load_campaign(s: &AppState, id: &str) -> ApiResult<Campaign> {
    s.store.campaign(id).await.map_err(to_http)?.ok_or_else(|| to_http(DiscountError::CampaignNotFound(id.to_string())))
}

async fn get_campaign(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Campaign>> {
    Ok(Json(load_campaign(&s, &id).await?))
}

/// Applies a status change and mirrors it onto the campaign's instruments.
async fn transition_campaign(s: &AppState, id: &str, apply: fn(&mut Campaign) -> crate::Result<()>) -> ApiResult<Json<Campaign>> {
    let mut campaign = load_campaign(s, id).await?;
    apply(&mut campaign).map_err(to_http)?;
    for instrument in campaign.instruments().map_err(to_http)? {
        s.store.insert(instrument).await.map_err(to_http)?;
    }
    s.store.save_campaign(&campaign).await.map_err(to_http)?;
    tracing::info!(campaign_id = %id, status = campaign.status().as_str(), "Campaign status changed");
    publish(s, campaign.take_events()).await;
    Ok(Json(campaign))
}

async fn schedule_campaign(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Campaign>> {
    transition_campaign(&s, &id, Campaign::schedule).await
}

async fn activate_campaign(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Campaign>> {
    transition_campaign(&s, &id, Campaign::activate).await
}

async fn pause_campaign(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Campaign>> {
    transition_campaign(&s, &id, Campaign::pause).await
}

async fn complete_campaign(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Campaign>> {
    transition_campaign(&s, &id, Campaign::complete).await
}
