//! Domain events
use crate::domain::aggregates::CampaignStatus;
use crate::domain::value_objects::InstrumentId;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromotionEvent {
    Redeemed { instrument_id: InstrumentId, user_id: String, order_id: String, amount: Decimal, usage_count: u32 },
    Exhausted { instrument_id: InstrumentId },
    RedemptionRejected { instrument_id: InstrumentId, user_id: String },
    CampaignStatusChanged { campaign_id: String, from: CampaignStatus, to: CampaignStatus },
}

impl PromotionEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Redeemed { .. } => "promotions.redeemed",
            Self::Exhausted { .. } => "promotions.exhausted",
            Self::RedemptionRejected { .. } => "promotions.redemption_rejected",
            Self::CampaignStatusChanged { .. } => "promotions.campaign_status_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PromotionEvent::Exhausted { instrument_id: InstrumentId::new("c1") };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"exhausted","instrument_id":"c1"}"#);
        assert_eq!(event.subject(), "promotions.exhausted");
    }
}
