//! Aggregates module
pub mod instrument;
pub mod checkout;
pub mod campaign;

pub use instrument::{DiscountInstrument, DiscountType, InstrumentBuilder, InstrumentKind, ALL_USERS};
pub use checkout::{CartLine, CheckoutContext};
pub use campaign::{Campaign, CampaignDiscount, CampaignRules, CampaignStatus};
