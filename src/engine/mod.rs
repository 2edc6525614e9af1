//! Discount resolution engine
//!
//! `is_valid`, `compute_discount` and `resolve` are pure: identical inputs give
//! identical outputs on any thread. `commit` is the only stateful step and it
//! goes through an [`InstrumentStore`](crate::store::InstrumentStore).

pub mod calculation;
pub mod resolution;
pub mod usage;
pub mod validity;

pub use calculation::{compute_discount, DiscountOutcome};
pub use resolution::{resolve, AppliedInstrument, SelectionMode, SelectionResult};
pub use usage::{commit, redeem_with_retry, Redemption, RedemptionOutcome};
pub use validity::{diagnose, is_valid, Ineligibility};
