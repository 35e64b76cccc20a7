//! Shared identifier types used across the purchase saga crates.

mod types;

pub use types::{OrderId, SagaId, StepId, UserId};
