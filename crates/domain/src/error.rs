//! Domain error types.

use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur outside a single order's rules.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the order entity.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// The event publisher could not accept an event.
    #[error("Publish failed for {event_type}: {reason}")]
    Publish {
        event_type: &'static str,
        reason: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
