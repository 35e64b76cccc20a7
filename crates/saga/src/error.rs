//! Saga error types.

use common::{OrderId, SagaId};
use domain::OrderError;
use ledger::{InvalidTransition, LedgerError};
use thiserror::Error;

/// Errors that can occur during saga operations.
///
/// Step failures never surface here: they are recorded on the saga and end
/// in compensation. These are the failures that stop a saga from starting
/// at all, or that prevent reading it back.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Order is not in the expected state for saga execution.
    #[error("Order not ready: {0}")]
    OrderNotReady(String),

    /// Another saga for the order has not finished yet.
    #[error("Saga {saga_id} is still active for order {order_id}")]
    SagaAlreadyActive { order_id: OrderId, saga_id: SagaId },

    /// The latest saga for the order ended `Failed` and waits for an operator.
    #[error("Saga {saga_id} for order {order_id} failed and needs operator attention")]
    SagaNeedsAttention { order_id: OrderId, saga_id: SagaId },

    /// Saga status change refused by the state machine.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Ledger error.
    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    /// Order error.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<LedgerError> for SagaError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::SagaActive { order_id, saga_id } => {
                SagaError::SagaAlreadyActive { order_id, saga_id }
            }
            other => SagaError::Ledger(other),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

/// Transport-level failure talking to a remote service.
///
/// Explicit rejections are not errors; they come back as an unsuccessful
/// [`StepReply`](crate::StepReply).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::SagaStatus;

    #[test]
    fn test_adapter_error_messages() {
        assert_eq!(
            AdapterError::Unavailable("payment service".into()).to_string(),
            "payment service unavailable"
        );
        assert_eq!(
            AdapterError::Timeout("shipping service".into()).to_string(),
            "shipping service timed out"
        );
    }

    #[test]
    fn test_active_saga_conflict_maps_to_already_active() {
        let order_id = OrderId::new();
        let saga_id = SagaId::new();
        let err = SagaError::from(LedgerError::SagaActive { order_id, saga_id });
        assert!(matches!(
            err,
            SagaError::SagaAlreadyActive { order_id: o, saga_id: s } if o == order_id && s == saga_id
        ));

        let err = SagaError::from(LedgerError::Unavailable("down".into()));
        assert!(matches!(err, SagaError::Ledger(LedgerError::Unavailable(_))));
    }

    #[test]
    fn test_transition_error_is_transparent() {
        let err = SagaError::from(InvalidTransition {
            from: SagaStatus::Completed,
            to: SagaStatus::Compensating,
        });
        assert_eq!(
            err.to_string(),
            "Invalid saga transition from Completed to Compensating"
        );
    }
}
