use common::{OrderId, SagaId, StepId};
use thiserror::Error;

use crate::SagaStatus;

/// Errors that can occur when reading or writing the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    #[error("Saga step not found: {0}")]
    StepNotFound(StepId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The saga already reached a terminal status and accepts no more writes.
    #[error("Saga {saga_id} is already {status}")]
    SagaTerminal { saga_id: SagaId, status: SagaStatus },

    /// The order already has a saga that has not reached a terminal status.
    #[error("Order {order_id} already has active saga {saga_id}")]
    SagaActive { order_id: OrderId, saga_id: SagaId },

    /// A stored or supplied value does not fit the model.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The backing store refused the write.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// A saga status change that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid saga transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: SagaStatus,
    pub to: SagaStatus,
}
