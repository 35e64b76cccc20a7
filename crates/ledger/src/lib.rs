//! Saga ledger for the purchase saga system.
//!
//! Records every saga and every step call durably, and stores the orders the
//! sagas act on. Two backends share the same traits:
//! - `InMemoryLedger` for tests and local runs
//! - `PostgresLedger` backed by sqlx

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod status;
pub mod store;

pub use error::{InvalidTransition, LedgerError, Result};
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use record::{SagaState, SagaStep};
pub use status::{Handle, SagaStatus, StepName, StepStatus};
pub use store::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, OrderPage, OrderQuery, OrderRepository, SagaLedger,
};
