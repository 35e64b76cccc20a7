//! Purchase saga orchestration.
//!
//! The purchase saga runs these steps for a placed order:
//! 1. Reserve stock for every order line (critical)
//! 2. Process the payment (critical)
//! 3. Confirm the reservation (critical)
//! 4. Send the confirmation e-mail
//! 5. Create the shipment
//!
//! If a critical step fails, completed work is compensated in reverse order
//! and the order is cancelled. Every step is recorded in a
//! [`SagaLedger`](ledger::SagaLedger) before its service is called.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod steps;

pub use config::SagaConfig;
pub use error::{AdapterError, SagaError};
pub use orchestrator::SagaOrchestrator;
pub use services::{
    CancelShipmentRequest, CreateShipmentRequest, InMemoryInventoryService,
    InMemoryNotificationService, InMemoryPaymentService, InMemoryShippingService,
    InventoryService, NotificationService, PaymentService, ProcessPaymentRequest,
    RefundPaymentRequest, ReserveStockRequest, SendNotificationRequest, ShippingService,
    StepReply,
};
pub use steps::{Criticality, ForwardStep};
