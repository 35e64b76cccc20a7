//! Remote service contracts for saga steps and in-memory implementations.
//!
//! Every call answers with a [`StepReply`]: an explicit rejection comes back
//! as `success == false`, while transport problems surface as
//! [`AdapterError`](crate::AdapterError).

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

pub mod inventory;
pub mod notification;
pub mod payment;
pub mod shipping;

pub use inventory::{InMemoryInventoryService, InventoryService, ReserveStockRequest};
pub use notification::{InMemoryNotificationService, NotificationService, SendNotificationRequest};
pub use payment::{
    InMemoryPaymentService, PaymentService, ProcessPaymentRequest, RefundPaymentRequest,
};
pub use shipping::{
    CancelShipmentRequest, CreateShipmentRequest, InMemoryShippingService, ShippingService,
};

/// Uniform answer of every remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReply {
    pub success: bool,
    /// Handle of the resource created by the call, if any.
    pub resource_id: Option<String>,
    pub message: String,
}

impl StepReply {
    /// Successful reply carrying a resource id.
    pub fn created(resource_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            resource_id: Some(resource_id.into()),
            message: message.into(),
        }
    }

    /// Successful reply without a resource id.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            resource_id: None,
            message: message.into(),
        }
    }

    /// Explicit rejection by the remote service.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            resource_id: None,
            message: message.into(),
        }
    }
}

// The in-memory services never panic while holding their lock, so a
// poisoned lock still guards consistent state.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
