//! Shipping service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{StepReply, read, write};
use crate::error::AdapterError;

/// Request to create a shipment for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateShipmentRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub street: String,
    pub city: String,
    pub country: String,
    pub zip_code: String,
    pub phone_number: String,
    pub method: String,
}

/// Request to cancel a shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelShipmentRequest {
    pub shipment_id: String,
    pub reason: String,
}

/// Trait for shipping operations.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Creates a shipment for an order.
    async fn create_shipment(
        &self,
        request: &CreateShipmentRequest,
    ) -> Result<StepReply, AdapterError>;

    /// Cancels a previously created shipment.
    async fn cancel_shipment(
        &self,
        request: &CancelShipmentRequest,
    ) -> Result<StepReply, AdapterError>;
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    shipments: HashMap<String, OrderId>,
    cancelled: Vec<String>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_cancel: bool,
    unavailable: bool,
}

/// In-memory shipping service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<RwLock<InMemoryShippingState>>,
}

impl InMemoryShippingService {
    /// Creates a new in-memory shipping service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures shipment creation to be rejected.
    pub fn set_fail_on_create(&self, fail: bool) {
        write(&self.state).fail_on_create = fail;
    }

    /// Configures cancellations to be rejected.
    pub fn set_fail_on_cancel(&self, fail: bool) {
        write(&self.state).fail_on_cancel = fail;
    }

    /// Makes every call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        write(&self.state).unavailable = unavailable;
    }

    /// Returns the number of active shipments.
    pub fn shipment_count(&self) -> usize {
        read(&self.state).shipments.len()
    }

    /// Returns the ids of cancelled shipments, in order.
    pub fn cancelled_shipments(&self) -> Vec<String> {
        read(&self.state).cancelled.clone()
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn create_shipment(
        &self,
        request: &CreateShipmentRequest,
    ) -> Result<StepReply, AdapterError> {
        let mut state = write(&self.state);

        if state.unavailable {
            return Err(AdapterError::Unavailable("shipping service".to_string()));
        }
        if state.fail_on_create {
            return Ok(StepReply::rejected("No carrier available"));
        }

        state.next_id += 1;
        let shipment_id = format!("SHIP-{:04}", state.next_id);
        state
            .shipments
            .insert(shipment_id.clone(), request.order_id);

        Ok(StepReply::created(shipment_id, "Shipment created"))
    }

    async fn cancel_shipment(
        &self,
        request: &CancelShipmentRequest,
    ) -> Result<StepReply, AdapterError> {
        let mut state = write(&self.state);

        if state.unavailable {
            return Err(AdapterError::Unavailable("shipping service".to_string()));
        }
        if state.fail_on_cancel {
            return Ok(StepReply::rejected("Shipment already dispatched"));
        }
        if state.shipments.remove(&request.shipment_id).is_none() {
            return Ok(StepReply::rejected(format!(
                "Shipment {} not found",
                request.shipment_id
            )));
        }
        state.cancelled.push(request.shipment_id.clone());

        Ok(StepReply::ok("Shipment cancelled"))
    }
}
