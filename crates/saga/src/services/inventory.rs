//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::OrderId;
use domain::ProductId;
use serde::{Deserialize, Serialize};

use super::{StepReply, read, write};
use crate::error::AdapterError;

/// Request to reserve stock for one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStockRequest {
    pub product_id: ProductId,
    pub quantity: u32,
    pub order_id: OrderId,
}

/// Trait for stock reservation operations.
///
/// Reservations are grouped by order: every line reserved for the same order
/// answers with the same reservation id.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves stock for one order line.
    async fn reserve_stock(&self, request: &ReserveStockRequest)
    -> Result<StepReply, AdapterError>;

    /// Commits a reservation, deducting the stock for good.
    async fn confirm_reservation(&self, reservation_id: &str) -> Result<StepReply, AdapterError>;

    /// Returns every line of a reservation to stock.
    async fn release_reservation(
        &self,
        reservation_id: &str,
        reason: &str,
    ) -> Result<StepReply, AdapterError>;
}

#[derive(Debug, Clone)]
struct Reservation {
    order_id: OrderId,
    lines: Vec<(ProductId, u32)>,
    confirmed: bool,
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    reservations: HashMap<String, Reservation>,
    by_order: HashMap<OrderId, String>,
    /// Tracked stock levels; products without an entry are unlimited.
    stock: HashMap<ProductId, u32>,
    released: Vec<String>,
    next_id: u32,
    fail_on_reserve: bool,
    fail_on_confirm: bool,
    fail_on_release: bool,
    unavailable: bool,
}

/// In-memory inventory service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a tracked stock level for a product.
    pub fn set_stock(&self, product_id: impl Into<ProductId>, quantity: u32) {
        write(&self.state).stock.insert(product_id.into(), quantity);
    }

    /// Returns the tracked stock level of a product.
    pub fn stock_level(&self, product_id: &ProductId) -> Option<u32> {
        read(&self.state).stock.get(product_id).copied()
    }

    /// Configures reserve calls to be rejected.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        write(&self.state).fail_on_reserve = fail;
    }

    /// Configures confirm calls to be rejected.
    pub fn set_fail_on_confirm(&self, fail: bool) {
        write(&self.state).fail_on_confirm = fail;
    }

    /// Configures release calls to be rejected.
    pub fn set_fail_on_release(&self, fail: bool) {
        write(&self.state).fail_on_release = fail;
    }

    /// Makes every call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        write(&self.state).unavailable = unavailable;
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        read(&self.state).reservations.len()
    }

    /// Returns true if a reservation exists with the given ID.
    pub fn has_reservation(&self, reservation_id: &str) -> bool {
        read(&self.state).reservations.contains_key(reservation_id)
    }

    /// Returns true if the reservation exists and was confirmed.
    pub fn is_confirmed(&self, reservation_id: &str) -> bool {
        read(&self.state)
            .reservations
            .get(reservation_id)
            .is_some_and(|r| r.confirmed)
    }

    /// Returns the number of lines held by a reservation.
    pub fn reserved_lines(&self, reservation_id: &str) -> usize {
        read(&self.state)
            .reservations
            .get(reservation_id)
            .map_or(0, |r| r.lines.len())
    }

    /// Returns the ids of released reservations, in release order.
    pub fn released_reservations(&self) -> Vec<String> {
        read(&self.state).released.clone()
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve_stock(
        &self,
        request: &ReserveStockRequest,
    ) -> Result<StepReply, AdapterError> {
        let mut state = write(&self.state);

        if state.unavailable {
            return Err(AdapterError::Unavailable("inventory service".to_string()));
        }
        if state.fail_on_reserve {
            return Ok(StepReply::rejected("Insufficient stock"));
        }
        if let Some(level) = state.stock.get_mut(&request.product_id) {
            if *level < request.quantity {
                return Ok(StepReply::rejected(format!(
                    "Insufficient stock for product {}: requested {}, available {}",
                    request.product_id, request.quantity, level
                )));
            }
            *level -= request.quantity;
        }

        let existing = state
            .by_order
            .get(&request.order_id)
            .filter(|id| state.reservations.contains_key(*id))
            .cloned();
        let reservation_id = match existing {
            Some(id) => id,
            None => {
                state.next_id += 1;
                let id = format!("RES-{:04}", state.next_id);
                state.reservations.insert(
                    id.clone(),
                    Reservation {
                        order_id: request.order_id,
                        lines: Vec::new(),
                        confirmed: false,
                    },
                );
                state.by_order.insert(request.order_id, id.clone());
                id
            }
        };

        if let Some(reservation) = state.reservations.get_mut(&reservation_id) {
            reservation
                .lines
                .push((request.product_id.clone(), request.quantity));
        }

        Ok(StepReply::created(reservation_id, "Stock reserved"))
    }

    async fn confirm_reservation(&self, reservation_id: &str) -> Result<StepReply, AdapterError> {
        let mut state = write(&self.state);

        if state.unavailable {
            return Err(AdapterError::Unavailable("inventory service".to_string()));
        }
        if state.fail_on_confirm {
            return Ok(StepReply::rejected("Reservation expired"));
        }
        match state.reservations.get_mut(reservation_id) {
            Some(reservation) => {
                reservation.confirmed = true;
                Ok(StepReply::ok("Reservation confirmed"))
            }
            None => Ok(StepReply::rejected(format!(
                "Reservation {reservation_id} not found"
            ))),
        }
    }

    async fn release_reservation(
        &self,
        reservation_id: &str,
        reason: &str,
    ) -> Result<StepReply, AdapterError> {
        let mut state = write(&self.state);

        if state.unavailable {
            return Err(AdapterError::Unavailable("inventory service".to_string()));
        }
        if state.fail_on_release {
            return Ok(StepReply::rejected("Release refused"));
        }
        let Some(reservation) = state.reservations.remove(reservation_id) else {
            return Ok(StepReply::rejected(format!(
                "Reservation {reservation_id} not found"
            )));
        };

        for (product_id, quantity) in &reservation.lines {
            if let Some(level) = state.stock.get_mut(product_id) {
                *level += quantity;
            }
        }
        state.by_order.remove(&reservation.order_id);
        state.released.push(reservation_id.to_string());
        tracing::debug!(reservation_id, reason, "reservation released");

        Ok(StepReply::ok("Stock released"))
    }
}
