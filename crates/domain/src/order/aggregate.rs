//! Order entity.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{Money, OrderError, OrderItem, OrderStatus, PlaceOrder, ShippingAddress};

/// An order placed by a user.
///
/// Items and the total are fixed at creation. Afterwards only the status and
/// the completion timestamp change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    status: OrderStatus,
    total_amount: Money,
    shipping_address: ShippingAddress,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    items: Vec<OrderItem>,
}

/// Flat representation of an order as stored by a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub shipping_address: ShippingAddress,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItem>,
}

impl From<OrderRecord> for Order {
    fn from(record: OrderRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            status: record.status,
            total_amount: record.total_amount,
            shipping_address: record.shipping_address,
            created_at: record.created_at,
            completed_at: record.completed_at,
            items: record.items,
        }
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Sum of line subtotals, computed once when the order was placed.
    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn shipping_address(&self) -> &ShippingAddress {
        &self.shipping_address
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns the order lines in the order they were placed.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns the number of lines.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the order has items.
    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }
}

// Command methods
impl Order {
    /// Validates the command and creates a `Pending` order with a fresh id.
    pub fn place(cmd: PlaceOrder) -> Result<Self, OrderError> {
        cmd.validate()?;
        let total_amount = cmd.total();
        Ok(Self {
            id: OrderId::new(),
            user_id: cmd.user_id,
            status: OrderStatus::Pending,
            total_amount,
            shipping_address: cmd.shipping_address,
            created_at: Utc::now(),
            completed_at: None,
            items: cmd.items,
        })
    }

    /// Marks the order completed at the given instant.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_complete() {
            return Err(OrderError::InvalidStatusTransition {
                current: self.status,
                action: "complete",
            });
        }
        self.status = OrderStatus::Completed;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Marks the order cancelled.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidStatusTransition {
                current: self.status,
                action: "cancel",
            });
        }
        self.status = OrderStatus::Cancelled;
        Ok(())
    }

    /// Applies a manual status update and returns the previous status.
    ///
    /// Setting `Completed` also stamps `completed_at`.
    pub fn set_status(
        &mut self,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<OrderStatus, OrderError> {
        if !status.is_manual_target() {
            return Err(OrderError::InvalidStatusTransition {
                current: self.status,
                action: "set status manually",
            });
        }
        let previous = self.status;
        self.status = status;
        if status == OrderStatus::Completed {
            self.completed_at = Some(at);
        }
        Ok(previous)
    }
}
