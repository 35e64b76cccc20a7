//! Order lifecycle events.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{Money, Order, OrderStatus};

/// Events published when an order moves through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was accepted and persisted.
    OrderCreated(OrderCreatedData),

    /// Order reached Completed.
    OrderCompleted(OrderCompletedData),

    /// Order was cancelled by compensation or by the user.
    OrderCancelled(OrderCancelledData),

    /// Order status was changed manually.
    OrderStatusChanged(OrderStatusChangedData),
}

impl OrderEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "OrderCreated",
            OrderEvent::OrderCompleted(_) => "OrderCompleted",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::OrderStatusChanged(_) => "OrderStatusChanged",
        }
    }

    /// Returns the order the event is about.
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderCreated(data) => data.order_id,
            OrderEvent::OrderCompleted(data) => data.order_id,
            OrderEvent::OrderCancelled(data) => data.order_id,
            OrderEvent::OrderStatusChanged(data) => data.order_id,
        }
    }
}

/// Data for OrderCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_amount: Money,
    pub item_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Data for OrderCompleted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCompletedData {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_amount: Money,
    pub completed_at: DateTime<Utc>,
}

/// Data for OrderCancelled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Data for OrderStatusChanged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusChangedData {
    pub order_id: OrderId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub changed_at: DateTime<Utc>,
}

// Convenience constructors
impl OrderEvent {
    pub fn order_created(order: &Order) -> Self {
        OrderEvent::OrderCreated(OrderCreatedData {
            order_id: order.id(),
            user_id: order.user_id(),
            total_amount: order.total_amount(),
            item_count: order.item_count(),
            created_at: order.created_at(),
        })
    }

    /// Uses the order's `completed_at`, falling back to now.
    pub fn order_completed(order: &Order) -> Self {
        OrderEvent::OrderCompleted(OrderCompletedData {
            order_id: order.id(),
            user_id: order.user_id(),
            total_amount: order.total_amount(),
            completed_at: order.completed_at().unwrap_or_else(Utc::now),
        })
    }

    pub fn order_cancelled(order: &Order, reason: impl Into<String>) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            order_id: order.id(),
            user_id: order.user_id(),
            reason: reason.into(),
            cancelled_at: Utc::now(),
        })
    }

    pub fn status_changed(order: &Order, old_status: OrderStatus) -> Self {
        OrderEvent::OrderStatusChanged(OrderStatusChangedData {
            order_id: order.id(),
            old_status,
            new_status: order.status(),
            changed_at: Utc::now(),
        })
    }
}
