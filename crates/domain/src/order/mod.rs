//! Order entity and related types.

mod aggregate;
mod commands;
mod events;
mod state;
mod value_objects;

pub use aggregate::{Order, OrderRecord};
pub use commands::{
    CancelOrder, MAX_PRODUCT_NAME_LEN, MAX_REASON_LEN, MAX_STREET_LEN, PlaceOrder,
    UpdateOrderStatus,
};
pub use events::{
    OrderCancelledData, OrderCompletedData, OrderCreatedData, OrderEvent, OrderStatusChangedData,
};
pub use state::OrderStatus;
pub use value_objects::{Money, OrderItem, ProductId, ShippingAddress};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// One or more input rules were violated.
    #[error("{}", .0.join(", "))]
    Validation(Vec<String>),

    /// Order is not in a status that allows the action.
    #[error("Invalid status transition: cannot {action} from {current} status")]
    InvalidStatusTransition {
        current: OrderStatus,
        action: &'static str,
    },

    /// Status name did not match any known status.
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),
}
