//! Order commands and their input validation.

use common::UserId;
use serde::{Deserialize, Serialize};

use super::{Money, OrderError, OrderItem, OrderStatus, ShippingAddress};

/// Maximum length of the shipping street line.
pub const MAX_STREET_LEN: usize = 500;

/// Maximum length of a product name.
pub const MAX_PRODUCT_NAME_LEN: usize = 200;

/// Maximum length of a cancellation reason.
pub const MAX_REASON_LEN: usize = 500;

/// Command to place a new order and start its purchase saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrder {
    /// The purchasing user.
    pub user_id: UserId,

    /// Where the order ships to.
    pub shipping_address: ShippingAddress,

    /// Order lines, in order.
    pub items: Vec<OrderItem>,
}

impl PlaceOrder {
    /// Creates a new PlaceOrder command.
    pub fn new(user_id: UserId, shipping_address: ShippingAddress, items: Vec<OrderItem>) -> Self {
        Self {
            user_id,
            shipping_address,
            items,
        }
    }

    /// Checks every input rule and reports all violations at once.
    pub fn validate(&self) -> Result<(), OrderError> {
        let mut errors = Vec::new();

        if self.user_id.as_uuid().is_nil() {
            errors.push("User ID is required".to_string());
        }

        let street = self.shipping_address.street.trim();
        if street.is_empty() {
            errors.push("Shipping address is required".to_string());
        } else if street.chars().count() > MAX_STREET_LEN {
            errors.push(format!(
                "Shipping address must not exceed {MAX_STREET_LEN} characters"
            ));
        }

        if self.items.is_empty() {
            errors.push("Order must contain at least one item".to_string());
        }

        for (index, item) in self.items.iter().enumerate() {
            let line = index + 1;
            if item.product_id.as_str().trim().is_empty() {
                errors.push(format!("Item {line}: product ID is required"));
            }
            if item.product_name.chars().count() > MAX_PRODUCT_NAME_LEN {
                errors.push(format!(
                    "Item {line}: product name must not exceed {MAX_PRODUCT_NAME_LEN} characters"
                ));
            }
            if item.quantity == 0 {
                errors.push(format!("Item {line}: quantity must be greater than 0"));
            }
            if !item.unit_price.is_positive() {
                errors.push(format!("Item {line}: unit price must be greater than 0"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrderError::Validation(errors))
        }
    }

    /// Sum of all line subtotals.
    pub fn total(&self) -> Money {
        self.items.iter().map(OrderItem::subtotal).sum()
    }
}

/// Command to cancel an order outside of the saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrder {
    /// Why the order is being cancelled.
    pub reason: String,
}

impl CancelOrder {
    /// Creates a new CancelOrder command.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Checks that a reason was given and is not too long.
    pub fn validate(&self) -> Result<(), OrderError> {
        let reason = self.reason.trim();
        if reason.is_empty() {
            return Err(OrderError::Validation(vec![
                "Cancellation reason is required".to_string(),
            ]));
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(OrderError::Validation(vec![format!(
                "Cancellation reason must not exceed {MAX_REASON_LEN} characters"
            )]));
        }
        Ok(())
    }
}

/// Command to set an order's status manually.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UpdateOrderStatus {
    pub status: OrderStatus,
}

impl UpdateOrderStatus {
    /// Only Pending, Processing, Completed and Cancelled can be set manually.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.status.is_manual_target() {
            Ok(())
        } else {
            Err(OrderError::Validation(vec![format!(
                "Status {} cannot be set manually",
                self.status
            )]))
        }
    }
}
