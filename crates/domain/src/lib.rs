//! Order domain for the purchase saga system.
//!
//! This crate provides:
//! - The `Order` entity with its status lifecycle and money arithmetic
//! - Input validation for placing, cancelling and updating orders
//! - Order lifecycle events and the `EventPublisher` seam

pub mod error;
pub mod order;
pub mod publisher;

pub use error::DomainError;
pub use order::{
    CancelOrder, Money, Order, OrderError, OrderEvent, OrderItem, OrderRecord, OrderStatus,
    PlaceOrder, ProductId, ShippingAddress, UpdateOrderStatus,
};
pub use publisher::{EventPublisher, InMemoryEventPublisher};
