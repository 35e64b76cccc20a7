//! Publishing of order lifecycle events.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{DomainError, OrderEvent};

/// Sink for order lifecycle events.
///
/// Broker fan-out lives behind this trait; callers only see whether the
/// event was accepted.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes a single event.
    async fn publish(&self, event: OrderEvent) -> Result<(), DomainError>;
}

/// Publisher that records events in memory and logs them.
#[derive(Clone, Default)]
pub struct InMemoryEventPublisher {
    events: Arc<RwLock<Vec<OrderEvent>>>,
}

impl InMemoryEventPublisher {
    /// Creates a new empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all published events, oldest first.
    pub async fn published(&self) -> Vec<OrderEvent> {
        self.events.read().await.clone()
    }

    /// Returns the type names of all published events, oldest first.
    pub async fn event_types(&self) -> Vec<&'static str> {
        self.events
            .read()
            .await
            .iter()
            .map(OrderEvent::event_type)
            .collect()
    }

    /// Returns the number of published events.
    pub async fn count(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: OrderEvent) -> Result<(), DomainError> {
        let event_type = event.event_type();
        tracing::info!(event_type, order_id = %event.order_id(), "Order event published");
        metrics::counter!("order_events_published_total", "event" => event_type).increment(1);
        self.events.write().await.push(event);
        Ok(())
    }
}
