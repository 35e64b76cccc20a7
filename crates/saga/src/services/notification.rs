//! Notification service trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{StepReply, read, write};
use crate::error::AdapterError;

/// Request to send an order e-mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendNotificationRequest {
    pub user_id: UserId,
    pub order_id: OrderId,
    pub email_to: String,
    pub subject: String,
    pub body: String,
    pub template: String,
}

/// Trait for customer notifications.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Sends a notification and returns its id.
    async fn send_notification(
        &self,
        request: &SendNotificationRequest,
    ) -> Result<StepReply, AdapterError>;
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    sent: Vec<(String, SendNotificationRequest)>,
    next_id: u32,
    fail_on_send: bool,
    unavailable: bool,
}

/// In-memory notification service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    state: Arc<RwLock<InMemoryNotificationState>>,
}

impl InMemoryNotificationService {
    /// Creates a new in-memory notification service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures sends to be rejected.
    pub fn set_fail_on_send(&self, fail: bool) {
        write(&self.state).fail_on_send = fail;
    }

    /// Makes every call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        write(&self.state).unavailable = unavailable;
    }

    /// Returns the number of notifications sent.
    pub fn sent_count(&self) -> usize {
        read(&self.state).sent.len()
    }

    /// Returns the sent requests, oldest first.
    pub fn sent(&self) -> Vec<SendNotificationRequest> {
        read(&self.state)
            .sent
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn send_notification(
        &self,
        request: &SendNotificationRequest,
    ) -> Result<StepReply, AdapterError> {
        let mut state = write(&self.state);

        if state.unavailable {
            return Err(AdapterError::Unavailable("notification service".to_string()));
        }
        if state.fail_on_send {
            return Ok(StepReply::rejected("Mailbox unavailable"));
        }

        state.next_id += 1;
        let notification_id = format!("NOTIF-{:04}", state.next_id);
        state.sent.push((notification_id.clone(), request.clone()));

        Ok(StepReply::created(notification_id, "Notification sent"))
    }
}
