//! Saga and step records as persisted by the ledger.

use chrono::{DateTime, Utc};
use common::{OrderId, SagaId, StepId};
use serde::{Deserialize, Serialize};

use crate::{Handle, InvalidTransition, SagaStatus, StepName, StepStatus};

/// Snapshot of one saga attempt for one order.
///
/// The orchestrator threads this value through every step: each step takes
/// the current snapshot and returns the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaState {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub status: SagaStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub reservation_id: Option<String>,
    pub payment_id: Option<String>,
    pub notification_id: Option<String>,
    pub shipment_id: Option<String>,
    /// Step rows ordered by sequence.
    pub steps: Vec<SagaStep>,
}

impl SagaState {
    /// Creates a fresh saga in `Started` for the given order.
    pub fn start(order_id: OrderId) -> Self {
        Self {
            saga_id: SagaId::new(),
            order_id,
            status: SagaStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
            reservation_id: None,
            payment_id: None,
            notification_id: None,
            shipment_id: None,
            steps: Vec::new(),
        }
    }

    /// Moves to `next`, stamping `completed_at` when `next` is terminal.
    pub fn advance(mut self, next: SagaStatus) -> Result<Self, InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(self)
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    /// Records a resource handle returned by a completed step.
    pub fn with_handle(mut self, handle: Handle, id: impl Into<String>) -> Self {
        let id = Some(id.into());
        match handle {
            Handle::Reservation => self.reservation_id = id,
            Handle::Payment => self.payment_id = id,
            Handle::Notification => self.notification_id = id,
            Handle::Shipment => self.shipment_id = id,
        }
        self
    }

    /// Returns the handle value, if set.
    pub fn handle(&self, handle: Handle) -> Option<&str> {
        match handle {
            Handle::Reservation => self.reservation_id.as_deref(),
            Handle::Payment => self.payment_id.as_deref(),
            Handle::Notification => self.notification_id.as_deref(),
            Handle::Shipment => self.shipment_id.as_deref(),
        }
    }

    /// Inserts the step, or replaces the row with the same step id.
    pub fn with_step(mut self, step: SagaStep) -> Self {
        match self.steps.iter_mut().find(|s| s.step_id == step.step_id) {
            Some(existing) => *existing = step,
            None => self.steps.push(step),
        }
        self
    }

    /// Sequence number for the next step row.
    pub fn next_sequence(&self) -> i32 {
        self.steps.iter().map(|s| s.sequence).max().unwrap_or(0) + 1
    }

    /// Returns the most recent row for the named step.
    pub fn last_step(&self, name: StepName) -> Option<&SagaStep> {
        self.steps.iter().rev().find(|s| s.step_name == name)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One recorded service call within a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    pub step_id: StepId,
    pub saga_id: SagaId,
    pub step_name: StepName,
    /// 1-based, unique within the saga.
    pub sequence: i32,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub request: Option<serde_json::Value>,
    pub response: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

impl SagaStep {
    /// Creates an `InProgress` row, written before the service is called.
    pub fn begin(
        saga_id: SagaId,
        step_name: StepName,
        sequence: i32,
        request: Option<serde_json::Value>,
    ) -> Self {
        Self {
            step_id: StepId::new(),
            saga_id,
            step_name,
            sequence,
            status: StepStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            request,
            response: None,
            error_message: None,
            retry_count: 0,
        }
    }

    pub fn complete(mut self, response: Option<serde_json::Value>) -> Self {
        self.status = StepStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.response = response;
        self
    }

    pub fn fail(mut self, error: impl Into<String>, response: Option<serde_json::Value>) -> Self {
        self.status = StepStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
        self.response = response;
        self
    }
}
