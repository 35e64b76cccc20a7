//! Saga and step status machines, and the closed set of step names.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::LedgerError;

/// The status of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Started ──► InProgress ──┬──► Completed
///                          └──► Compensating ──┬──► Compensated
///                                              └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Saga record created, no step has run.
    #[default]
    Started,

    /// Forward steps are being executed.
    InProgress,

    /// All critical steps succeeded (terminal).
    Completed,

    /// Compensation could not be carried out cleanly (terminal).
    Failed,

    /// A critical step failed and completed work is being undone.
    Compensating,

    /// All completed work was undone (terminal).
    Compensated,
}

impl SagaStatus {
    pub const ALL: [SagaStatus; 6] = [
        SagaStatus::Started,
        SagaStatus::InProgress,
        SagaStatus::Completed,
        SagaStatus::Failed,
        SagaStatus::Compensating,
        SagaStatus::Compensated,
    ];

    /// Statuses a saga is left in when the process stops mid-run.
    pub const INCOMPLETE: [SagaStatus; 3] = [
        SagaStatus::Started,
        SagaStatus::InProgress,
        SagaStatus::Compensating,
    ];

    /// Returns true if `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: SagaStatus) -> bool {
        matches!(
            (self, next),
            (SagaStatus::Started, SagaStatus::InProgress)
                | (SagaStatus::InProgress, SagaStatus::Completed)
                | (SagaStatus::InProgress, SagaStatus::Compensating)
                | (SagaStatus::Compensating, SagaStatus::Compensated)
                | (SagaStatus::Compensating, SagaStatus::Failed)
        )
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Compensated
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "Started",
            SagaStatus::InProgress => "InProgress",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SagaStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SagaStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| LedgerError::InvalidValue(format!("unknown saga status '{s}'")))
    }
}

/// The status of a single step row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    /// Recorded before the service call.
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::InProgress => "InProgress",
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InProgress" => Ok(StepStatus::InProgress),
            "Completed" => Ok(StepStatus::Completed),
            "Failed" => Ok(StepStatus::Failed),
            other => Err(LedgerError::InvalidValue(format!(
                "unknown step status '{other}'"
            ))),
        }
    }
}

/// Every step the purchase saga can record, forward and compensating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepName {
    ReserveStock,
    ProcessPayment,
    ConfirmReservation,
    SendNotification,
    CreateShipment,
    CancelShipment,
    RefundPayment,
    ReleaseStock,
}

impl StepName {
    pub const ALL: [StepName; 8] = [
        StepName::ReserveStock,
        StepName::ProcessPayment,
        StepName::ConfirmReservation,
        StepName::SendNotification,
        StepName::CreateShipment,
        StepName::CancelShipment,
        StepName::RefundPayment,
        StepName::ReleaseStock,
    ];

    /// Returns true for steps that undo earlier work.
    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            StepName::CancelShipment | StepName::RefundPayment | StepName::ReleaseStock
        )
    }

    /// Returns the saga handle this step sets when it completes, if any.
    pub fn produces(&self) -> Option<Handle> {
        match self {
            StepName::ReserveStock => Some(Handle::Reservation),
            StepName::ProcessPayment => Some(Handle::Payment),
            StepName::SendNotification => Some(Handle::Notification),
            StepName::CreateShipment => Some(Handle::Shipment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::ReserveStock => "ReserveStock",
            StepName::ProcessPayment => "ProcessPayment",
            StepName::ConfirmReservation => "ConfirmReservation",
            StepName::SendNotification => "SendNotification",
            StepName::CreateShipment => "CreateShipment",
            StepName::CancelShipment => "CancelShipment",
            StepName::RefundPayment => "RefundPayment",
            StepName::ReleaseStock => "ReleaseStock",
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StepName {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| LedgerError::InvalidValue(format!("unknown step name '{s}'")))
    }
}

/// Remote resource handles a saga keeps for compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    Reservation,
    Payment,
    Notification,
    Shipment,
}
