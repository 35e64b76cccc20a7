//! The fixed forward step table of the purchase saga.

use ledger::StepName;

/// Whether a failed step stops the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Failure aborts forward progress and triggers compensation.
    Critical,
    /// Failure is logged and the saga continues.
    NonCritical,
}

/// Forward steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardStep {
    ReserveStock,
    ProcessPayment,
    ConfirmReservation,
    SendNotification,
    CreateShipment,
}

impl ForwardStep {
    pub const ALL: [ForwardStep; 5] = [
        ForwardStep::ReserveStock,
        ForwardStep::ProcessPayment,
        ForwardStep::ConfirmReservation,
        ForwardStep::SendNotification,
        ForwardStep::CreateShipment,
    ];

    /// Name recorded on the step row.
    pub fn name(&self) -> StepName {
        match self {
            ForwardStep::ReserveStock => StepName::ReserveStock,
            ForwardStep::ProcessPayment => StepName::ProcessPayment,
            ForwardStep::ConfirmReservation => StepName::ConfirmReservation,
            ForwardStep::SendNotification => StepName::SendNotification,
            ForwardStep::CreateShipment => StepName::CreateShipment,
        }
    }

    pub fn criticality(&self) -> Criticality {
        match self {
            ForwardStep::ReserveStock
            | ForwardStep::ProcessPayment
            | ForwardStep::ConfirmReservation => Criticality::Critical,
            ForwardStep::SendNotification | ForwardStep::CreateShipment => {
                Criticality::NonCritical
            }
        }
    }

    pub fn is_critical(&self) -> bool {
        self.criticality() == Criticality::Critical
    }

    /// Saga failure reason when this step aborts the saga.
    pub fn abort_reason(&self) -> Option<&'static str> {
        match self {
            ForwardStep::ReserveStock => Some("Stock reservation failed"),
            ForwardStep::ProcessPayment => Some("Payment processing failed"),
            ForwardStep::ConfirmReservation => Some("Stock confirmation failed"),
            ForwardStep::SendNotification | ForwardStep::CreateShipment => None,
        }
    }

    /// Remote service that answers this step, used in failure messages.
    pub fn service(&self) -> &'static str {
        match self {
            ForwardStep::ReserveStock | ForwardStep::ConfirmReservation => "inventory service",
            ForwardStep::ProcessPayment => "payment service",
            ForwardStep::SendNotification => "notification service",
            ForwardStep::CreateShipment => "shipping service",
        }
    }
}
