//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::Money;
use serde::{Deserialize, Serialize};

use super::{StepReply, read, write};
use crate::error::AdapterError;

/// Request to charge a user for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessPaymentRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub method: String,
    pub currency: String,
}

/// Request to give a charged amount back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPaymentRequest {
    pub payment_id: String,
    pub reason: String,
    pub amount: Money,
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges a user for an order.
    async fn process_payment(
        &self,
        request: &ProcessPaymentRequest,
    ) -> Result<StepReply, AdapterError>;

    /// Refunds a previously made payment.
    async fn refund_payment(
        &self,
        request: &RefundPaymentRequest,
    ) -> Result<StepReply, AdapterError>;
}

#[derive(Debug, Clone)]
struct Payment {
    amount: Money,
    refunded: bool,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, Payment>,
    refunds: Vec<(String, Money)>,
    next_id: u32,
    fail_on_charge: bool,
    fail_on_refund: bool,
    unavailable: bool,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures charges to be declined.
    pub fn set_fail_on_charge(&self, fail: bool) {
        write(&self.state).fail_on_charge = fail;
    }

    /// Configures refunds to be rejected.
    pub fn set_fail_on_refund(&self, fail: bool) {
        write(&self.state).fail_on_refund = fail;
    }

    /// Makes every call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        write(&self.state).unavailable = unavailable;
    }

    /// Returns the number of payments that were not refunded.
    pub fn payment_count(&self) -> usize {
        read(&self.state)
            .payments
            .values()
            .filter(|p| !p.refunded)
            .count()
    }

    /// Returns true if a payment exists with the given ID.
    pub fn has_payment(&self, payment_id: &str) -> bool {
        read(&self.state).payments.contains_key(payment_id)
    }

    /// Returns the refunds made, as (payment id, amount), in order.
    pub fn refunds(&self) -> Vec<(String, Money)> {
        read(&self.state).refunds.clone()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn process_payment(
        &self,
        request: &ProcessPaymentRequest,
    ) -> Result<StepReply, AdapterError> {
        let mut state = write(&self.state);

        if state.unavailable {
            return Err(AdapterError::Unavailable("payment service".to_string()));
        }
        if state.fail_on_charge {
            return Ok(StepReply::rejected("Payment declined"));
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state.payments.insert(
            payment_id.clone(),
            Payment {
                amount: request.amount,
                refunded: false,
            },
        );

        Ok(StepReply::created(payment_id, "Payment processed"))
    }

    async fn refund_payment(
        &self,
        request: &RefundPaymentRequest,
    ) -> Result<StepReply, AdapterError> {
        let mut state = write(&self.state);

        if state.unavailable {
            return Err(AdapterError::Unavailable("payment service".to_string()));
        }
        if state.fail_on_refund {
            return Ok(StepReply::rejected("Refund refused"));
        }
        let Some(payment) = state.payments.get_mut(&request.payment_id) else {
            return Ok(StepReply::rejected(format!(
                "Payment {} not found",
                request.payment_id
            )));
        };
        if payment.refunded {
            return Ok(StepReply::rejected(format!(
                "Payment {} already refunded",
                request.payment_id
            )));
        }
        if request.amount > payment.amount {
            return Ok(StepReply::rejected(format!(
                "Refund of {} exceeds charged {}",
                request.amount, payment.amount
            )));
        }
        payment.refunded = true;
        state
            .refunds
            .push((request.payment_id.clone(), request.amount));

        Ok(StepReply::ok("Payment refunded"))
    }
}
