//! Fixed values the orchestrator puts on outbound requests.

use serde::{Deserialize, Serialize};

/// Request defaults used by the purchase saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaConfig {
    pub payment_method: String,
    pub currency: String,
    pub shipping_method: String,
    pub notification_template: String,
    /// Recipient of order confirmations.
    pub notification_email: String,
    /// Reason given to compensating calls when the saga has none.
    pub compensation_reason_fallback: String,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            payment_method: "CreditCard".to_string(),
            currency: "USD".to_string(),
            shipping_method: "Standard".to_string(),
            notification_template: "OrderConfirmation".to_string(),
            notification_email: "customer@email.com".to_string(),
            compensation_reason_fallback: "Saga compensation".to_string(),
        }
    }
}

impl SagaConfig {
    /// Returns `reason`, or the fallback when it is blank.
    pub fn compensation_reason<'a>(&'a self, reason: &'a str) -> &'a str {
        if reason.trim().is_empty() {
            &self.compensation_reason_fallback
        } else {
            reason
        }
    }
}
