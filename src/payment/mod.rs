//! # Payment Module
//!
//! The payment gateway is an external collaborator; this module
//! defines the seam the reservation flow calls through and a mock
//! implementation for development and tests.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Payment-related errors.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// The provider rejected the charge
    #[error("Payment declined: {0}")]
    Declined(String),

    /// The provider could not be reached or answered garbage
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
}

/// A confirmed payment, as reported by the provider.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    /// Our order id (the reservation id).
    pub order_id: Uuid,

    /// Provider-side reference for reconciliation.
    pub provider_reference: String,

    /// Charged amount, in the smallest currency unit.
    pub amount: i64,
}

/// Payment gateway seam.
///
/// Calls block the caller and must use conservative timeouts in real
/// implementations; the reservation flow treats any error here as a
/// typed failure of the confirm operation, never as a reason to
/// corrupt seat state.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge `amount` against the order. Returns the provider
    /// confirmation on success.
    async fn confirm(&self, order_id: Uuid, amount: i64)
        -> Result<PaymentConfirmation, PaymentError>;
}

/// In-process gateway used in development and tests.
///
/// Approves everything unless constructed with `declining()`.
pub struct MockPaymentGateway {
    decline: bool,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self { decline: false }
    }

    /// A gateway that declines every charge.
    #[allow(dead_code)]
    pub fn declining() -> Self {
        Self { decline: true }
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn confirm(
        &self,
        order_id: Uuid,
        amount: i64,
    ) -> Result<PaymentConfirmation, PaymentError> {
        if self.decline {
            return Err(PaymentError::Declined("declined by mock gateway".into()));
        }

        Ok(PaymentConfirmation {
            order_id,
            provider_reference: format!("mock-{}", Uuid::new_v4()),
            amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway_approves() {
        let gateway = MockPaymentGateway::new();
        let order_id = Uuid::new_v4();

        let confirmation = gateway.confirm(order_id, 55_000).await.unwrap();
        assert_eq!(confirmation.order_id, order_id);
        assert_eq!(confirmation.amount, 55_000);
    }

    #[tokio::test]
    async fn test_mock_gateway_declines() {
        let gateway = MockPaymentGateway::declining();
        let result = gateway.confirm(Uuid::new_v4(), 55_000).await;
        assert!(matches!(result, Err(PaymentError::Declined(_))));
    }
}
