//! Payment provider seam.
//!
//! The real provider lives outside this service; [`MockPaymentGateway`] is
//! wired in by default and in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::utils::money::Currency;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("payment provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    /// Provider-side reference, kept on the registration for reconciliation.
    pub reference: String,
    pub amount: i64,
    pub currency: Currency,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges `amount` cents. `order_reference` identifies the registration
    /// on the provider side and doubles as the idempotency key: charging the
    /// same reference again returns the first confirmation and captures
    /// nothing new.
    async fn charge(
        &self,
        amount: i64,
        currency: Currency,
        order_reference: &str,
    ) -> Result<PaymentConfirmation, PaymentError>;
}

#[derive(Debug, Clone, Default)]
pub struct MockPaymentGateway {
    decline_reason: Option<String>,
    captured: Arc<Mutex<HashMap<String, PaymentConfirmation>>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway that rejects every charge.
    pub fn declining(reason: impl Into<String>) -> Self {
        Self {
            decline_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(
        &self,
        amount: i64,
        currency: Currency,
        order_reference: &str,
    ) -> Result<PaymentConfirmation, PaymentError> {
        if amount <= 0 {
            return Err(PaymentError::InvalidAmount(amount));
        }
        if let Some(reason) = &self.decline_reason {
            tracing::info!(order_reference, amount, "Mock payment declined");
            return Err(PaymentError::Declined(reason.clone()));
        }

        let mut captured = self
            .captured
            .lock()
            .map_err(|e| PaymentError::Unavailable(e.to_string()))?;
        if let Some(previous) = captured.get(order_reference) {
            tracing::info!(
                order_reference,
                reference = %previous.reference,
                "Mock payment replayed"
            );
            return Ok(previous.clone());
        }

        let confirmation = PaymentConfirmation {
            reference: format!("mock_pay_{}", Uuid::new_v4().simple()),
            amount,
            currency,
        };
        tracing::info!(
            order_reference,
            amount,
            currency = currency.code(),
            reference = %confirmation.reference,
            "Mock payment captured"
        );
        captured.insert(order_reference.to_string(), confirmation.clone());

        Ok(confirmation)
    }
}
