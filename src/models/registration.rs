use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "registration_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Paid,
    Cancelled,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "PENDING",
            RegistrationStatus::Approved => "APPROVED",
            RegistrationStatus::Paid => "PAID",
            RegistrationStatus::Cancelled => "CANCELLED",
        }
    }

    /// Whether tickets may be generated for a registration in this state.
    pub fn is_issuable(&self) -> bool {
        matches!(self, RegistrationStatus::Approved | RegistrationStatus::Paid)
    }

    pub fn can_transition_to(&self, next: RegistrationStatus) -> bool {
        use RegistrationStatus::*;
        matches!(
            (self, next),
            (Pending, Paid) | (Pending, Approved) | (Pending, Cancelled) | (Approved, Cancelled)
        )
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: Uuid,
    pub client_id: Uuid,
    pub email: String,
    pub status: RegistrationStatus,
    pub is_ems_client: bool,
    pub applied_coupon_code: Option<String>,
    pub original_amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub payment_reference: Option<String>,
    /// Set when a payment attempt claims the registration; at most one
    /// attempt holds it at a time.
    pub payment_started_at: Option<DateTime<Utc>>,
    pub tickets_issued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationLine {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price_in_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDetails {
    #[serde(flatten)]
    pub registration: Registration,
    pub lines: Vec<RegistrationLine>,
}

/// A selected quantity of one ticket type, as submitted by the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRegistrationPayload {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub is_ems_client: bool,
    /// Flat-price booking by quantity; mutually exclusive with `lines`.
    pub quantity: Option<i32>,
    #[serde(default)]
    pub lines: Vec<CartLine>,
    pub coupon_code: Option<String>,
}

/// Everything the store needs to persist a priced, validated registration.
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub id: Uuid,
    pub email: String,
    pub is_ems_client: bool,
    pub lines: Vec<RegistrationLine>,
    pub applied_coupon_code: Option<String>,
    pub coupon_id: Option<Uuid>,
    pub original_amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
}
