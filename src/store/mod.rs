//! Persistence boundary.
//!
//! Pricing and issuance never talk to a database directly; they go through
//! [`BookingStore`]. Implementations are responsible for serializing the two
//! write paths that can race: stock decrements and coupon redemptions.

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{
    Client, ClientDetails, Coupon, NewRegistration, PageParams, Paginated, Registration,
    RegistrationDetails, RegistrationStatus, Ticket, TicketType, UpdateTicketTypePayload,
};
use crate::services::issuance::{IssuanceOutcome, IssuancePlan};
use crate::utils::error::AppError;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryBookingStore;
pub use postgres::PgBookingStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketTypeFilter {
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationFilter {
    pub status: Option<RegistrationStatus>,
    /// Case-insensitive substring of the registration email.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientFilter {
    /// Case-insensitive substring of email, first or last name.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketFilter {
    pub registration_id: Option<Uuid>,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn list_ticket_types(
        &self,
        filter: &TicketTypeFilter,
        page: &PageParams,
    ) -> Result<Paginated<TicketType>, AppError>;

    async fn find_ticket_types(&self, ids: &[Uuid]) -> Result<Vec<TicketType>, AppError>;

    async fn create_ticket_type(&self, ticket_type: &TicketType) -> Result<TicketType, AppError>;

    /// Applies the patch and re-checks the ticket type invariants before
    /// saving. `NotFound` if the id is unknown.
    async fn update_ticket_type(
        &self,
        id: Uuid,
        patch: &UpdateTicketTypePayload,
    ) -> Result<TicketType, AppError>;

    /// Looks a coupon up by code, ignoring case.
    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, AppError>;

    async fn count_coupon_redemptions(&self, coupon_id: Uuid, email: &str)
        -> Result<i64, AppError>;

    /// `Conflict` when the code is already taken.
    async fn create_coupon(&self, coupon: &Coupon) -> Result<Coupon, AppError>;

    async fn list_coupons(&self, page: &PageParams) -> Result<Paginated<Coupon>, AppError>;

    /// Inserts the client or refreshes its contact details, keyed by email.
    async fn upsert_client(&self, details: &ClientDetails) -> Result<Client, AppError>;

    async fn list_clients(
        &self,
        filter: &ClientFilter,
        page: &PageParams,
    ) -> Result<Paginated<Client>, AppError>;

    /// Persists a PENDING registration. When a coupon is attached its use is
    /// counted in the same atomic step, failing with `CouponExhausted` if the
    /// global or per-customer cap was reached in the meantime.
    async fn create_registration(
        &self,
        client_id: Uuid,
        registration: &NewRegistration,
    ) -> Result<RegistrationDetails, AppError>;

    async fn get_registration(&self, id: Uuid) -> Result<Option<RegistrationDetails>, AppError>;

    async fn list_registrations(
        &self,
        filter: &RegistrationFilter,
        page: &PageParams,
    ) -> Result<Paginated<Registration>, AppError>;

    /// Marks a PENDING registration as being paid, so that only one caller
    /// goes on to charge it. `Conflict` if it is not PENDING or another
    /// payment attempt already holds the claim.
    async fn claim_payment(&self, id: Uuid) -> Result<RegistrationDetails, AppError>;

    /// Drops the claim after a charge that did not go through. A no-op unless
    /// the registration is still PENDING.
    async fn release_payment_claim(&self, id: Uuid) -> Result<(), AppError>;

    /// Moves a registration to `next` if the transition is allowed from its
    /// current status, checked under the store's write lock. Cancelling
    /// releases the coupon use and is refused once tickets exist. Approving is
    /// refused while a payment attempt holds the registration.
    async fn transition_registration(
        &self,
        id: Uuid,
        next: RegistrationStatus,
        payment_reference: Option<&str>,
    ) -> Result<Registration, AppError>;

    async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: &PageParams,
    ) -> Result<Paginated<Ticket>, AppError>;

    async fn list_tickets_for_registration(
        &self,
        registration_id: Uuid,
    ) -> Result<Vec<Ticket>, AppError>;

    /// Applies an issuance plan atomically: either every stock decrement,
    /// every ticket row and the issued stamp are written, or nothing is.
    /// A registration that was issued concurrently yields its existing
    /// tickets with `newly_issued == false`.
    async fn commit_issuance(&self, plan: &IssuancePlan) -> Result<IssuanceOutcome, AppError>;
}

fn not_payable(status: RegistrationStatus) -> AppError {
    AppError::Conflict(format!("Registration is {status} and cannot be paid"))
}

fn payment_in_progress() -> AppError {
    AppError::Conflict("A payment for this registration is already in progress".to_string())
}

fn transition_conflict(current: RegistrationStatus, next: RegistrationStatus) -> AppError {
    AppError::Conflict(format!(
        "Registration is {current} and cannot become {next}"
    ))
}
