//! Ticket issuance.
//!
//! Planning is pure: it turns a registration into ticket rows and per-type
//! stock decrements. Applying a plan is delegated to
//! [`BookingStore::commit_issuance`], which must perform the stock decrements,
//! ticket inserts and the "issued" stamp as one atomic unit.

use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use crate::models::{NewTicket, RegistrationDetails, Ticket, TicketType};
use crate::store::BookingStore;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDecrement {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuancePlan {
    pub registration_id: Uuid,
    /// One entry per ticket type, ordered by id so stores lock rows in a
    /// consistent order.
    pub decrements: Vec<StockDecrement>,
    pub tickets: Vec<NewTicket>,
}

#[derive(Debug, Clone)]
pub struct IssuanceOutcome {
    pub tickets: Vec<Ticket>,
    /// `false` when the registration already had tickets and nothing changed.
    pub newly_issued: bool,
}

/// `VR-<registration id as 32 upper-case hex digits>-007`.
///
/// The whole registration id goes into the code, so codes are unique exactly
/// when `(registration_id, sequence_number)` is.
pub fn ticket_code(registration_id: Uuid, sequence_number: i32) -> String {
    format!(
        "VR-{}-{:03}",
        registration_id.simple().to_string().to_uppercase(),
        sequence_number
    )
}

pub fn ensure_issuable(details: &RegistrationDetails) -> Result<(), AppError> {
    let registration = &details.registration;
    if registration.status.is_issuable() {
        Ok(())
    } else {
        Err(AppError::NotApproved {
            registration_id: registration.id,
            status: registration.status,
        })
    }
}

pub fn plan_issuance(details: &RegistrationDetails) -> Result<IssuancePlan, AppError> {
    ensure_issuable(details)?;

    let registration_id = details.registration.id;
    let mut per_type: BTreeMap<Uuid, i32> = BTreeMap::new();
    let mut tickets = Vec::new();
    let mut sequence_number = 0;

    for line in &details.lines {
        if line.quantity <= 0 {
            return Err(AppError::ValidationError(format!(
                "Registration {registration_id} has a non-positive quantity for ticket type {}",
                line.ticket_type_id
            )));
        }

        let total = per_type.entry(line.ticket_type_id).or_insert(0);
        *total = total.checked_add(line.quantity).ok_or_else(|| {
            AppError::ValidationError("Ticket quantity is out of range".to_string())
        })?;

        for _ in 0..line.quantity {
            sequence_number += 1;
            tickets.push(NewTicket {
                id: Uuid::new_v4(),
                ticket_type_id: line.ticket_type_id,
                sequence_number,
                ticket_code: ticket_code(registration_id, sequence_number),
            });
        }
    }

    if tickets.is_empty() {
        return Err(AppError::ValidationError(format!(
            "Registration {registration_id} has no tickets to issue"
        )));
    }

    Ok(IssuancePlan {
        registration_id,
        decrements: per_type
            .into_iter()
            .map(|(ticket_type_id, quantity)| StockDecrement {
                ticket_type_id,
                quantity,
            })
            .collect(),
        tickets,
    })
}

/// Advisory check against a stock snapshot. The store repeats it atomically
/// when committing.
pub fn check_stock(plan: &IssuancePlan, ticket_types: &[TicketType]) -> Result<(), AppError> {
    for decrement in &plan.decrements {
        let available = ticket_types
            .iter()
            .find(|t| t.id == decrement.ticket_type_id)
            .map_or(0, |t| t.available_stock);

        if available < decrement.quantity {
            return Err(AppError::InsufficientStock {
                ticket_type_id: decrement.ticket_type_id,
                requested: i64::from(decrement.quantity),
                available: i64::from(available),
            });
        }
    }
    Ok(())
}

/// Issues tickets for a registration at most once.
///
/// Calling this again for a registration that already has tickets returns
/// those tickets and changes nothing.
pub async fn issue_tickets(
    store: &dyn BookingStore,
    registration_id: Uuid,
) -> Result<IssuanceOutcome, AppError> {
    let details = store
        .get_registration(registration_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Registration {registration_id}")))?;

    if details.registration.tickets_issued_at.is_some() {
        let tickets = store.list_tickets_for_registration(registration_id).await?;
        return Ok(IssuanceOutcome {
            tickets,
            newly_issued: false,
        });
    }

    let plan = plan_issuance(&details)?;

    let ids: Vec<Uuid> = plan.decrements.iter().map(|d| d.ticket_type_id).collect();
    let ticket_types = store.find_ticket_types(&ids).await?;
    check_stock(&plan, &ticket_types)?;

    let outcome = store.commit_issuance(&plan).await?;

    if outcome.newly_issued {
        info!(
            %registration_id,
            email = %details.registration.email,
            tickets = outcome.tickets.len(),
            "Tickets issued"
        );
    }

    Ok(outcome)
}
