use axum::response::Response;
use serde::Serialize;
use uuid::Uuid;

use crate::models::Ticket;
use crate::services::issuance::IssuanceOutcome;
use crate::utils::response::success;

pub mod admin;
pub mod booking;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "vr-booking-api",
    };

    success(payload, "Health check successful")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TicketsPayload {
    registration_id: Uuid,
    newly_issued: bool,
    tickets: Vec<Ticket>,
}

fn tickets_response(registration_id: Uuid, outcome: IssuanceOutcome) -> Response {
    let message = if outcome.newly_issued {
        "Tickets issued"
    } else {
        "Tickets were already issued"
    };
    success(
        TicketsPayload {
            registration_id,
            newly_issued: outcome.newly_issued,
            tickets: outcome.tickets,
        },
        message,
    )
}
