//! Public booking endpoints.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use super::tickets_response;
use crate::models::CreateRegistrationPayload;
use crate::services::booking::{self, QuoteRequest};
use crate::services::issuance::IssuanceOutcome;
use crate::services::pricing::PricingQuote;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub async fn quote(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> Result<Response, AppError> {
    let pricing = booking::quote(
        state.store.as_ref(),
        &state.quantity_booking,
        &request,
        Utc::now(),
    )
    .await?;
    Ok(success(
        PricingQuote::new(pricing, state.currency),
        "Quote calculated",
    ))
}

pub async fn create_registration(
    State(state): State<AppState>,
    Json(payload): Json<CreateRegistrationPayload>,
) -> Result<Response, AppError> {
    let details = booking::submit_registration(
        state.store.as_ref(),
        &state.quantity_booking,
        payload,
        Utc::now(),
    )
    .await?;
    Ok(created(details, "Registration received"))
}

pub async fn get_registration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let details = state
        .store
        .get_registration(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Registration {id}")))?;
    Ok(success(details, "Registration found"))
}

pub async fn pay_registration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let outcome = booking::pay_registration(
        state.store.as_ref(),
        state.gateway.as_ref(),
        state.currency,
        id,
    )
    .await?;
    Ok(tickets_response(id, outcome))
}

pub async fn registration_tickets(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    if state.store.get_registration(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Registration {id}")));
    }
    let tickets = state.store.list_tickets_for_registration(id).await?;
    Ok(tickets_response(
        id,
        IssuanceOutcome {
            tickets,
            newly_issued: false,
        },
    ))
}
