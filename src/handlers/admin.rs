//! Back-office endpoints. Access control is expected in front of the service.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use super::tickets_response;
use crate::models::{
    CreateCouponPayload, CreateTicketTypePayload, PageParams, UpdateTicketTypePayload,
};
use crate::services::{booking, issuance};
use crate::state::AppState;
use crate::store::{ClientFilter, RegistrationFilter, TicketFilter, TicketTypeFilter};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub async fn list_clients(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(filter): Query<ClientFilter>,
) -> Result<Response, AppError> {
    let clients = state.store.list_clients(&filter, &page).await?;
    Ok(success(clients, "Clients retrieved"))
}

pub async fn list_ticket_types(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(filter): Query<TicketTypeFilter>,
) -> Result<Response, AppError> {
    let ticket_types = state.store.list_ticket_types(&filter, &page).await?;
    Ok(success(ticket_types, "Ticket types retrieved"))
}

pub async fn create_ticket_type(
    State(state): State<AppState>,
    Json(payload): Json<CreateTicketTypePayload>,
) -> Result<Response, AppError> {
    let ticket_type = payload.into_ticket_type(Utc::now())?;
    let ticket_type = state.store.create_ticket_type(&ticket_type).await?;
    tracing::info!(
        ticket_type_id = %ticket_type.id,
        name = %ticket_type.name,
        "Ticket type created"
    );
    Ok(created(ticket_type, "Ticket type created"))
}

pub async fn update_ticket_type(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateTicketTypePayload>,
) -> Result<Response, AppError> {
    let ticket_type = state.store.update_ticket_type(id, &patch).await?;
    Ok(success(ticket_type, "Ticket type updated"))
}

pub async fn list_coupons(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> Result<Response, AppError> {
    let coupons = state.store.list_coupons(&page).await?;
    Ok(success(coupons, "Coupons retrieved"))
}

pub async fn create_coupon(
    State(state): State<AppState>,
    Json(payload): Json<CreateCouponPayload>,
) -> Result<Response, AppError> {
    let coupon = payload.into_coupon(Utc::now())?;
    let coupon = state.store.create_coupon(&coupon).await?;
    tracing::info!(coupon_id = %coupon.id, code = %coupon.code, "Coupon created");
    Ok(created(coupon, "Coupon created"))
}

pub async fn list_registrations(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(filter): Query<RegistrationFilter>,
) -> Result<Response, AppError> {
    let registrations = state.store.list_registrations(&filter, &page).await?;
    Ok(success(registrations, "Registrations retrieved"))
}

pub async fn approve_registration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let registration = booking::approve_registration(state.store.as_ref(), id).await?;
    Ok(success(registration, "Registration approved"))
}

pub async fn cancel_registration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let registration = booking::cancel_registration(state.store.as_ref(), id).await?;
    Ok(success(registration, "Registration cancelled"))
}

pub async fn issue_tickets(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let outcome = issuance::issue_tickets(state.store.as_ref(), id).await?;
    Ok(tickets_response(id, outcome))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(filter): Query<TicketFilter>,
) -> Result<Response, AppError> {
    let tickets = state.store.list_tickets(&filter, &page).await?;
    Ok(success(tickets, "Tickets retrieved"))
}
