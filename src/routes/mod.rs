use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, Config};
use crate::handlers::{admin, booking, health_check};
use crate::state::AppState;

pub fn create_routes(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer(config.is_production))
        .layer(create_cors_layer(&config.cors_allowed_origins))
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/pricing/quote", post(booking::quote))
        .route("/registrations", post(booking::create_registration))
        .route("/registrations/:id", get(booking::get_registration))
        .route("/registrations/:id/pay", post(booking::pay_registration))
        .route("/registrations/:id/tickets", get(booking::registration_tickets))
        .nest("/admin", admin_routes())
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/clients", get(admin::list_clients))
        .route(
            "/ticket-types",
            get(admin::list_ticket_types).post(admin::create_ticket_type),
        )
        .route("/ticket-types/:id", put(admin::update_ticket_type))
        .route(
            "/coupons",
            get(admin::list_coupons).post(admin::create_coupon),
        )
        .route("/registrations", get(admin::list_registrations))
        .route("/registrations/:id/approve", post(admin::approve_registration))
        .route("/registrations/:id/cancel", post(admin::cancel_registration))
        .route("/registrations/:id/issue", post(admin::issue_tickets))
        .route("/tickets", get(admin::list_tickets))
}
