use std::sync::Arc;

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use vr_booking_server::config::Config;
use vr_booking_server::routes::create_routes;
use vr_booking_server::services::payment::MockPaymentGateway;
use vr_booking_server::state::AppState;
use vr_booking_server::store::{BookingStore, InMemoryBookingStore, PgBookingStore};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let store: Arc<dyn BookingStore> = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Successfully connected to database");

            sqlx::migrate!()
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            tracing::info!("Migrations run successfully");
            Arc::new(PgBookingStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, bookings are kept in memory only");
            Arc::new(InMemoryBookingStore::new())
        }
    };

    if config.quantity_ticket_type_id.is_none() {
        tracing::warn!("QUANTITY_TICKET_TYPE_ID not set, booking by quantity is disabled");
    }

    let state = AppState::new(
        store,
        Arc::new(MockPaymentGateway::new()),
        config.quantity_booking(),
        config.currency,
    );
    let app = create_routes(state, &config);

    let addr = config.socket_addr();
    tracing::info!(currency = %config.currency.code(), "🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
