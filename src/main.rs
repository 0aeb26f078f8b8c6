use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use studiobook::config::AppConfig;
use studiobook::db::{self, SqliteStore};
use studiobook::handlers;
use studiobook::services::payments::local::LocalGateway;
use studiobook::services::payments::stripe::StripeGateway;
use studiobook::services::payments::PaymentGateway;
use studiobook::services::sweeper;
use studiobook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;
    let store = Arc::new(SqliteStore::new(conn, config.store_timeout));

    let gateway: Box<dyn PaymentGateway> = match config.payment_gateway.as_str() {
        "stripe" => {
            anyhow::ensure!(
                !config.gateway_api_key.is_empty(),
                "GATEWAY_API_KEY must be set when PAYMENT_GATEWAY=stripe"
            );
            tracing::info!("using Stripe payment gateway (url: {})", config.gateway_base_url);
            Box::new(StripeGateway::new(
                config.gateway_api_key.clone(),
                config.gateway_base_url.clone(),
                config.checkout_success_url.clone(),
                config.checkout_cancel_url.clone(),
            ))
        }
        _ => {
            tracing::warn!("using local payment gateway, no real charges will be made");
            Box::new(LocalGateway)
        }
    };

    if config.webhook_secret.is_empty() {
        tracing::warn!("WEBHOOK_SECRET is empty, payment webhooks will not be authenticated");
    }

    let state = Arc::new(AppState::new(store, config.clone(), gateway));

    tokio::spawn(sweeper::run_sweeper(Arc::clone(&state)));

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/webhook/payments", post(handlers::webhook::payment_webhook))
        .route("/api/availability", get(handlers::bookings::check_availability))
        .route("/api/holds", post(handlers::bookings::create_hold))
        .route("/api/bookings/:id", get(handlers::bookings::get_booking))
        .route(
            "/api/bookings/:id/events",
            get(handlers::bookings::events_stream),
        )
        .route("/api/admin/studios/:id", put(handlers::admin::put_studio))
        .route(
            "/api/admin/studios/:id/availability",
            get(handlers::admin::get_availability).put(handlers::admin::put_availability),
        )
        .route("/api/admin/services", post(handlers::admin::create_service))
        .route("/api/admin/services/:id", put(handlers::admin::update_service))
        .route("/api/admin/bookings", get(handlers::admin::get_bookings))
        .route(
            "/api/admin/bookings/:id/cancel",
            post(handlers::admin::cancel_booking),
        )
        .route(
            "/api/admin/bookings/:id/status",
            post(handlers::admin::advance_booking),
        )
        .route(
            "/api/admin/bookings/:id/payment-events",
            get(handlers::admin::get_payment_events),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
