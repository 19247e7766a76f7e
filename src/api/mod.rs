pub mod admin;
pub mod auth;
pub mod extract;
pub mod health;
pub mod payments;
pub mod subscriptions;
pub mod webhooks;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::database::session_repository::SessionRepository;
use crate::payments::{CheckoutFlow, PaymentService};

/// Where persistent state lives for this process
#[derive(Clone)]
pub enum StorageBackend {
    Memory,
    #[cfg(feature = "database")]
    Postgres(sqlx::PgPool),
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutFlow>,
    pub payments: Arc<PaymentService>,
    pub sessions: Arc<dyn SessionRepository>,
    pub storage: StorageBackend,
    pub environment: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/admin/payment-config",
            get(admin::get_payment_config).post(admin::save_payment_config),
        )
        .route("/api/payments/create", post(payments::create_payment))
        .route("/api/payments/providers", get(payments::list_providers))
        .route("/api/payments/verify", post(payments::verify_payment))
        .route("/api/payments/callback", get(payments::resolve_callback))
        .route("/api/webhooks/:provider", post(webhooks::receive_webhook))
        .route("/api/subscription", get(subscriptions::current_subscription))
        .route(
            "/api/subscription/cancel",
            post(subscriptions::cancel_subscription),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
