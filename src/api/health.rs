use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::api::{AppState, StorageBackend};

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub database: String,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let database = match &state.storage {
        StorageBackend::Memory => "memory",
        #[cfg(feature = "database")]
        StorageBackend::Postgres(pool) => match crate::database::health_check(pool).await {
            Ok(()) => "connected",
            Err(_) => "unavailable",
        },
    };

    let status = if database == "unavailable" {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version,
        environment: state.environment.clone(),
        database: database.to_string(),
    })
}
