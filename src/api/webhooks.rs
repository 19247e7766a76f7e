use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::api::AppState;
use crate::error::AppResult;

/// Gateway callback; authenticated by the provider's body signature
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let provider = state.payments.provider(&provider_name).await?;
    let signature = headers
        .get(provider.signature_header())
        .and_then(|value| value.to_str().ok());

    let outcome = state
        .checkout
        .handle_webhook(&provider_name, &body, signature)
        .await?;
    info!(provider = %provider_name, outcome = ?outcome, "Webhook processed");

    Ok(Json(json!({ "received": true })))
}
