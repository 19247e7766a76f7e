use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::auth::AdminUser;
use crate::api::extract::ApiJson;
use crate::api::AppState;
use crate::error::AppResult;
use crate::payments::types::PaymentConfig;

pub async fn get_payment_config(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> AppResult<Json<Value>> {
    let config = state.payments.load_config().await?;
    Ok(Json(json!({
        "success": true,
        "config": config.as_ref(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct SaveConfigRequest {
    pub config: PaymentConfig,
}

pub async fn save_payment_config(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiJson(request): ApiJson<SaveConfigRequest>,
) -> AppResult<Json<Value>> {
    state.payments.save_config(request.config).await?;
    info!(admin = %admin.user_id, "Payment configuration updated");
    Ok(Json(json!({ "success": true })))
}
