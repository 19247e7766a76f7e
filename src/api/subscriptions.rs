use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::api::auth::AuthenticatedUser;
use crate::api::AppState;
use crate::error::AppResult;
use crate::payments::checkout::SubscriptionSummary;

pub async fn current_subscription(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> AppResult<Json<SubscriptionSummary>> {
    Ok(Json(
        state.checkout.current_subscription(&user.user_id).await?,
    ))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> AppResult<Json<Value>> {
    state.checkout.cancel_subscription(&user.user_id).await?;
    Ok(Json(json!({ "success": true })))
}
