use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::api::auth::AuthenticatedUser;
use crate::api::extract::ApiJson;
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::payments::checkout::{CheckoutRequest, CheckoutSession, VerificationOutcome};
use crate::payments::types::{PaymentMethod, VerifyPaymentOptions};

pub async fn create_payment(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(request): ApiJson<CheckoutRequest>,
) -> AppResult<Json<CheckoutSession>> {
    let session = state.checkout.create_checkout(&user, request).await?;
    Ok(Json(session))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub logo: String,
    pub supported_methods: Vec<PaymentMethod>,
    pub supported_currencies: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderInfo>,
    /// Payment methods keyed by provider name
    pub methods: BTreeMap<String, Vec<PaymentMethod>>,
    pub default_currency: String,
}

pub async fn list_providers(
    State(state): State<AppState>,
    AuthenticatedUser(_): AuthenticatedUser,
) -> AppResult<Json<ProvidersResponse>> {
    let providers = state
        .payments
        .available_providers()
        .await?
        .iter()
        .map(|provider| ProviderInfo {
            name: provider.name().to_string(),
            display_name: provider.display_name().to_string(),
            description: provider.description().to_string(),
            logo: provider.logo().to_string(),
            supported_methods: provider.payment_methods(),
            supported_currencies: provider.supported_currencies(),
        })
        .collect();

    Ok(Json(ProvidersResponse {
        providers,
        methods: state.payments.all_payment_methods().await?,
        default_currency: state.payments.default_currency().await?,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub payment_id: String,
    pub provider_name: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

pub async fn verify_payment(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(request): ApiJson<VerifyRequest>,
) -> AppResult<Json<VerificationOutcome>> {
    if request.payment_id.trim().is_empty() || request.provider_name.trim().is_empty() {
        return Err(AppError::validation(
            "paymentId and providerName are required",
        ));
    }

    let outcome = state
        .checkout
        .verify(
            &user.user_id,
            VerifyPaymentOptions {
                payment_id: request.payment_id,
                provider_name: request.provider_name,
                transaction_id: request.transaction_id.filter(|id| !id.is_empty()),
            },
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackQuery {
    #[serde(default)]
    pub callback_id: Option<String>,
}

pub async fn resolve_callback(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Json<Value>> {
    let callback_id = query
        .callback_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::validation("callbackId is required"))?;

    let intent = state
        .checkout
        .find_by_callback(&user.user_id, &callback_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "paymentIntent": intent,
    })))
}
