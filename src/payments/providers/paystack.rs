//! Paystack payment provider implementation
//!
//! Hosted-checkout integration with Paystack's transaction API. Subscription
//! charges are initialized server-side, the customer completes payment on
//! Paystack's page, and the transaction is verified by reference afterwards.

use crate::error::{AppError, AppResult};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    CreatePaymentOptions, PaymentConfig, PaymentFailure, PaymentMethod, PaymentProviderConfig,
    PaymentResult, PaymentStatus, VerifyPaymentOptions, VerifyPaymentResult,
};
use crate::payments::webhook::{self, WebhookEvent};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// Registry key for this provider
pub const PAYSTACK: &str = "paystack";

const REQUIRED_KEYS: &[&str] = &["secretKey"];

/// Transport settings for the Paystack API
#[derive(Debug, Clone)]
pub struct PaystackConfig {
    /// Paystack API base URL (defaults to https://api.paystack.co)
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.paystack.co".to_string(),
            timeout_secs: 30,
        }
    }
}

impl PaystackConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_url = std::env::var("PAYSTACK_BASE_URL").unwrap_or(defaults.base_url);

        let timeout_secs = std::env::var("PAYSTACK_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        Self {
            base_url,
            timeout_secs,
        }
    }
}

/// Paystack payment provider
pub struct PaystackProvider {
    config: PaystackConfig,
    settings: PaymentProviderConfig,
    client: Client,
}

impl PaystackProvider {
    /// Create a new Paystack provider instance
    pub fn new(config: PaystackConfig, settings: PaymentProviderConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                AppError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            config,
            settings,
            client,
        })
    }

    /// Build the provider from the `paystack` entry of the payment config.
    /// A missing entry yields a disabled provider.
    pub fn from_payment_config(
        config: PaystackConfig,
        payment_config: &PaymentConfig,
    ) -> AppResult<Self> {
        let settings = payment_config.provider(PAYSTACK).cloned().unwrap_or_default();
        Self::new(config, settings)
    }

    fn secret_key(&self) -> &str {
        self.settings.api_key("secretKey").unwrap_or_default()
    }

    fn webhook_key(&self) -> &str {
        self.settings
            .webhook_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .unwrap_or_else(|| self.secret_key())
    }

    /// Paystack expects the integer count of the currency's smallest unit
    pub fn to_minor_units(amount: Decimal) -> Option<i64> {
        (amount * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }

    fn channel(method: PaymentMethod) -> Option<&'static str> {
        match method {
            PaymentMethod::Card => Some("card"),
            PaymentMethod::Bank => Some("bank"),
            PaymentMethod::MobileMoney => Some("mobile_money"),
            PaymentMethod::Ussd => Some("ussd"),
            PaymentMethod::Qr => Some("qr"),
            PaymentMethod::Crypto => None,
        }
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        self.client
            .request(method, url)
            .bearer_auth(self.secret_key())
            .header("Content-Type", "application/json")
    }

    /// Send an authenticated request and decode Paystack's envelope.
    /// Every failure is flattened into a message suitable for a result's `error`.
    async fn send<T>(&self, request: RequestBuilder) -> Result<PaystackResponse<T>, String>
    where
        T: DeserializeOwned + Default,
    {
        let response = request.send().await.map_err(|e| {
            error!("Paystack request failed: {}", e);
            e.to_string()
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!("Failed to read Paystack response: {}", e);
            e.to_string()
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<PaystackErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            error!("Paystack API error: status={}, message={}", status, message);
            return Err(message);
        }

        serde_json::from_str::<PaystackResponse<T>>(&body).map_err(|e| {
            error!("Failed to parse Paystack response: {}", e);
            format!("Invalid response format: {}", e)
        })
    }
}

#[async_trait]
impl PaymentProvider for PaystackProvider {
    fn name(&self) -> &str {
        PAYSTACK
    }

    fn display_name(&self) -> &str {
        "Paystack"
    }

    fn description(&self) -> &str {
        "Accept payments via cards, bank transfers, and USSD"
    }

    fn logo(&self) -> &str {
        "/payment-logos/paystack.svg"
    }

    async fn create_payment(&self, options: &CreatePaymentOptions) -> PaymentResult {
        let amount = match Self::to_minor_units(options.amount) {
            Some(amount) if amount > 0 => amount,
            _ => {
                return PaymentResult::failed(
                    PAYSTACK,
                    PaymentFailure::Upstream,
                    format!("Invalid amount: {}", options.amount),
                )
            }
        };

        info!(
            "Initiating Paystack payment: {} {} ({} minor units)",
            options.amount, options.currency, amount
        );

        let mut metadata = options.metadata.clone();
        metadata.insert(
            "custom_fields".to_string(),
            serde_json::json!([{
                "display_name": "Customer Name",
                "variable_name": "customer_name",
                "value": options.customer_name,
            }]),
        );

        let mut payload = serde_json::json!({
            "email": options.customer_email,
            "amount": amount,
            "currency": options.currency,
            "callback_url": options.success_url,
            "metadata": metadata,
        });

        if let Some(channel) = options.payment_method.and_then(Self::channel) {
            payload["channels"] = serde_json::json!([channel]);
        }

        let request = self
            .request(reqwest::Method::POST, "/transaction/initialize")
            .json(&payload);

        match self.send::<Option<PaystackInitializeData>>(request).await {
            Ok(PaystackResponse {
                status: true,
                data: Some(data),
                ..
            }) => {
                info!(
                    "Paystack payment initiated successfully: reference={}",
                    data.reference
                );
                PaymentResult::created(PAYSTACK, data.reference, data.authorization_url)
            }
            Ok(response) => {
                let message = response
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Payment initialization failed".to_string());
                warn!("Paystack rejected payment initialization: {}", message);
                PaymentResult::failed(PAYSTACK, PaymentFailure::Upstream, message)
            }
            Err(message) => PaymentResult::failed(PAYSTACK, PaymentFailure::Upstream, message),
        }
    }

    async fn verify_payment(&self, options: &VerifyPaymentOptions) -> VerifyPaymentResult {
        let reference = options
            .transaction_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&options.payment_id);

        info!("Verifying Paystack payment: reference={}", reference);

        let request = self.request(
            reqwest::Method::GET,
            &format!("/transaction/verify/{}", reference),
        );

        let response = match self.send::<Option<PaystackVerifyData>>(request).await {
            Ok(response) => response,
            Err(message) => return VerifyPaymentResult::unreachable(message),
        };

        let gateway_status = response
            .data
            .as_ref()
            .map(|data| data.status.as_str())
            .unwrap_or_default();

        info!(
            "Paystack payment verified: reference={}, status={}",
            reference, gateway_status
        );

        match (response.status, gateway_status) {
            (true, "success") => {
                let (metadata, charged_reference, amount) = match response.data {
                    Some(data) => (
                        data.metadata,
                        data.reference,
                        data.amount.map(|minor| Decimal::new(minor, 2)),
                    ),
                    None => (None, None, None),
                };
                let metadata = metadata
                    .filter(|m| m.is_object())
                    .unwrap_or_else(|| serde_json::json!({}));
                VerifyPaymentResult::settled(PaymentStatus::Successful, Some(metadata))
                    .with_charge(charged_reference, amount)
            }
            (_, "abandoned") => VerifyPaymentResult::settled(PaymentStatus::Canceled, None),
            _ => VerifyPaymentResult::settled(PaymentStatus::Failed, None),
        }
    }

    fn payment_methods(&self) -> Vec<PaymentMethod> {
        self.settings.supported_methods.iter().copied().collect()
    }

    fn supported_currencies(&self) -> Vec<String> {
        self.settings.supported_currencies.iter().cloned().collect()
    }

    fn is_enabled(&self) -> bool {
        self.settings.is_usable(REQUIRED_KEYS)
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let key = self.webhook_key();
        if key.is_empty() {
            warn!("Paystack webhook received but no signing key is configured");
            return false;
        }
        webhook::verify_sha512(key, payload, signature)
    }

    fn signature_header(&self) -> &'static str {
        "x-paystack-signature"
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> AppResult<WebhookEvent> {
        let event: PaystackWebhook = serde_json::from_slice(payload)
            .map_err(|e| AppError::validation(format!("Invalid webhook payload: {}", e)))?;

        match (event.event.as_str(), event.data.and_then(|d| d.reference)) {
            ("charge.success", Some(reference)) => Ok(WebhookEvent::ChargeSucceeded { reference }),
            ("charge.success", None) => Err(AppError::validation(
                "charge.success webhook is missing data.reference",
            )),
            (other, _) => Ok(WebhookEvent::Ignored {
                event: other.to_string(),
            }),
        }
    }
}

// Paystack API response wrapper
#[derive(Debug, Deserialize)]
struct PaystackResponse<T> {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: T,
}

#[derive(Debug, Deserialize)]
struct PaystackErrorBody {
    #[serde(default)]
    message: Option<String>,
}

// Initialize transaction response
#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    reference: String,
}

// Verify transaction response
#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    status: String,
    #[serde(default)]
    reference: Option<String>,
    /// Minor units
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PaystackWebhook {
    event: String,
    #[serde(default)]
    data: Option<PaystackWebhookData>,
}

#[derive(Debug, Deserialize)]
struct PaystackWebhookData {
    #[serde(default)]
    reference: Option<String>,
}
