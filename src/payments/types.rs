//! Payment provider types and data structures
//!
//! Common types shared by the provider registry, the payment service and the
//! checkout flow. Amounts are always expressed in major currency units here;
//! conversion to a gateway's smallest unit happens inside each provider.

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{AppError, AppResult};

static CURRENCY_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("currency regex is valid"));

/// Ways a customer can pay on a provider's hosted checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Bank,
    MobileMoney,
    Crypto,
    Ussd,
    Qr,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Bank => "bank",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::Ussd => "ussd",
            PaymentMethod::Qr => "qr",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription plan level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Basic,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
        }
    }

    /// Monthly price in major units. Premium is 9.99, every other tier 4.99.
    pub fn price(&self) -> Decimal {
        match self {
            Tier::Premium => Decimal::new(999, 2),
            _ => Decimal::new(499, 2),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Tier::Free => "Free",
            Tier::Basic => "Basic",
            Tier::Premium => "Premium",
        }
    }

    pub fn features(&self) -> TierFeatures {
        match self {
            Tier::Free => TierFeatures {
                max_birthdays: 10,
                notifications: false,
                custom_categories: false,
                export_data: true,
                remove_ads: false,
                priority_support: false,
            },
            Tier::Basic => TierFeatures {
                max_birthdays: 50,
                notifications: true,
                custom_categories: true,
                export_data: true,
                remove_ads: true,
                priority_support: false,
            },
            Tier::Premium => TierFeatures {
                max_birthdays: 500,
                notifications: true,
                custom_categories: true,
                export_data: true,
                remove_ads: true,
                priority_support: true,
            },
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "basic" => Ok(Tier::Basic),
            "premium" => Ok(Tier::Premium),
            other => Err(AppError::validation(format!("Unknown tier '{}'", other))),
        }
    }
}

/// Feature entitlements unlocked by a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierFeatures {
    pub max_birthdays: u32,
    pub notifications: bool,
    pub custom_categories: bool,
    pub export_data: bool,
    pub remove_ads: bool,
    pub priority_support: bool,
}

/// Per-provider credentials and capabilities
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProviderConfig {
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub supported_methods: BTreeSet<PaymentMethod>,
    #[serde(default)]
    pub supported_currencies: BTreeSet<String>,
    #[serde(default)]
    pub test_mode: bool,
}

impl PaymentProviderConfig {
    /// A provider is usable only when enabled and every API key, including
    /// the provider's required ones, holds a non-empty value.
    pub fn is_usable(&self, required_keys: &[&str]) -> bool {
        self.enabled
            && required_keys.iter().all(|key| self.api_keys.contains_key(*key))
            && self.api_keys.values().all(|value| !value.trim().is_empty())
    }

    pub fn api_key(&self, key: &str) -> Option<&str> {
        self.api_keys
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Process-wide payment configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfig {
    pub providers: BTreeMap<String, PaymentProviderConfig>,
    pub default_provider: String,
    pub default_currency: String,
}

impl PaymentConfig {
    pub fn provider(&self, name: &str) -> Option<&PaymentProviderConfig> {
        self.providers.get(name)
    }

    pub fn validate(&self) -> AppResult<()> {
        if !self.providers.contains_key(&self.default_provider) {
            return Err(AppError::validation(format!(
                "Default provider '{}' is not configured",
                self.default_provider
            )));
        }

        if !CURRENCY_CODE.is_match(&self.default_currency) {
            return Err(AppError::validation(format!(
                "Default currency must be an ISO 4217 code, got '{}'",
                self.default_currency
            )));
        }

        for (name, provider) in &self.providers {
            if let Some(code) = provider
                .supported_currencies
                .iter()
                .find(|code| !CURRENCY_CODE.is_match(code))
            {
                return Err(AppError::validation(format!(
                    "Provider '{}' lists invalid currency code '{}'",
                    name, code
                )));
            }
        }

        Ok(())
    }
}

/// Input for starting a payment with any provider
#[derive(Debug, Clone)]
pub struct CreatePaymentOptions {
    /// Amount in major currency units
    pub amount: Decimal,
    pub currency: String,
    pub customer_email: String,
    pub customer_name: String,
    pub description: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub success_url: String,
    pub cancel_url: String,
    pub payment_method: Option<PaymentMethod>,
}

/// Why a payment result is a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentFailure {
    /// Provider unknown, disabled or misconfigured
    Configuration,
    /// The gateway rejected the call or could not be reached
    Upstream,
}

/// Outcome of a create-payment call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub success: bool,
    pub payment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub provider_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub failure: Option<PaymentFailure>,
}

impl PaymentResult {
    pub fn created<P, I, U>(provider_name: P, payment_id: I, redirect_url: U) -> Self
    where
        P: Into<String>,
        I: Into<String>,
        U: Into<String>,
    {
        Self {
            success: true,
            payment_id: payment_id.into(),
            redirect_url: Some(redirect_url.into()),
            provider_name: provider_name.into(),
            error: None,
            failure: None,
        }
    }

    pub fn failed<P: Into<String>, E: Into<String>>(
        provider_name: P,
        failure: PaymentFailure,
        error: E,
    ) -> Self {
        Self {
            success: false,
            payment_id: String::new(),
            redirect_url: None,
            provider_name: provider_name.into(),
            error: Some(error.into()),
            failure: Some(failure),
        }
    }

    /// Convert a failed result into the matching application error
    pub fn into_error(self) -> AppError {
        let message = self
            .error
            .unwrap_or_else(|| "Payment creation failed".to_string());
        match self.failure {
            Some(PaymentFailure::Configuration) => AppError::configuration(message),
            _ => AppError::upstream(self.provider_name, message),
        }
    }
}

/// Input for checking a payment with its provider
#[derive(Debug, Clone)]
pub struct VerifyPaymentOptions {
    /// Reference returned by `create_payment`
    pub payment_id: String,
    pub provider_name: String,
    /// Reference from the return redirect; wins over `payment_id` when present
    pub transaction_id: Option<String>,
}

/// Lifecycle status of a payment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Successful => "successful",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "successful" => Ok(PaymentStatus::Successful),
            "failed" => Ok(PaymentStatus::Failed),
            "canceled" => Ok(PaymentStatus::Canceled),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// Outcome of a verify-payment call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResult {
    /// False only when the gateway could not be asked
    pub success: bool,
    /// True only when the gateway explicitly reported success
    pub verified: bool,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Reference of the transaction the gateway actually reported on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Amount the gateway charged, in major units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyPaymentResult {
    pub fn settled(status: PaymentStatus, metadata: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            verified: status == PaymentStatus::Successful,
            status,
            metadata,
            reference: None,
            amount: None,
            error: None,
        }
    }

    pub fn with_charge(mut self, reference: Option<String>, amount: Option<Decimal>) -> Self {
        self.reference = reference;
        self.amount = amount;
        self
    }

    pub fn unreachable<E: Into<String>>(error: E) -> Self {
        Self {
            success: false,
            verified: false,
            status: PaymentStatus::Failed,
            metadata: None,
            reference: None,
            amount: None,
            error: Some(error.into()),
        }
    }
}

/// Typed metadata stored with every payment intent.
///
/// Serialized flat: `{"tier": "basic", "callbackId": "cb-...", ...extra}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMetadata {
    pub tier: Tier,
    pub callback_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IntentMetadata {
    pub fn new<S: Into<String>>(tier: Tier, callback_id: S) -> Self {
        Self {
            tier,
            callback_id: callback_id.into(),
            extra: serde_json::Map::new(),
        }
    }
}
