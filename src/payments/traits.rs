//! Payment provider trait definitions
//!
//! Defines the common interface that all payment providers must implement.

use crate::error::AppResult;
use crate::payments::types::{
    CreatePaymentOptions, PaymentMethod, PaymentResult, VerifyPaymentOptions, VerifyPaymentResult,
};
use crate::payments::webhook::WebhookEvent;
use async_trait::async_trait;

/// Trait for payment provider implementations
///
/// Callers select a provider by name through the
/// [`ProviderRegistry`](crate::payments::registry::ProviderRegistry) and only
/// ever talk to it through this trait, so adding a gateway means implementing
/// it and registering a constructor.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Registry key, e.g. `paystack`
    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    fn description(&self) -> &str;

    /// Path of the logo shown on the checkout page
    fn logo(&self) -> &str;

    /// Start a hosted-checkout transaction
    ///
    /// Remote failures are reported through a failed [`PaymentResult`]; this
    /// method never returns an error of its own.
    async fn create_payment(&self, options: &CreatePaymentOptions) -> PaymentResult;

    /// Ask the gateway for the authoritative status of a transaction
    ///
    /// # Arguments
    /// * `options` - payment reference, optionally overridden by the
    ///   transaction id from the return redirect
    async fn verify_payment(&self, options: &VerifyPaymentOptions) -> VerifyPaymentResult;

    fn payment_methods(&self) -> Vec<PaymentMethod>;

    fn supported_currencies(&self) -> Vec<String>;

    /// Whether the provider is enabled with all of its credentials present
    fn is_enabled(&self) -> bool;

    /// Verify that a webhook body was signed by the gateway
    ///
    /// # Arguments
    /// * `payload` - Raw webhook payload body
    /// * `signature` - Signature from webhook header
    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;

    /// Header carrying the webhook signature
    fn signature_header(&self) -> &'static str;

    /// Decode a verified webhook body
    fn parse_webhook_event(&self, payload: &[u8]) -> AppResult<WebhookEvent>;
}
