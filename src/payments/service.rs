//! Payment service
//!
//! Entry point for creating and verifying payments without knowing which
//! gateway handles them. Nothing here persists state.

use crate::error::{AppError, AppResult};
use crate::payments::config::PaymentConfigService;
use crate::payments::registry::ProviderRegistry;
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    CreatePaymentOptions, PaymentConfig, PaymentFailure, PaymentMethod, PaymentResult,
    VerifyPaymentOptions, VerifyPaymentResult,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct PaymentService {
    registry: Arc<ProviderRegistry>,
    config: Arc<PaymentConfigService>,
}

fn unavailable(name: &str) -> String {
    format!("Payment provider '{}' not found or not enabled", name)
}

impl PaymentService {
    pub fn new(registry: Arc<ProviderRegistry>, config: Arc<PaymentConfigService>) -> Self {
        Self { registry, config }
    }

    pub async fn load_config(&self) -> AppResult<Arc<PaymentConfig>> {
        self.config.load().await
    }

    /// Replace the configuration and rebuild providers on next use
    pub async fn save_config(&self, config: PaymentConfig) -> AppResult<Arc<PaymentConfig>> {
        let saved = self.config.save(config).await?;
        self.registry.invalidate();
        Ok(saved)
    }

    /// An enabled provider by name, or a configuration error
    pub async fn provider(&self, name: &str) -> AppResult<Arc<dyn PaymentProvider>> {
        match self.registry.get(name).await? {
            Some(provider) if provider.is_enabled() => Ok(provider),
            _ => Err(AppError::configuration(unavailable(name))),
        }
    }

    /// Start a payment with `provider_name`, or with the default provider.
    ///
    /// Every failure, including an unknown provider or an unsupported payment
    /// method, comes back as a failed [`PaymentResult`].
    pub async fn create_payment(
        &self,
        options: &CreatePaymentOptions,
        provider_name: Option<&str>,
    ) -> PaymentResult {
        let name = match provider_name {
            Some(name) => name.to_string(),
            None => match self.config.load().await {
                Ok(config) => config.default_provider.clone(),
                Err(e) => {
                    error!("Failed to load payment configuration: {}", e);
                    return PaymentResult::failed("", PaymentFailure::Configuration, e.to_string());
                }
            },
        };

        let provider = match self.provider(&name).await {
            Ok(provider) => provider,
            Err(e) => {
                warn!(provider = %name, "Cannot create payment: {}", e);
                return PaymentResult::failed(
                    name.as_str(),
                    PaymentFailure::Configuration,
                    e.to_string(),
                );
            }
        };

        if let Some(method) = options.payment_method {
            if !provider.payment_methods().contains(&method) {
                return PaymentResult::failed(
                    name.as_str(),
                    PaymentFailure::Configuration,
                    format!("Payment method '{}' is not supported by {}", method, name),
                );
            }
        }

        info!(
            provider = %name,
            amount = %options.amount,
            currency = %options.currency,
            "Creating payment"
        );
        provider.create_payment(options).await
    }

    /// Ask the named provider for the status of a payment
    pub async fn verify_payment(&self, options: &VerifyPaymentOptions) -> VerifyPaymentResult {
        match self.provider(&options.provider_name).await {
            Ok(provider) => provider.verify_payment(options).await,
            Err(e) => {
                warn!(provider = %options.provider_name, "Cannot verify payment: {}", e);
                VerifyPaymentResult::unreachable(e.to_string())
            }
        }
    }

    pub async fn available_providers(&self) -> AppResult<Vec<Arc<dyn PaymentProvider>>> {
        self.registry.list_enabled().await
    }

    /// Payment methods offered by each enabled provider
    pub async fn all_payment_methods(&self) -> AppResult<BTreeMap<String, Vec<PaymentMethod>>> {
        Ok(self
            .available_providers()
            .await?
            .into_iter()
            .map(|provider| (provider.name().to_string(), provider.payment_methods()))
            .collect())
    }

    pub async fn default_currency(&self) -> AppResult<String> {
        Ok(self.config.load().await?.default_currency.clone())
    }
}
