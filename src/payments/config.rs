//! Payment configuration store
//!
//! The configuration document is read once from the store and cached for the
//! life of the process. An administrator save replaces both the stored
//! document and the cache.

use crate::database::payment_config_repository::PaymentConfigRepository;
use crate::error::AppResult;
use crate::payments::providers::PAYSTACK;
use crate::payments::types::{PaymentConfig, PaymentMethod, PaymentProviderConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Paystack credentials used to seed the configuration when nothing has been saved
#[derive(Debug, Clone, Default)]
pub struct PaystackCredentials {
    pub public_key: String,
    pub secret_key: String,
    pub webhook_secret: Option<String>,
}

/// Configuration used until an administrator saves one
pub fn default_payment_config(credentials: &PaystackCredentials, production: bool) -> PaymentConfig {
    let paystack = PaymentProviderConfig {
        enabled: true,
        api_keys: BTreeMap::from([
            ("publicKey".to_string(), credentials.public_key.clone()),
            ("secretKey".to_string(), credentials.secret_key.clone()),
        ]),
        webhook_secret: credentials.webhook_secret.clone(),
        supported_methods: BTreeSet::from([
            PaymentMethod::Card,
            PaymentMethod::Bank,
            PaymentMethod::MobileMoney,
            PaymentMethod::Ussd,
        ]),
        supported_currencies: ["NGN", "USD", "GHS", "ZAR"]
            .into_iter()
            .map(String::from)
            .collect(),
        test_mode: !production,
    };

    PaymentConfig {
        providers: BTreeMap::from([(PAYSTACK.to_string(), paystack)]),
        default_provider: PAYSTACK.to_string(),
        default_currency: "USD".to_string(),
    }
}

pub struct PaymentConfigService {
    repository: Arc<dyn PaymentConfigRepository>,
    defaults: PaymentConfig,
    cached: RwLock<Option<Arc<PaymentConfig>>>,
}

impl PaymentConfigService {
    pub fn new(repository: Arc<dyn PaymentConfigRepository>, defaults: PaymentConfig) -> Self {
        Self {
            repository,
            defaults,
            cached: RwLock::new(None),
        }
    }

    /// Current configuration: the cache, else the saved document, else the defaults
    pub async fn load(&self) -> AppResult<Arc<PaymentConfig>> {
        if let Some(config) = self.cached() {
            return Ok(config);
        }

        let config = match self.repository.load().await? {
            Some(saved) => saved,
            None => {
                info!("No saved payment configuration, using defaults");
                self.defaults.clone()
            }
        };

        let mut cached = self
            .cached
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // a concurrent save may have landed while the store was being read
        Ok(cached.get_or_insert_with(|| Arc::new(config)).clone())
    }

    /// Validate, persist and cache a replacement document
    pub async fn save(&self, config: PaymentConfig) -> AppResult<Arc<PaymentConfig>> {
        config.validate()?;
        self.repository.save(&config).await?;

        let config = Arc::new(config);
        *self
            .cached
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(config.clone());

        info!(
            default_provider = %config.default_provider,
            providers = ?config.providers.keys().collect::<Vec<_>>(),
            "Payment configuration saved"
        );
        Ok(config)
    }

    fn cached(&self) -> Option<Arc<PaymentConfig>> {
        self.cached
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
