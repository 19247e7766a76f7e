//! Provider registry
//!
//! Maps provider names to constructors and caches the instances that came up
//! enabled. Instances are built from the current [`PaymentConfig`], so the
//! cache is dropped whenever the configuration is replaced.

use crate::error::AppResult;
use crate::payments::config::PaymentConfigService;
use crate::payments::providers::{PaystackConfig, PaystackProvider, PAYSTACK};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::PaymentConfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Builds a provider from the current payment configuration
pub type ProviderConstructor =
    Arc<dyn Fn(&PaymentConfig) -> AppResult<Arc<dyn PaymentProvider>> + Send + Sync>;

pub struct ProviderRegistry {
    config: Arc<PaymentConfigService>,
    constructors: RwLock<BTreeMap<String, ProviderConstructor>>,
    instances: RwLock<HashMap<String, Arc<dyn PaymentProvider>>>,
    /// Bumped on every eviction so a lookup that raced it does not cache a stale build
    generation: AtomicU64,
}

impl ProviderRegistry {
    pub fn new(config: Arc<PaymentConfigService>) -> Self {
        Self {
            config,
            constructors: RwLock::new(BTreeMap::new()),
            instances: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Registry with every built-in gateway registered
    pub fn with_default_providers(
        config: Arc<PaymentConfigService>,
        paystack: PaystackConfig,
    ) -> Self {
        let registry = Self::new(config);
        registry.register(
            PAYSTACK,
            Arc::new(move |payment_config: &PaymentConfig| {
                let provider =
                    PaystackProvider::from_payment_config(paystack.clone(), payment_config)?;
                Ok(Arc::new(provider) as Arc<dyn PaymentProvider>)
            }),
        );
        registry
    }

    /// Add or replace a constructor; any cached instance under `name` is dropped
    pub fn register<S: Into<String>>(&self, name: S, constructor: ProviderConstructor) {
        let name = name.into();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&name);
        self.constructors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name, constructor);
    }

    /// Drop every cached instance
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        debug!("Provider cache invalidated");
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.constructors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Resolve a provider by name, constructing it on first use.
    ///
    /// Returns `Ok(None)` for an unregistered name. A provider that comes up
    /// disabled is returned but not cached.
    pub async fn get(&self, name: &str) -> AppResult<Option<Arc<dyn PaymentProvider>>> {
        if let Some(provider) = self
            .instances
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
        {
            return Ok(Some(provider.clone()));
        }

        let constructor = match self
            .constructors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
        {
            Some(constructor) => constructor.clone(),
            None => return Ok(None),
        };

        let generation = self.generation.load(Ordering::SeqCst);
        let config = self.config.load().await?;
        let provider = constructor(&config)?;

        if !provider.is_enabled() {
            warn!(provider = name, "Payment provider is registered but not enabled");
            return Ok(Some(provider));
        }

        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.generation.load(Ordering::SeqCst) != generation {
            return Ok(Some(provider));
        }
        // a concurrent lookup may have cached first; keep its instance
        let cached = instances
            .entry(name.to_string())
            .or_insert_with(|| provider)
            .clone();
        debug!(provider = name, "Payment provider constructed and cached");
        Ok(Some(cached))
    }

    /// Every registered provider that is currently enabled
    pub async fn list_enabled(&self) -> AppResult<Vec<Arc<dyn PaymentProvider>>> {
        let mut enabled = Vec::new();
        for name in self.names() {
            if let Some(provider) = self.get(&name).await? {
                if provider.is_enabled() {
                    enabled.push(provider);
                }
            }
        }
        Ok(enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryPaymentConfigRepository;
    use crate::payments::config::{default_payment_config, PaystackCredentials};
    use crate::payments::test_support::StubProvider;
    use std::sync::atomic::AtomicUsize;

    fn config_service() -> Arc<PaymentConfigService> {
        Arc::new(PaymentConfigService::new(
            Arc::new(MemoryPaymentConfigRepository::new()),
            default_payment_config(
                &PaystackCredentials {
                    public_key: "pk_test".to_string(),
                    secret_key: "sk_test".to_string(),
                    webhook_secret: None,
                },
                false,
            ),
        ))
    }

    fn counting_constructor(
        name: &'static str,
        enabled: bool,
        builds: Arc<AtomicUsize>,
    ) -> ProviderConstructor {
        Arc::new(move |_: &PaymentConfig| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubProvider::new(name).enabled(enabled)) as Arc<dyn PaymentProvider>)
        })
    }

    #[tokio::test]
    async fn test_unknown_name_returns_none() {
        let registry = ProviderRegistry::new(config_service());
        assert!(registry.get("stripe").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enabled_provider_is_cached() {
        let registry = ProviderRegistry::new(config_service());
        let builds = Arc::new(AtomicUsize::new(0));
        registry.register("stub", counting_constructor("stub", true, builds.clone()));

        let first = registry.get("stub").await.unwrap().unwrap();
        let second = registry.get("stub").await.unwrap().unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_disabled_provider_is_rebuilt_each_lookup() {
        let registry = ProviderRegistry::new(config_service());
        let builds = Arc::new(AtomicUsize::new(0));
        registry.register("stub", counting_constructor("stub", false, builds.clone()));

        let provider = registry.get("stub").await.unwrap().unwrap();
        assert!(!provider.is_enabled());
        registry.get("stub").await.unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_list_enabled_skips_disabled() {
        let registry = ProviderRegistry::new(config_service());
        registry.register("b-off", counting_constructor("b-off", false, Arc::default()));
        registry.register("a-on", counting_constructor("a-on", true, Arc::default()));
        registry.register("c-on", counting_constructor("c-on", true, Arc::default()));

        let names: Vec<String> = registry
            .list_enabled()
            .await
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["a-on", "c-on"]);
    }

    #[tokio::test]
    async fn test_register_and_invalidate_evict_cache() {
        let registry = ProviderRegistry::new(config_service());
        let builds = Arc::new(AtomicUsize::new(0));
        registry.register("stub", counting_constructor("stub", true, builds.clone()));
        registry.get("stub").await.unwrap();

        registry.invalidate();
        registry.get("stub").await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        let replacement = Arc::new(AtomicUsize::new(0));
        registry.register("stub", counting_constructor("stub", true, replacement.clone()));
        registry.get("stub").await.unwrap();
        assert_eq!(replacement.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_registry_builds_paystack_from_config() {
        let registry =
            ProviderRegistry::with_default_providers(config_service(), PaystackConfig::default());
        assert_eq!(registry.names(), vec!["paystack"]);

        let paystack = registry.get("paystack").await.unwrap().unwrap();
        assert!(paystack.is_enabled());
        assert_eq!(paystack.display_name(), "Paystack");
    }
}
