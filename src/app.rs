//! Assembles handler state from configuration and a set of stores

use std::sync::Arc;

use crate::api::{AppState, StorageBackend};
use crate::config::Config;
use crate::database::memory::{
    MemoryPaymentConfigRepository, MemoryPaymentIntentRepository, MemorySessionRepository,
    MemorySubscriptionRepository,
};
use crate::database::payment_config_repository::PaymentConfigRepository;
use crate::database::payment_intent_repository::PaymentIntentRepository;
use crate::database::session_repository::SessionRepository;
use crate::database::subscription_repository::SubscriptionRepository;
use crate::payments::config::default_payment_config;
use crate::payments::{CheckoutFlow, PaymentConfigService, PaymentService, ProviderRegistry};

pub struct Stores {
    pub intents: Arc<dyn PaymentIntentRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub payment_config: Arc<dyn PaymentConfigRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub backend: StorageBackend,
}

impl Stores {
    /// Process-local stores; `sessions` is passed in so callers can seed it
    pub fn in_memory(sessions: Arc<MemorySessionRepository>) -> Self {
        Self {
            intents: Arc::new(MemoryPaymentIntentRepository::new()),
            subscriptions: Arc::new(MemorySubscriptionRepository::new()),
            payment_config: Arc::new(MemoryPaymentConfigRepository::new()),
            sessions,
            backend: StorageBackend::Memory,
        }
    }

    #[cfg(feature = "database")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use crate::database::payment_config_repository::PgPaymentConfigRepository;
        use crate::database::payment_intent_repository::PgPaymentIntentRepository;
        use crate::database::session_repository::PgSessionRepository;
        use crate::database::subscription_repository::PgSubscriptionRepository;

        Self {
            intents: Arc::new(PgPaymentIntentRepository::new(pool.clone())),
            subscriptions: Arc::new(PgSubscriptionRepository::new(pool.clone())),
            payment_config: Arc::new(PgPaymentConfigRepository::new(pool.clone())),
            sessions: Arc::new(PgSessionRepository::new(pool.clone())),
            backend: StorageBackend::Postgres(pool),
        }
    }
}

pub fn build_state(config: &Config, stores: Stores) -> AppState {
    let payment_config = Arc::new(PaymentConfigService::new(
        stores.payment_config,
        default_payment_config(&config.paystack.credentials, config.is_production()),
    ));
    let registry = Arc::new(ProviderRegistry::with_default_providers(
        payment_config.clone(),
        config.paystack.transport.clone(),
    ));
    let payments = Arc::new(PaymentService::new(registry, payment_config));
    let checkout = Arc::new(CheckoutFlow::new(
        payments.clone(),
        stores.intents,
        stores.subscriptions,
        config.app.url.clone(),
    ));

    AppState {
        checkout,
        payments,
        sessions: stores.sessions,
        storage: stores.backend,
        environment: config.server.environment.clone(),
    }
}
