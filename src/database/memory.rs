//! Process-local stores used when no `DATABASE_URL` is configured and by tests.
//!
//! Each store keeps its rows behind a `std::sync::Mutex`; no lock is held
//! across an await point.

use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::payment_config_repository::PaymentConfigRepository;
use crate::database::payment_intent_repository::{
    NewPaymentIntent, PaymentIntent, PaymentIntentRepository,
};
use crate::database::session_repository::{SessionRepository, SessionUser};
use crate::database::subscription_repository::{
    Subscription, SubscriptionRepository, SubscriptionStatus, SubscriptionUpsert,
};
use crate::payments::types::{PaymentConfig, PaymentStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryPaymentIntentRepository {
    intents: Mutex<Vec<PaymentIntent>>,
}

impl MemoryPaymentIntentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.intents).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PaymentIntentRepository for MemoryPaymentIntentRepository {
    async fn create(&self, intent: NewPaymentIntent) -> DbResult<PaymentIntent> {
        let mut intents = lock(&self.intents);

        if intents
            .iter()
            .any(|i| i.provider == intent.provider && i.provider_reference == intent.provider_reference)
        {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueConstraintViolation {
                column: "provider_reference".to_string(),
                value: intent.provider_reference,
            }));
        }

        let now = Utc::now();
        let stored = PaymentIntent {
            id: Uuid::new_v4(),
            user_id: intent.user_id,
            amount: intent.amount,
            currency: intent.currency,
            status: PaymentStatus::Pending,
            provider: intent.provider,
            provider_reference: intent.provider_reference,
            redirect_url: intent.redirect_url,
            metadata: intent.metadata,
            created_at: now,
            updated_at: now,
        };
        intents.push(stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PaymentIntent>> {
        Ok(lock(&self.intents).iter().find(|i| i.id == id).cloned())
    }

    async fn find_by_provider_reference(
        &self,
        provider: &str,
        reference: &str,
    ) -> DbResult<Option<PaymentIntent>> {
        Ok(lock(&self.intents)
            .iter()
            .find(|i| i.provider == provider && i.provider_reference == reference)
            .cloned())
    }

    async fn find_latest_by_callback_id(
        &self,
        callback_id: &str,
    ) -> DbResult<Option<PaymentIntent>> {
        // insertion order doubles as creation order
        Ok(lock(&self.intents)
            .iter()
            .rev()
            .find(|i| i.metadata.callback_id == callback_id)
            .cloned())
    }

    async fn transition_from_pending(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> DbResult<Option<PaymentIntent>> {
        let mut intents = lock(&self.intents);
        let Some(intent) = intents
            .iter_mut()
            .find(|i| i.id == id && i.status == PaymentStatus::Pending)
        else {
            return Ok(None);
        };

        intent.status = status;
        intent.updated_at = Utc::now();
        Ok(Some(intent.clone()))
    }

    async fn mark_successful(
        &self,
        provider: &str,
        reference: &str,
    ) -> DbResult<Option<PaymentIntent>> {
        let mut intents = lock(&self.intents);
        let Some(intent) = intents.iter_mut().find(|i| {
            i.provider == provider
                && i.provider_reference == reference
                && i.status != PaymentStatus::Successful
        }) else {
            return Ok(None);
        };

        intent.status = PaymentStatus::Successful;
        intent.updated_at = Utc::now();
        Ok(Some(intent.clone()))
    }
}

#[derive(Default)]
pub struct MemorySubscriptionRepository {
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl MemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for MemorySubscriptionRepository {
    async fn find_by_user(&self, user_id: &str) -> DbResult<Option<Subscription>> {
        Ok(lock(&self.subscriptions).get(user_id).cloned())
    }

    async fn find_active_by_user(&self, user_id: &str) -> DbResult<Option<Subscription>> {
        Ok(lock(&self.subscriptions)
            .get(user_id)
            .filter(|s| s.status == SubscriptionStatus::Active)
            .cloned())
    }

    async fn upsert(&self, subscription: SubscriptionUpsert) -> DbResult<Subscription> {
        let now = Utc::now();
        let mut subscriptions = lock(&self.subscriptions);

        let row = subscriptions
            .entry(subscription.user_id.clone())
            .and_modify(|existing| {
                existing.tier = subscription.tier;
                existing.status = subscription.status;
                existing.current_period_end = subscription.current_period_end;
                existing.payment_provider = subscription.payment_provider.clone();
                existing.payment_reference = subscription.payment_reference.clone();
                existing.updated_at = now;
            })
            .or_insert_with(|| Subscription {
                id: Uuid::new_v4(),
                user_id: subscription.user_id.clone(),
                tier: subscription.tier,
                status: subscription.status,
                current_period_end: subscription.current_period_end,
                payment_provider: subscription.payment_provider.clone(),
                payment_reference: subscription.payment_reference.clone(),
                created_at: now,
                updated_at: now,
            });

        Ok(row.clone())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> DbResult<Subscription> {
        let mut subscriptions = lock(&self.subscriptions);
        let row = subscriptions
            .values_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| DatabaseError::not_found("Subscription", id.to_string()))?;

        row.status = status;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }
}

#[derive(Default)]
pub struct MemoryPaymentConfigRepository {
    document: Mutex<Option<PaymentConfig>>,
}

impl MemoryPaymentConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentConfigRepository for MemoryPaymentConfigRepository {
    async fn load(&self) -> DbResult<Option<PaymentConfig>> {
        Ok(lock(&self.document).clone())
    }

    async fn save(&self, config: &PaymentConfig) -> DbResult<()> {
        *lock(&self.document) = Some(config.clone());
        Ok(())
    }
}

/// Sessions are issued by the authentication service; this store is seeded by hand.
#[derive(Default)]
pub struct MemorySessionRepository {
    sessions: Mutex<HashMap<String, SessionUser>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, user: SessionUser) {
        lock(&self.sessions).insert(token.into(), user);
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn find_by_token(&self, token: &str) -> DbResult<Option<SessionUser>> {
        Ok(lock(&self.sessions).get(token).cloned())
    }
}
