//! Checkout and verification flow
//!
//! Ties the payment service to the intent and subscription stores:
//!
//! ```text
//! create_checkout -> (customer pays on the gateway) -> find_by_callback -> verify
//!                                                   \-> handle_webhook
//! ```
//!
//! Both paths reconcile by `(provider, reference)`. The redirect path moves a
//! pending intent with a conditional `pending -> terminal` update. A
//! `charge.success` webhook settles the intent from any state but
//! `successful`, since the gateway may report an in-progress checkout as
//! abandoned before the customer finishes paying. `successful` is final.
//!
//! The tier is granted only by the call that settles an intent. Replaying an
//! already successful intent restores a subscription row that is missing
//! entirely and otherwise leaves subscriptions alone.

use crate::database::payment_intent_repository::{
    NewPaymentIntent, PaymentIntent, PaymentIntentRepository,
};
use crate::database::session_repository::SessionUser;
use crate::database::subscription_repository::{
    Subscription, SubscriptionRepository, SubscriptionStatus, SubscriptionUpsert,
};
use crate::error::{AppError, AppErrorKind, AppResult, AuthError, DomainError};
use crate::payments::service::PaymentService;
use crate::payments::types::{
    CreatePaymentOptions, IntentMetadata, PaymentMethod, PaymentStatus, Tier, TierFeatures,
    VerifyPaymentOptions,
};
use crate::payments::webhook::{WebhookEvent, WebhookOutcome};
use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A plan purchase requested by a signed-in user
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub tier: Tier,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub success: bool,
    pub redirect_url: Option<String>,
    /// Gateway reference of the new transaction
    pub payment_id: String,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub success: bool,
    pub verified: bool,
    pub status: PaymentStatus,
}

impl From<&PaymentIntent> for VerificationOutcome {
    fn from(intent: &PaymentIntent) -> Self {
        Self {
            success: true,
            verified: intent.status == PaymentStatus::Successful,
            status: intent.status,
        }
    }
}

/// What a user is currently entitled to
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriptionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<DateTime<Utc>>,
    pub is_subscribed: bool,
    pub is_premium: bool,
    pub features: TierFeatures,
}

/// `cb-<unix millis>-<8 hex>`
pub fn new_callback_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("cb-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

fn period_end_from(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_months(Months::new(1))
        .unwrap_or_else(|| now + Duration::days(30))
}

pub struct CheckoutFlow {
    payments: Arc<PaymentService>,
    intents: Arc<dyn PaymentIntentRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    app_url: String,
}

impl CheckoutFlow {
    pub fn new(
        payments: Arc<PaymentService>,
        intents: Arc<dyn PaymentIntentRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            payments,
            intents,
            subscriptions,
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn payments(&self) -> &PaymentService {
        &self.payments
    }

    /// Start a hosted checkout for a paid tier and record a pending intent
    pub async fn create_checkout(
        &self,
        user: &SessionUser,
        request: CheckoutRequest,
    ) -> AppResult<CheckoutSession> {
        if request.tier == Tier::Free {
            return Err(AppError::validation("The free tier does not require payment"));
        }

        let currency = self.payments.default_currency().await?;
        let callback_id = new_callback_id();
        let amount = request.tier.price();

        let mut metadata = serde_json::Map::new();
        metadata.insert("tier".to_string(), json!(request.tier));
        metadata.insert("userId".to_string(), json!(user.user_id));
        metadata.insert("callbackId".to_string(), json!(callback_id));

        let options = CreatePaymentOptions {
            amount,
            currency: currency.clone(),
            customer_email: user.email.clone(),
            customer_name: user
                .email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string(),
            description: format!("{} Subscription", request.tier.display_name()),
            metadata,
            success_url: format!("{}/payment/callback?id={}", self.app_url, callback_id),
            cancel_url: format!("{}/pricing?canceled=true", self.app_url),
            payment_method: request.payment_method,
        };

        let result = self
            .payments
            .create_payment(&options, request.provider_name.as_deref())
            .await;
        if !result.success {
            warn!(
                user_id = %user.user_id,
                provider = %result.provider_name,
                error = ?result.error,
                "Checkout could not be created"
            );
            return Err(result.into_error());
        }

        let intent = self
            .intents
            .create(NewPaymentIntent {
                user_id: user.user_id.clone(),
                amount,
                currency,
                provider: result.provider_name.clone(),
                provider_reference: result.payment_id.clone(),
                redirect_url: result.redirect_url.clone(),
                metadata: IntentMetadata::new(request.tier, callback_id),
            })
            .await?;

        info!(
            intent_id = %intent.id,
            user_id = %intent.user_id,
            tier = %request.tier,
            provider = %intent.provider,
            reference = %intent.provider_reference,
            "Payment intent created"
        );

        Ok(CheckoutSession {
            success: true,
            redirect_url: result.redirect_url,
            payment_id: result.payment_id,
            provider: result.provider_name,
        })
    }

    /// The newest intent minted with `callback_id`, if it belongs to `user_id`
    pub async fn find_by_callback(
        &self,
        user_id: &str,
        callback_id: &str,
    ) -> AppResult<PaymentIntent> {
        let intent = self
            .intents
            .find_latest_by_callback_id(callback_id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment intent", callback_id))?;

        ensure_owner(&intent, user_id)?;
        Ok(intent)
    }

    /// Confirm a payment with its gateway and grant the tier on success.
    ///
    /// `payment_id` may be the intent id or the gateway reference. A terminal
    /// intent is answered from the store without asking the gateway again.
    pub async fn verify(
        &self,
        user_id: &str,
        options: VerifyPaymentOptions,
    ) -> AppResult<VerificationOutcome> {
        let intent = self
            .resolve_intent(&options.payment_id, &options.provider_name)
            .await?
            .ok_or_else(|| AppError::not_found("Payment intent", options.payment_id.as_str()))?;

        ensure_owner(&intent, user_id)?;

        if intent.status.is_terminal() {
            if intent.status == PaymentStatus::Successful {
                self.restore_entitlement(&intent).await?;
            }
            return Ok(VerificationOutcome::from(&intent));
        }

        let provider = self.payments.provider(&intent.provider).await?;
        let result = provider
            .verify_payment(&VerifyPaymentOptions {
                payment_id: intent.provider_reference.clone(),
                provider_name: intent.provider.clone(),
                transaction_id: options.transaction_id,
            })
            .await;

        if !result.success {
            let message = result
                .error
                .unwrap_or_else(|| "Payment verification failed".to_string());
            warn!(
                intent_id = %intent.id,
                provider = %intent.provider,
                "Gateway verification failed, intent left pending: {}",
                message
            );
            return Err(AppError::upstream(intent.provider, message));
        }

        if result.verified {
            ensure_charge_matches(&intent, result.reference.as_deref(), result.amount)?;
        }

        let (intent, _) = self.reconcile(intent, result.status).await?;
        Ok(VerificationOutcome::from(&intent))
    }

    /// Apply a signed gateway webhook
    pub async fn handle_webhook(
        &self,
        provider_name: &str,
        payload: &[u8],
        signature: Option<&str>,
    ) -> AppResult<WebhookOutcome> {
        let provider = self.payments.provider(provider_name).await?;

        let signed = signature
            .map(|signature| provider.validate_webhook_signature(payload, signature))
            .unwrap_or(false);
        if !signed {
            warn!(provider = provider_name, "Rejected webhook with invalid signature");
            return Err(AppError::new(AppErrorKind::Auth(AuthError::InvalidSignature)));
        }

        let reference = match provider.parse_webhook_event(payload)? {
            WebhookEvent::ChargeSucceeded { reference } => reference,
            WebhookEvent::Ignored { event } => {
                info!(provider = provider_name, event = %event, "Ignoring webhook event");
                return Ok(WebhookOutcome::Ignored { event });
            }
        };

        let Some(intent) = self
            .intents
            .find_by_provider_reference(provider.name(), &reference)
            .await?
        else {
            warn!(
                provider = provider_name,
                reference = %reference,
                "Webhook for unknown payment reference"
            );
            return Ok(WebhookOutcome::UnknownReference { reference });
        };

        if intent.status == PaymentStatus::Successful {
            self.restore_entitlement(&intent).await?;
            return Ok(WebhookOutcome::AlreadyReconciled {
                intent_id: intent.id.to_string(),
            });
        }

        match self
            .intents
            .mark_successful(&intent.provider, &intent.provider_reference)
            .await?
        {
            Some(settled) => {
                if intent.status.is_terminal() {
                    warn!(
                        intent_id = %settled.id,
                        previous = %intent.status,
                        "Charge confirmed after the payment was recorded as unpaid"
                    );
                }
                info!(intent_id = %settled.id, "Payment intent settled by webhook");
                self.grant_entitlement(&settled).await?;
                Ok(WebhookOutcome::Reconciled {
                    intent_id: settled.id.to_string(),
                })
            }
            None => {
                // settled concurrently by the redirect path
                let current = self.reload(&intent).await?;
                if current.status == PaymentStatus::Successful {
                    self.restore_entitlement(&current).await?;
                }
                Ok(WebhookOutcome::AlreadyReconciled {
                    intent_id: current.id.to_string(),
                })
            }
        }
    }

    /// Mark the user's active subscription canceled. No gateway call is made.
    pub async fn cancel_subscription(&self, user_id: &str) -> AppResult<Subscription> {
        let subscription = self
            .subscriptions
            .find_active_by_user(user_id)
            .await?
            .ok_or_else(|| AppError::new(AppErrorKind::Domain(DomainError::NoActiveSubscription)))?;

        let canceled = self
            .subscriptions
            .update_status(subscription.id, SubscriptionStatus::Canceled)
            .await?;

        info!(user_id = user_id, subscription_id = %canceled.id, "Subscription canceled");
        Ok(canceled)
    }

    pub async fn current_subscription(&self, user_id: &str) -> AppResult<SubscriptionSummary> {
        let subscription = self.subscriptions.find_by_user(user_id).await?;

        let tier = subscription
            .as_ref()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .filter(|s| s.current_period_end > Utc::now())
            .map(|s| s.tier)
            .unwrap_or_default();

        Ok(SubscriptionSummary {
            tier,
            status: subscription.as_ref().map(|s| s.status),
            current_period_end: subscription.as_ref().map(|s| s.current_period_end),
            is_subscribed: tier != Tier::Free,
            is_premium: tier == Tier::Premium,
            features: tier.features(),
        })
    }

    async fn resolve_intent(
        &self,
        payment_id: &str,
        provider_name: &str,
    ) -> AppResult<Option<PaymentIntent>> {
        if let Ok(id) = Uuid::parse_str(payment_id) {
            if let Some(intent) = self.intents.find_by_id(id).await? {
                return Ok(Some(intent));
            }
        }

        Ok(self
            .intents
            .find_by_provider_reference(provider_name, payment_id)
            .await?)
    }

    /// Move a pending intent to `status`, granting the tier on success.
    ///
    /// Returns the intent as stored afterwards and whether this call made the
    /// transition.
    async fn reconcile(
        &self,
        intent: PaymentIntent,
        status: PaymentStatus,
    ) -> AppResult<(PaymentIntent, bool)> {
        if status == PaymentStatus::Pending {
            return Ok((intent, false));
        }

        match self.intents.transition_from_pending(intent.id, status).await? {
            Some(updated) => {
                info!(
                    intent_id = %updated.id,
                    status = %updated.status,
                    "Payment intent reconciled"
                );
                if updated.status == PaymentStatus::Successful {
                    self.grant_entitlement(&updated).await?;
                }
                Ok((updated, true))
            }
            None => {
                let current = self.reload(&intent).await?;
                if current.status == PaymentStatus::Successful {
                    self.restore_entitlement(&current).await?;
                }
                Ok((current, false))
            }
        }
    }

    async fn reload(&self, intent: &PaymentIntent) -> AppResult<PaymentIntent> {
        self.intents
            .find_by_id(intent.id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment intent", intent.id.to_string()))
    }

    /// Re-apply the tier of an intent settled earlier.
    ///
    /// Only a user with no subscription row at all gets one; a canceled row or
    /// one backed by a later purchase is left untouched.
    async fn restore_entitlement(&self, intent: &PaymentIntent) -> AppResult<()> {
        if self.subscriptions.find_by_user(&intent.user_id).await?.is_some() {
            return Ok(());
        }

        warn!(
            intent_id = %intent.id,
            user_id = %intent.user_id,
            "Successful payment had no subscription, restoring it"
        );
        self.grant_entitlement(intent).await?;
        Ok(())
    }

    /// Give the intent's user the tier it paid for, starting a new period
    async fn grant_entitlement(&self, intent: &PaymentIntent) -> AppResult<Subscription> {
        if let Some(existing) = self.subscriptions.find_by_user(&intent.user_id).await? {
            if existing.status == SubscriptionStatus::Active
                && existing.is_backed_by(&intent.provider, &intent.provider_reference)
            {
                return Ok(existing);
            }
        }

        let subscription = self
            .subscriptions
            .upsert(SubscriptionUpsert {
                user_id: intent.user_id.clone(),
                tier: intent.metadata.tier,
                status: SubscriptionStatus::Active,
                current_period_end: period_end_from(Utc::now()),
                payment_provider: intent.provider.clone(),
                payment_reference: intent.provider_reference.clone(),
            })
            .await?;

        info!(
            user_id = %subscription.user_id,
            tier = %subscription.tier,
            period_end = %subscription.current_period_end,
            "Subscription activated"
        );
        Ok(subscription)
    }
}

/// Reject a gateway confirmation for a different transaction or amount
fn ensure_charge_matches(
    intent: &PaymentIntent,
    reference: Option<&str>,
    amount: Option<Decimal>,
) -> AppResult<()> {
    if let Some(reference) = reference.filter(|r| *r != intent.provider_reference) {
        warn!(
            intent_id = %intent.id,
            expected = %intent.provider_reference,
            reported = reference,
            "Gateway confirmed a different transaction"
        );
        return Err(AppError::validation(
            "Transaction does not belong to this payment",
        ));
    }

    if let Some(amount) = amount.filter(|a| *a != intent.amount) {
        warn!(
            intent_id = %intent.id,
            expected = %intent.amount,
            charged = %amount,
            "Gateway charged a different amount"
        );
        return Err(AppError::validation(
            "Charged amount does not match this payment",
        ));
    }

    Ok(())
}

fn ensure_owner(intent: &PaymentIntent, user_id: &str) -> AppResult<()> {
    if intent.user_id != user_id {
        warn!(
            intent_id = %intent.id,
            caller = user_id,
            "Payment intent accessed by another user"
        );
        return Err(AppError::forbidden());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{MemoryPaymentIntentRepository, MemorySubscriptionRepository};
    use crate::payments::test_support::{payment_service, StubProvider, STUB_WEBHOOK_SECRET};
    use crate::payments::webhook::sign_sha512;
    use axum::http::StatusCode;
    use chrono::TimeZone;

    struct Harness {
        flow: CheckoutFlow,
        stub: StubProvider,
        intents: Arc<MemoryPaymentIntentRepository>,
        subscriptions: Arc<MemorySubscriptionRepository>,
    }

    fn harness(stub: StubProvider) -> Harness {
        let (payments, stub) = payment_service(stub);
        let intents = Arc::new(MemoryPaymentIntentRepository::new());
        let subscriptions = Arc::new(MemorySubscriptionRepository::new());
        let flow = CheckoutFlow::new(
            payments,
            intents.clone(),
            subscriptions.clone(),
            "https://app.test/",
        );
        Harness {
            flow,
            stub,
            intents,
            subscriptions,
        }
    }

    fn user(id: &str) -> SessionUser {
        SessionUser {
            user_id: id.to_string(),
            email: format!("{}@example.com", id),
            is_admin: false,
        }
    }

    fn request(tier: Tier) -> CheckoutRequest {
        CheckoutRequest {
            tier,
            provider_name: None,
            payment_method: None,
        }
    }

    async fn callback_id_of(h: &Harness, reference: &str) -> String {
        h.intents
            .find_by_provider_reference("stub", reference)
            .await
            .unwrap()
            .unwrap()
            .metadata
            .callback_id
    }

    fn verify_options(payment_id: &str) -> VerifyPaymentOptions {
        VerifyPaymentOptions {
            payment_id: payment_id.to_string(),
            provider_name: "stub".to_string(),
            transaction_id: None,
        }
    }

    #[test]
    fn test_callback_id_format() {
        let id = new_callback_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "cb");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_period_end_is_one_calendar_month() {
        let jan_31 = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        assert_eq!(
            period_end_from(jan_31),
            Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_free_tier_checkout_rejected() {
        let h = harness(StubProvider::new("stub"));
        let err = h
            .flow
            .create_checkout(&user("u1"), request(Tier::Free))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(h.stub.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_basic_checkout_records_pending_intent() {
        let h = harness(StubProvider::new("stub"));
        let session = h
            .flow
            .create_checkout(&user("u1"), request(Tier::Basic))
            .await
            .unwrap();

        assert!(session.success);
        assert_eq!(session.provider, "stub");
        assert_eq!(session.payment_id, "ref-1");
        assert_eq!(
            session.redirect_url.as_deref(),
            Some("https://checkout.test/ref-1")
        );

        let intent = h
            .intents
            .find_by_provider_reference("stub", "ref-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(intent.user_id, "u1");
        assert_eq!(intent.status, PaymentStatus::Pending);
        assert_eq!(intent.amount, Decimal::new(499, 2));
        assert_eq!(intent.currency, "USD");
        assert_eq!(intent.metadata.tier, Tier::Basic);
        assert!(intent.metadata.callback_id.starts_with("cb-"));
    }

    #[tokio::test]
    async fn test_premium_checkout_charges_premium_price() {
        let h = harness(StubProvider::new("stub"));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Premium))
            .await
            .unwrap();
        let intent = h
            .intents
            .find_by_provider_reference("stub", "ref-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(intent.amount, Decimal::new(999, 2));
    }

    #[tokio::test]
    async fn test_unsupported_method_rejected_without_intent() {
        let h = harness(StubProvider::new("stub"));
        let err = h
            .flow
            .create_checkout(
                &user("u1"),
                CheckoutRequest {
                    tier: Tier::Basic,
                    provider_name: None,
                    payment_method: Some(PaymentMethod::Crypto),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(h.intents.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_provider_is_configuration_error() {
        let h = harness(StubProvider::new("stub"));
        let err = h
            .flow
            .create_checkout(
                &user("u1"),
                CheckoutRequest {
                    tier: Tier::Basic,
                    provider_name: Some("stripe".to_string()),
                    payment_method: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("stripe"));
        assert!(h.intents.is_empty());
    }

    #[tokio::test]
    async fn test_callback_round_trip() {
        let h = harness(StubProvider::new("stub"));
        let session = h
            .flow
            .create_checkout(&user("u1"), request(Tier::Basic))
            .await
            .unwrap();
        let callback_id = callback_id_of(&h, &session.payment_id).await;

        let intent = h.flow.find_by_callback("u1", &callback_id).await.unwrap();
        assert_eq!(intent.provider_reference, session.payment_id);

        let err = h.flow.find_by_callback("u2", &callback_id).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err = h.flow.find_by_callback("u1", "cb-0-deadbeef").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_verify_success_activates_subscription() {
        let h = harness(StubProvider::new("stub").verifying(PaymentStatus::Successful));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Basic))
            .await
            .unwrap();
        let intent = h
            .intents
            .find_by_provider_reference("stub", "ref-1")
            .await
            .unwrap()
            .unwrap();

        let outcome = h
            .flow
            .verify("u1", verify_options(&intent.id.to_string()))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.verified);
        assert_eq!(outcome.status, PaymentStatus::Successful);

        let subscription = h.subscriptions.find_by_user("u1").await.unwrap().unwrap();
        assert_eq!(subscription.tier, Tier::Basic);
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert!(subscription.is_backed_by("stub", "ref-1"));
        assert!(subscription.current_period_end > Utc::now() + Duration::days(27));
    }

    #[tokio::test]
    async fn test_verify_is_idempotent() {
        let h = harness(StubProvider::new("stub").verifying(PaymentStatus::Successful));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Premium))
            .await
            .unwrap();

        let first = h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        let period_end = h
            .subscriptions
            .find_by_user("u1")
            .await
            .unwrap()
            .unwrap()
            .current_period_end;

        // a later gateway answer cannot flip a terminal intent
        h.stub.set_verify_status(Some(PaymentStatus::Failed));
        let second = h.flow.verify("u1", verify_options("ref-1")).await.unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.verified, second.verified);
        assert_eq!(h.stub.verify_calls(), 1);

        let subscription = h.subscriptions.find_by_user("u1").await.unwrap().unwrap();
        assert_eq!(subscription.current_period_end, period_end);
        assert_eq!(subscription.tier, Tier::Premium);
    }

    #[tokio::test]
    async fn test_verify_abandoned_payment_is_canceled() {
        let h = harness(StubProvider::new("stub").verifying(PaymentStatus::Canceled));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Basic))
            .await
            .unwrap();

        let outcome = h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.verified);
        assert_eq!(outcome.status, PaymentStatus::Canceled);
        assert!(h.subscriptions.find_by_user("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_transport_failure_leaves_intent_pending() {
        let h = harness(StubProvider::new("stub"));
        h.stub.set_verify_status(None);
        h.flow
            .create_checkout(&user("u1"), request(Tier::Basic))
            .await
            .unwrap();

        let err = h.flow.verify("u1", verify_options("ref-1")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let intent = h
            .intents
            .find_by_provider_reference("stub", "ref-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(intent.status, PaymentStatus::Pending);

        h.stub.set_verify_status(Some(PaymentStatus::Successful));
        let outcome = h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        assert!(outcome.verified);
    }

    #[tokio::test]
    async fn test_verify_rejects_other_users() {
        let h = harness(StubProvider::new("stub"));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Basic))
            .await
            .unwrap();

        let err = h.flow.verify("u2", verify_options("ref-1")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(h.stub.verify_calls(), 0);
        assert!(h.subscriptions.find_by_user("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_unknown_payment() {
        let h = harness(StubProvider::new("stub"));
        let err = h
            .flow
            .verify("u1", verify_options(&Uuid::new_v4().to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    fn charge_success(reference: &str) -> (Vec<u8>, String) {
        let body = serde_json::to_vec(&json!({
            "event": "charge.success",
            "reference": reference,
        }))
        .unwrap();
        let signature = sign_sha512(STUB_WEBHOOK_SECRET, &body);
        (body, signature)
    }

    #[tokio::test]
    async fn test_webhook_charge_success_reconciles() {
        let h = harness(StubProvider::new("stub"));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Premium))
            .await
            .unwrap();

        let (body, signature) = charge_success("ref-1");
        let outcome = h
            .flow
            .handle_webhook("stub", &body, Some(&signature))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Reconciled { .. }));

        let subscription = h.subscriptions.find_by_user("u1").await.unwrap().unwrap();
        assert_eq!(subscription.tier, Tier::Premium);
        assert_eq!(subscription.status, SubscriptionStatus::Active);

        // the redirect path arriving second is answered from the store
        let outcome = h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        assert!(outcome.verified);
        assert_eq!(h.stub.verify_calls(), 0);

        let again = h
            .flow
            .handle_webhook("stub", &body, Some(&signature))
            .await
            .unwrap();
        assert!(matches!(again, WebhookOutcome::AlreadyReconciled { .. }));
    }

    #[tokio::test]
    async fn test_late_charge_success_settles_abandoned_payment() {
        let h = harness(StubProvider::new("stub").verifying(PaymentStatus::Canceled));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Basic))
            .await
            .unwrap();

        // customer opened the callback page before finishing on the gateway
        let outcome = h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        assert_eq!(outcome.status, PaymentStatus::Canceled);
        assert!(h.subscriptions.find_by_user("u1").await.unwrap().is_none());

        let (body, signature) = charge_success("ref-1");
        let outcome = h
            .flow
            .handle_webhook("stub", &body, Some(&signature))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Reconciled { .. }));

        let intent = h
            .intents
            .find_by_provider_reference("stub", "ref-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(intent.status, PaymentStatus::Successful);

        let subscription = h.subscriptions.find_by_user("u1").await.unwrap().unwrap();
        assert_eq!(subscription.tier, Tier::Basic);
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert!(subscription.is_backed_by("stub", "ref-1"));

        let outcome = h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        assert!(outcome.verified);
        assert_eq!(h.stub.verify_calls(), 1);
    }

    #[tokio::test]
    async fn test_replaying_payment_after_cancel_keeps_it_canceled() {
        let h = harness(StubProvider::new("stub"));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Basic))
            .await
            .unwrap();
        h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        let canceled = h.flow.cancel_subscription("u1").await.unwrap();

        let outcome = h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        assert!(outcome.verified);

        let (body, signature) = charge_success("ref-1");
        let outcome = h
            .flow
            .handle_webhook("stub", &body, Some(&signature))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::AlreadyReconciled { .. }));

        let subscription = h.subscriptions.find_by_user("u1").await.unwrap().unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Canceled);
        assert_eq!(subscription.current_period_end, canceled.current_period_end);
        assert_eq!(h.flow.current_subscription("u1").await.unwrap().tier, Tier::Free);
    }

    #[tokio::test]
    async fn test_older_payment_does_not_replace_newer_plan() {
        let h = harness(StubProvider::new("stub"));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Basic))
            .await
            .unwrap();
        h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        h.flow
            .create_checkout(&user("u1"), request(Tier::Premium))
            .await
            .unwrap();
        h.flow.verify("u1", verify_options("ref-2")).await.unwrap();

        h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        let (body, signature) = charge_success("ref-1");
        h.flow
            .handle_webhook("stub", &body, Some(&signature))
            .await
            .unwrap();

        let subscription = h.subscriptions.find_by_user("u1").await.unwrap().unwrap();
        assert_eq!(subscription.tier, Tier::Premium);
        assert!(subscription.is_backed_by("stub", "ref-2"));
    }

    #[tokio::test]
    async fn test_successful_payment_without_subscription_is_restored() {
        let h = harness(StubProvider::new("stub"));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Premium))
            .await
            .unwrap();
        let intent = h
            .intents
            .find_by_provider_reference("stub", "ref-1")
            .await
            .unwrap()
            .unwrap();
        // intent settled but the subscription write never happened
        h.intents
            .transition_from_pending(intent.id, PaymentStatus::Successful)
            .await
            .unwrap();

        let outcome = h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        assert!(outcome.verified);
        assert_eq!(h.stub.verify_calls(), 0);

        let subscription = h.subscriptions.find_by_user("u1").await.unwrap().unwrap();
        assert_eq!(subscription.tier, Tier::Premium);
        assert!(subscription.is_backed_by("stub", "ref-1"));
    }

    #[tokio::test]
    async fn test_verify_rejects_charge_for_another_transaction() {
        let h = harness(StubProvider::new("stub"));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Premium))
            .await
            .unwrap();

        h.stub.set_charge("ref-paid-basic", Decimal::new(999, 2));
        let err = h.flow.verify("u1", verify_options("ref-1")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        h.stub.set_charge("ref-1", Decimal::new(499, 2));
        let err = h.flow.verify("u1", verify_options("ref-1")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let intent = h
            .intents
            .find_by_provider_reference("stub", "ref-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(intent.status, PaymentStatus::Pending);
        assert!(h.subscriptions.find_by_user("u1").await.unwrap().is_none());

        h.stub.set_charge("ref-1", Decimal::new(999, 2));
        let outcome = h.flow.verify("u1", verify_options("ref-1")).await.unwrap();
        assert!(outcome.verified);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let h = harness(StubProvider::new("stub"));
        h.flow
            .create_checkout(&user("u1"), request(Tier::Basic))
            .await
            .unwrap();
        let (body, _) = charge_success("ref-1");

        let err = h
            .flow
            .handle_webhook("stub", &body, Some("00ff"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err = h.flow.handle_webhook("stub", &body, None).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        assert!(h.subscriptions.find_by_user("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_webhook_unknown_reference_and_other_events() {
        let h = harness(StubProvider::new("stub"));

        let (body, signature) = charge_success("ref-missing");
        let outcome = h
            .flow
            .handle_webhook("stub", &body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::UnknownReference {
                reference: "ref-missing".to_string()
            }
        );

        let body = br#"{"event":"transfer.success"}"#;
        let signature = sign_sha512(STUB_WEBHOOK_SECRET, body);
        let outcome = h
            .flow
            .handle_webhook("stub", body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                event: "transfer.success".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_webhook_unknown_provider() {
        let h = harness(StubProvider::new("stub"));
        let err = h
            .flow
            .handle_webhook("stripe", b"{}", Some("00"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_without_subscription_is_not_found() {
        let h = harness(StubProvider::new("stub"));
        let err = h.flow.cancel_subscription("u1").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(h.subscriptions.find_by_user("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_and_current_subscription() {
        let h = harness(StubProvider::new("stub"));

        let summary = h.flow.current_subscription("u1").await.unwrap();
        assert_eq!(summary.tier, Tier::Free);
        assert!(!summary.is_subscribed);
        assert_eq!(summary.features.max_birthdays, 10);

        h.flow
            .create_checkout(&user("u1"), request(Tier::Premium))
            .await
            .unwrap();
        h.flow.verify("u1", verify_options("ref-1")).await.unwrap();

        let summary = h.flow.current_subscription("u1").await.unwrap();
        assert_eq!(summary.tier, Tier::Premium);
        assert!(summary.is_premium);
        assert!(summary.features.priority_support);

        let canceled = h.flow.cancel_subscription("u1").await.unwrap();
        assert_eq!(canceled.status, SubscriptionStatus::Canceled);

        let summary = h.flow.current_subscription("u1").await.unwrap();
        assert_eq!(summary.tier, Tier::Free);
        assert_eq!(summary.status, Some(SubscriptionStatus::Canceled));
    }

    #[tokio::test]
    async fn test_expired_subscription_reads_as_free() {
        let h = harness(StubProvider::new("stub"));
        h.subscriptions
            .upsert(SubscriptionUpsert {
                user_id: "u1".to_string(),
                tier: Tier::Basic,
                status: SubscriptionStatus::Active,
                current_period_end: Utc::now() - Duration::days(1),
                payment_provider: "stub".to_string(),
                payment_reference: "ref-old".to_string(),
            })
            .await
            .unwrap();

        let summary = h.flow.current_subscription("u1").await.unwrap();
        assert_eq!(summary.tier, Tier::Free);
    }
}
