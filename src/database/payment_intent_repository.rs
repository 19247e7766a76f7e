use crate::database::error::DbResult;
use crate::payments::types::{IntentMetadata, PaymentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[cfg(feature = "database")]
pub use self::postgres::PgPaymentIntentRepository;

/// One recorded checkout attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub id: Uuid,
    pub user_id: String,
    /// Major currency units
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider: String,
    pub provider_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub metadata: IntentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a checkout starts; the store assigns id, status and timestamps
#[derive(Debug, Clone)]
pub struct NewPaymentIntent {
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub provider: String,
    pub provider_reference: String,
    pub redirect_url: Option<String>,
    pub metadata: IntentMetadata,
}

/// Durable store of payment intents. Rows are appended, then only their
/// status changes; nothing is ever deleted.
#[async_trait]
pub trait PaymentIntentRepository: Send + Sync {
    /// Insert a new intent with status `pending`
    async fn create(&self, intent: NewPaymentIntent) -> DbResult<PaymentIntent>;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PaymentIntent>>;

    async fn find_by_provider_reference(
        &self,
        provider: &str,
        reference: &str,
    ) -> DbResult<Option<PaymentIntent>>;

    /// Newest intent whose metadata carries `callback_id`
    async fn find_latest_by_callback_id(&self, callback_id: &str)
        -> DbResult<Option<PaymentIntent>>;

    /// Move a pending intent to `status`.
    ///
    /// Returns `None` without writing when the intent is missing or already
    /// terminal, so concurrent reconcilers cannot overwrite each other.
    async fn transition_from_pending(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> DbResult<Option<PaymentIntent>>;

    /// Settle the intent for `(provider, reference)` as successful from any
    /// state other than `successful`.
    ///
    /// A gateway confirmation outranks an earlier failed or canceled
    /// reading. Returns `None` without writing when the intent is missing or
    /// already successful.
    async fn mark_successful(
        &self,
        provider: &str,
        reference: &str,
    ) -> DbResult<Option<PaymentIntent>>;
}

#[cfg(feature = "database")]
mod postgres {
    use super::*;
    use crate::database::error::DatabaseError;
    use sqlx::types::Json;
    use sqlx::{FromRow, PgPool};

    const COLUMNS: &str = "id, user_id, amount, currency, status, provider, provider_reference, \
                           redirect_url, metadata, created_at, updated_at";

    #[derive(Debug, FromRow)]
    struct PaymentIntentRow {
        id: Uuid,
        user_id: String,
        amount: Decimal,
        currency: String,
        status: String,
        provider: String,
        provider_reference: String,
        redirect_url: Option<String>,
        metadata: Json<serde_json::Value>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl TryFrom<PaymentIntentRow> for PaymentIntent {
        type Error = DatabaseError;

        fn try_from(row: PaymentIntentRow) -> Result<Self, Self::Error> {
            let status = row
                .status
                .parse::<PaymentStatus>()
                .map_err(DatabaseError::serialization)?;
            let metadata = serde_json::from_value::<IntentMetadata>(row.metadata.0)
                .map_err(|e| DatabaseError::serialization(e).with_context(row.id.to_string()))?;

            Ok(PaymentIntent {
                id: row.id,
                user_id: row.user_id,
                amount: row.amount,
                currency: row.currency,
                status,
                provider: row.provider,
                provider_reference: row.provider_reference,
                redirect_url: row.redirect_url,
                metadata,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        }
    }

    fn convert(row: Option<PaymentIntentRow>) -> DbResult<Option<PaymentIntent>> {
        row.map(PaymentIntent::try_from).transpose()
    }

    /// Postgres-backed payment intent store (`payment_intents` table)
    pub struct PgPaymentIntentRepository {
        pool: PgPool,
    }

    impl PgPaymentIntentRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl PaymentIntentRepository for PgPaymentIntentRepository {
        async fn create(&self, intent: NewPaymentIntent) -> DbResult<PaymentIntent> {
            let metadata =
                serde_json::to_value(&intent.metadata).map_err(DatabaseError::serialization)?;

            let row = sqlx::query_as::<_, PaymentIntentRow>(&format!(
                "INSERT INTO payment_intents \
                 (user_id, amount, currency, status, provider, provider_reference, redirect_url, metadata) \
                 VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7) \
                 RETURNING {}",
                COLUMNS
            ))
            .bind(&intent.user_id)
            .bind(intent.amount)
            .bind(&intent.currency)
            .bind(&intent.provider)
            .bind(&intent.provider_reference)
            .bind(&intent.redirect_url)
            .bind(Json(metadata))
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            PaymentIntent::try_from(row)
        }

        async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PaymentIntent>> {
            let row = sqlx::query_as::<_, PaymentIntentRow>(&format!(
                "SELECT {} FROM payment_intents WHERE id = $1",
                COLUMNS
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            convert(row)
        }

        async fn find_by_provider_reference(
            &self,
            provider: &str,
            reference: &str,
        ) -> DbResult<Option<PaymentIntent>> {
            let row = sqlx::query_as::<_, PaymentIntentRow>(&format!(
                "SELECT {} FROM payment_intents \
                 WHERE provider = $1 AND provider_reference = $2",
                COLUMNS
            ))
            .bind(provider)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            convert(row)
        }

        async fn find_latest_by_callback_id(
            &self,
            callback_id: &str,
        ) -> DbResult<Option<PaymentIntent>> {
            let row = sqlx::query_as::<_, PaymentIntentRow>(&format!(
                "SELECT {} FROM payment_intents \
                 WHERE metadata->>'callbackId' = $1 \
                 ORDER BY created_at DESC LIMIT 1",
                COLUMNS
            ))
            .bind(callback_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            convert(row)
        }

        async fn transition_from_pending(
            &self,
            id: Uuid,
            status: PaymentStatus,
        ) -> DbResult<Option<PaymentIntent>> {
            let row = sqlx::query_as::<_, PaymentIntentRow>(&format!(
                "UPDATE payment_intents SET status = $2, updated_at = NOW() \
                 WHERE id = $1 AND status = 'pending' \
                 RETURNING {}",
                COLUMNS
            ))
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            convert(row)
        }

        async fn mark_successful(
            &self,
            provider: &str,
            reference: &str,
        ) -> DbResult<Option<PaymentIntent>> {
            let row = sqlx::query_as::<_, PaymentIntentRow>(&format!(
                "UPDATE payment_intents SET status = 'successful', updated_at = NOW() \
                 WHERE provider = $1 AND provider_reference = $2 AND status <> 'successful' \
                 RETURNING {}",
                COLUMNS
            ))
            .bind(provider)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            convert(row)
        }
    }
}
