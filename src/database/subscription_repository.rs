use crate::database::error::DbResult;
use crate::payments::types::Tier;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[cfg(feature = "database")]
pub use self::postgres::PgSubscriptionRepository;

/// Subscription status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
    Incomplete,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "incomplete" => Ok(SubscriptionStatus::Incomplete),
            other => Err(format!("unknown subscription status '{}'", other)),
        }
    }
}

/// A user's current plan; at most one row per user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: String,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub current_period_end: DateTime<Utc>,
    pub payment_provider: String,
    pub payment_reference: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether this row was produced by the given gateway transaction
    pub fn is_backed_by(&self, provider: &str, reference: &str) -> bool {
        self.payment_provider == provider && self.payment_reference == reference
    }
}

/// Values written by an upsert keyed on `user_id`
#[derive(Debug, Clone)]
pub struct SubscriptionUpsert {
    pub user_id: String,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub current_period_end: DateTime<Utc>,
    pub payment_provider: String,
    pub payment_reference: String,
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_user(&self, user_id: &str) -> DbResult<Option<Subscription>>;

    async fn find_active_by_user(&self, user_id: &str) -> DbResult<Option<Subscription>>;

    /// Create the user's row or overwrite it in place
    async fn upsert(&self, subscription: SubscriptionUpsert) -> DbResult<Subscription>;

    async fn update_status(&self, id: Uuid, status: SubscriptionStatus)
        -> DbResult<Subscription>;
}

#[cfg(feature = "database")]
mod postgres {
    use super::*;
    use crate::database::error::DatabaseError;
    use sqlx::{FromRow, PgPool};

    const COLUMNS: &str = "id, user_id, tier, status, current_period_end, payment_provider, \
                           payment_reference, created_at, updated_at";

    #[derive(Debug, FromRow)]
    struct SubscriptionRow {
        id: Uuid,
        user_id: String,
        tier: String,
        status: String,
        current_period_end: DateTime<Utc>,
        payment_provider: String,
        payment_reference: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl TryFrom<SubscriptionRow> for Subscription {
        type Error = DatabaseError;

        fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
            let tier = row
                .tier
                .parse::<Tier>()
                .map_err(DatabaseError::serialization)?;
            let status = row
                .status
                .parse::<SubscriptionStatus>()
                .map_err(DatabaseError::serialization)?;

            Ok(Subscription {
                id: row.id,
                user_id: row.user_id,
                tier,
                status,
                current_period_end: row.current_period_end,
                payment_provider: row.payment_provider,
                payment_reference: row.payment_reference,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        }
    }

    /// Postgres-backed subscription store (`subscriptions` table)
    pub struct PgSubscriptionRepository {
        pool: PgPool,
    }

    impl PgSubscriptionRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl SubscriptionRepository for PgSubscriptionRepository {
        async fn find_by_user(&self, user_id: &str) -> DbResult<Option<Subscription>> {
            sqlx::query_as::<_, SubscriptionRow>(&format!(
                "SELECT {} FROM subscriptions WHERE user_id = $1",
                COLUMNS
            ))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Subscription::try_from)
            .transpose()
        }

        async fn find_active_by_user(&self, user_id: &str) -> DbResult<Option<Subscription>> {
            sqlx::query_as::<_, SubscriptionRow>(&format!(
                "SELECT {} FROM subscriptions WHERE user_id = $1 AND status = 'active'",
                COLUMNS
            ))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Subscription::try_from)
            .transpose()
        }

        async fn upsert(&self, subscription: SubscriptionUpsert) -> DbResult<Subscription> {
            let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
                "INSERT INTO subscriptions \
                 (user_id, tier, status, current_period_end, payment_provider, payment_reference) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (user_id) DO UPDATE SET \
                 tier = EXCLUDED.tier, status = EXCLUDED.status, \
                 current_period_end = EXCLUDED.current_period_end, \
                 payment_provider = EXCLUDED.payment_provider, \
                 payment_reference = EXCLUDED.payment_reference, \
                 updated_at = NOW() \
                 RETURNING {}",
                COLUMNS
            ))
            .bind(&subscription.user_id)
            .bind(subscription.tier.as_str())
            .bind(subscription.status.as_str())
            .bind(subscription.current_period_end)
            .bind(&subscription.payment_provider)
            .bind(&subscription.payment_reference)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            Subscription::try_from(row)
        }

        async fn update_status(
            &self,
            id: Uuid,
            status: SubscriptionStatus,
        ) -> DbResult<Subscription> {
            let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
                "UPDATE subscriptions SET status = $2, updated_at = NOW() \
                 WHERE id = $1 RETURNING {}",
                COLUMNS
            ))
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("Subscription", id.to_string()))?;

            Subscription::try_from(row)
        }
    }
}
