use crate::database::error::DbResult;
use crate::payments::types::PaymentConfig;
use async_trait::async_trait;

#[cfg(feature = "database")]
pub use self::postgres::PgPaymentConfigRepository;

/// Administrative store for the payment configuration document.
/// Saves replace the whole document.
#[async_trait]
pub trait PaymentConfigRepository: Send + Sync {
    /// The saved document, if an administrator ever saved one
    async fn load(&self) -> DbResult<Option<PaymentConfig>>;

    async fn save(&self, config: &PaymentConfig) -> DbResult<()>;
}

#[cfg(feature = "database")]
mod postgres {
    use super::*;
    use crate::database::error::DatabaseError;
    use sqlx::types::Json;
    use sqlx::PgPool;

    /// Keeps the document in the single row of `payment_config`
    pub struct PgPaymentConfigRepository {
        pool: PgPool,
    }

    impl PgPaymentConfigRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl PaymentConfigRepository for PgPaymentConfigRepository {
        async fn load(&self) -> DbResult<Option<PaymentConfig>> {
            let document = sqlx::query_scalar::<_, Json<serde_json::Value>>(
                "SELECT document FROM payment_config WHERE id = 1",
            )
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            document
                .map(|Json(value)| {
                    serde_json::from_value::<PaymentConfig>(value)
                        .map_err(|e| DatabaseError::serialization(e).with_context("payment_config"))
                })
                .transpose()
        }

        async fn save(&self, config: &PaymentConfig) -> DbResult<()> {
            let document = serde_json::to_value(config).map_err(DatabaseError::serialization)?;

            sqlx::query(
                "INSERT INTO payment_config (id, document, updated_at) VALUES (1, $1, NOW()) \
                 ON CONFLICT (id) DO UPDATE SET document = EXCLUDED.document, updated_at = NOW()",
            )
            .bind(Json(document))
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            Ok(())
        }
    }
}
