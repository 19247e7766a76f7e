use crate::database::error::DbResult;
use async_trait::async_trait;

#[cfg(feature = "database")]
pub use self::postgres::PgSessionRepository;

/// The caller behind a session token issued by the authentication service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: String,
    pub email: String,
    pub is_admin: bool,
}

/// Read-only view of sessions issued elsewhere
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Resolve an unexpired session token
    async fn find_by_token(&self, token: &str) -> DbResult<Option<SessionUser>>;
}

#[cfg(feature = "database")]
mod postgres {
    use super::*;
    use crate::database::error::DatabaseError;
    use sqlx::{FromRow, PgPool};

    #[derive(Debug, FromRow)]
    struct SessionRow {
        user_id: String,
        email: String,
        is_admin: bool,
    }

    pub struct PgSessionRepository {
        pool: PgPool,
    }

    impl PgSessionRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl SessionRepository for PgSessionRepository {
        async fn find_by_token(&self, token: &str) -> DbResult<Option<SessionUser>> {
            let row = sqlx::query_as::<_, SessionRow>(
                "SELECT user_id, email, is_admin FROM sessions \
                 WHERE token = $1 AND expires_at > NOW()",
            )
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            Ok(row.map(|row| SessionUser {
                user_id: row.user_id,
                email: row.email,
                is_admin: row.is_admin,
            }))
        }
    }
}
