pub mod error;
pub mod memory;
pub mod payment_config_repository;
pub mod payment_intent_repository;
pub mod session_repository;
pub mod subscription_repository;

#[cfg(feature = "database")]
pub use self::pool::{health_check, init_pool, PoolConfig};

#[cfg(feature = "database")]
mod pool {
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use std::time::Duration;
    use tracing::{error as log_error, info, warn};

    use crate::database::error::DatabaseError;

    /// Database pool configuration
    #[derive(Debug, Clone)]
    pub struct PoolConfig {
        pub max_connections: u32,
        pub min_connections: u32,
        pub connection_timeout: Duration,
        pub idle_timeout: Duration,
        pub max_lifetime: Duration,
    }

    impl Default for PoolConfig {
        fn default() -> Self {
            Self {
                max_connections: 10,
                min_connections: 1,
                connection_timeout: Duration::from_secs(30),
                idle_timeout: Duration::from_secs(600),
                max_lifetime: Duration::from_secs(1800),
            }
        }
    }

    impl PoolConfig {
        pub fn with_max_connections(max_connections: u32) -> Self {
            Self {
                max_connections,
                min_connections: max_connections.min(1),
                ..Self::default()
            }
        }
    }

    /// Initialize the database connection pool
    pub async fn init_pool(
        database_url: &str,
        config: Option<PoolConfig>,
    ) -> Result<PgPool, DatabaseError> {
        let config = config.unwrap_or_default();

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connection_timeout = ?config.connection_timeout,
            "Initializing database pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| {
                log_error!("Failed to initialize database pool: {}", e);
                DatabaseError::from_sqlx(e)
            })?;

        pool.acquire().await.map_err(|e| {
            log_error!("Failed to acquire test connection: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

        info!("Database pool initialized successfully");
        Ok(pool)
    }

    /// Connection pool health check
    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await.map_err(|e| {
            warn!("Database health check failed: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_default_pool_config() {
            let config = PoolConfig::default();
            assert_eq!(config.max_connections, 10);
            assert_eq!(config.min_connections, 1);
            assert_eq!(config.connection_timeout, Duration::from_secs(30));
        }

        #[test]
        fn test_zero_max_connections_keeps_min_at_zero() {
            let config = PoolConfig::with_max_connections(0);
            assert_eq!(config.min_connections, 0);
        }
    }
}
