use anyhow::Context;
use birthday_subscriptions::api;
use birthday_subscriptions::app::{build_state, Stores};
use birthday_subscriptions::config::{Config, LogFormat};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[cfg(feature = "database")]
async fn open_stores(config: &Config) -> anyhow::Result<Stores> {
    use birthday_subscriptions::database::{init_pool, PoolConfig};

    match &config.database.url {
        Some(url) => {
            let pool = init_pool(
                url,
                Some(PoolConfig::with_max_connections(config.database.max_connections)),
            )
            .await
            .context("Failed to connect to the database")?;
            Ok(Stores::postgres(pool))
        }
        None => Ok(memory_stores()),
    }
}

#[cfg(not(feature = "database"))]
async fn open_stores(config: &Config) -> anyhow::Result<Stores> {
    if config.database.url.is_some() {
        tracing::warn!("DATABASE_URL is set but the database feature is disabled");
    }
    Ok(memory_stores())
}

fn memory_stores() -> Stores {
    tracing::warn!("No DATABASE_URL configured, using in-memory stores; state is lost on restart");
    Stores::in_memory(Arc::default())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.logging.format);

    tracing::info!("Starting birthday subscriptions backend");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("App URL: {}", config.app.url);
    let credentials = &config.paystack.credentials;
    if credentials.secret_key.is_empty() || credentials.public_key.is_empty() {
        tracing::warn!(
            "PAYSTACK_PUBLIC_KEY or PAYSTACK_SECRET_KEY is not set; Paystack stays disabled until configured"
        );
    }

    let stores = open_stores(&config).await?;
    let app = api::router(build_state(&config, stores));

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("HOST must be an IP address, got {}", config.server.host))?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
