use anyhow::{anyhow, Context, Result};
use std::env;

use crate::payments::config::PaystackCredentials;
use crate::payments::providers::PaystackConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub app: AppConfig,
    pub paystack: PaystackSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Without a URL the server runs on in-memory stores
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Public URL of the web app, used for gateway return URLs
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PaystackSettings {
    pub credentials: PaystackCredentials,
    pub transport: PaystackConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = ServerConfig {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: var("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            max_connections: var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|| "10".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let app = AppConfig {
            url: var("APP_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
        };

        let defaults = PaystackConfig::default();
        let paystack = PaystackSettings {
            credentials: PaystackCredentials {
                public_key: var("PAYSTACK_PUBLIC_KEY").unwrap_or_default(),
                secret_key: var("PAYSTACK_SECRET_KEY").unwrap_or_default(),
                webhook_secret: var("PAYSTACK_WEBHOOK_SECRET").filter(|s| !s.is_empty()),
            },
            transport: PaystackConfig {
                base_url: var("PAYSTACK_BASE_URL").unwrap_or(defaults.base_url),
                timeout_secs: match var("PAYSTACK_TIMEOUT_SECS") {
                    Some(secs) => secs
                        .parse()
                        .context("PAYSTACK_TIMEOUT_SECS must be a valid number")?,
                    None => defaults.timeout_secs,
                },
            },
        };

        let logging = LoggingConfig {
            format: match var("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let config = Config {
            server,
            database,
            app,
            paystack,
            logging,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.server.environment == "production"
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.is_production() && self.database.url.is_none() {
            return Err(anyhow!("DATABASE_URL is required in production"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if !(self.app.url.starts_with("http://") || self.app.url.starts_with("https://")) {
            return Err(anyhow!(
                "APP_URL must be an http(s) URL, got {}",
                self.app.url
            ));
        }

        if self.paystack.transport.base_url.trim().is_empty() {
            return Err(anyhow!("PAYSTACK_BASE_URL cannot be empty"));
        }

        if self.paystack.transport.timeout_secs == 0 {
            return Err(anyhow!("PAYSTACK_TIMEOUT_SECS must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_database() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.environment, "development");
        assert!(config.database.url.is_none());
        assert_eq!(config.paystack.transport.base_url, "https://api.paystack.co");
        assert_eq!(config.paystack.transport.timeout_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.paystack.credentials.webhook_secret.is_none());
    }

    #[test]
    fn test_reads_paystack_and_logging_settings() {
        let config = load(&[
            ("PAYSTACK_SECRET_KEY", "sk_live_x"),
            ("PAYSTACK_WEBHOOK_SECRET", "whsec"),
            ("PAYSTACK_TIMEOUT_SECS", "10"),
            ("LOG_FORMAT", "json"),
            ("APP_URL", "https://birthdays.example"),
        ])
        .unwrap();
        assert_eq!(config.paystack.credentials.secret_key, "sk_live_x");
        assert_eq!(
            config.paystack.credentials.webhook_secret.as_deref(),
            Some("whsec")
        );
        assert_eq!(config.paystack.transport.timeout_secs, 10);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.app.url, "https://birthdays.example");
    }

    #[test]
    fn test_production_requires_database() {
        assert!(load(&[("ENVIRONMENT", "production")]).is_err());
        assert!(load(&[
            ("ENVIRONMENT", "production"),
            ("DATABASE_URL", "postgres://localhost/birthdays"),
        ])
        .is_ok());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(load(&[("PORT", "80")]).is_err());
        assert!(load(&[("PORT", "not-a-port")]).is_err());
        assert!(load(&[("ENVIRONMENT", "qa")]).is_err());
        assert!(load(&[("APP_URL", "birthdays.example")]).is_err());
        assert!(load(&[("DATABASE_MAX_CONNECTIONS", "0")]).is_err());
    }
}
