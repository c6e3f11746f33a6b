//! Configuration for billing-service.

use serde::Deserialize;
use service_core::config::Config as CoreConfig;
use service_core::error::AppError;

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: CoreConfig,
    pub service_name: String,
    pub database: DatabaseConfig,
}

impl BillingConfig {
    /// Load configuration from the environment (and `.env` when present).
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let common = CoreConfig::load()?;

        let url = std::env::var("DATABASE_URL")
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("DATABASE_URL must be set")))?;
        let max_connections = env_u32("DATABASE_MAX_CONNECTIONS", default_max_connections())?;
        let min_connections = env_u32("DATABASE_MIN_CONNECTIONS", default_min_connections())?;

        let service_name =
            std::env::var("SERVICE_NAME").unwrap_or_else(|_| "billing-service".to_string());

        Ok(Self {
            common,
            service_name,
            database: DatabaseConfig {
                url,
                max_connections,
                min_connections,
            },
        })
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u32>()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("{} must be an integer", key))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_reads_database_settings() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/billing");
        std::env::set_var("DATABASE_MAX_CONNECTIONS", "7");

        let config = BillingConfig::from_env().unwrap();
        assert_eq!(config.database.url, "postgres://localhost/billing");
        assert_eq!(config.database.max_connections, 7);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.service_name, "billing-service");
    }
}
