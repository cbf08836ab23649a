//! Configuration management

use anyhow::{Context, Result};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Meta Graph API base URL (versioned)
    pub meta_api_url: String,

    /// Meta access token for the WhatsApp Business account
    pub meta_access_token: String,

    /// Global outbound send limit, shared across all campaigns
    pub send_rate_per_second: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url = std::env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set")?;

        let meta_api_url = std::env::var("META_API_URL")
            .unwrap_or_else(|_| "https://graph.facebook.com/v19.0".to_string());

        let meta_access_token = std::env::var("META_ACCESS_TOKEN")
            .context("META_ACCESS_TOKEN must be set")?;

        let send_rate_per_second = match std::env::var("SEND_RATE_PER_SECOND") {
            Ok(value) => value
                .parse::<u32>()
                .context("SEND_RATE_PER_SECOND must be a positive integer")?,
            Err(_) => 10,
        };

        Ok(Self {
            nats_url,
            database_url,
            meta_api_url,
            meta_access_token,
            send_rate_per_second,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_defaults() {
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("META_ACCESS_TOKEN", "test-token");
        std::env::remove_var("NATS_URL");
        std::env::remove_var("META_API_URL");
        std::env::remove_var("SEND_RATE_PER_SECOND");

        let config = Config::from_env().unwrap();
        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert_eq!(config.meta_api_url, "https://graph.facebook.com/v19.0");
        assert_eq!(config.send_rate_per_second, 10);
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_send_rate_override() {
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("META_ACCESS_TOKEN", "test-token");
        std::env::set_var("SEND_RATE_PER_SECOND", "25");

        let config = Config::from_env().unwrap();
        assert_eq!(config.send_rate_per_second, 25);

        // Cleanup
        std::env::remove_var("SEND_RATE_PER_SECOND");
    }
}
