//! Runtime configuration from the environment.

use anyhow::{Context, Result};

const DEFAULT_TRADING_URL: &str = "https://paper-api.alpaca.markets";
const DEFAULT_DATA_URL: &str = "https://data.alpaca.markets";

/// Environment-driven settings. Credentials stay optional so offline
/// commands (backtests against the local store) run without any.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,

    /// Trading API base; the default points at the paper endpoint so a
    /// misconfigured run can never touch a funded account.
    pub trading_url: String,

    pub data_url: String,
}

impl AppConfig {
    /// Load from the process environment, with `.env` as a fallback.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            api_key: std::env::var("ALPACA_API_KEY").ok(),
            api_secret: std::env::var("ALPACA_API_SECRET").ok(),
            trading_url: std::env::var("ALPACA_TRADING_URL")
                .unwrap_or_else(|_| DEFAULT_TRADING_URL.to_string()),
            data_url: std::env::var("ALPACA_DATA_URL")
                .unwrap_or_else(|_| DEFAULT_DATA_URL.to_string()),
        }
    }

    /// Credentials, required for anything that talks to Alpaca.
    pub fn credentials(&self) -> Result<(&str, &str)> {
        let key = self
            .api_key
            .as_deref()
            .context("ALPACA_API_KEY is not set")?;
        let secret = self
            .api_secret
            .as_deref()
            .context("ALPACA_API_SECRET is not set")?;
        Ok((key, secret))
    }
}
