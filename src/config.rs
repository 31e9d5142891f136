use std::env;

use crate::logger::{self, LogTag};

/// Runtime configuration resolved from the environment once at startup.
///
/// Credential precedence, first complete pair wins:
/// 1. `{VENUE}_TESTNET_API_KEY` / `{VENUE}_TESTNET_SECRET_KEY` (implies sandbox)
/// 2. `{VENUE}_API_KEY` / `{VENUE}_API_SECRET`
/// 3. `API_KEY` / `SECRET_KEY`
///
/// The sandbox flag is set when `IS_TESTNET=true` or when the testnet pair
/// was the one selected. Missing credentials are a warning, not an error;
/// the engine transitions to ERROR later if it needs them.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub exchange_id: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub is_sandbox: bool,
    pub env: String,
}

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_EXCHANGE: &str = "binance";

impl AppConfig {
    pub fn load() -> Self {
        let config = Self::load_from(|key| env::var(key).ok());
        if config.api_key.is_none() {
            logger::warning(
                LogTag::Config,
                "no exchange API credentials found in environment; trading will be unavailable",
            );
        }
        config
    }

    /// Environment-independent loader, used directly by tests.
    pub fn load_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let exchange_id = lookup("EXCHANGE")
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_EXCHANGE.to_string());
        let venue = exchange_id.to_uppercase();

        let testnet_flag = lookup("IS_TESTNET")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let pair = |key_name: String, secret_name: String| {
            match (lookup(&key_name), lookup(&secret_name)) {
                (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                    Some((key, secret))
                }
                _ => None,
            }
        };

        let testnet_pair = pair(
            format!("{venue}_TESTNET_API_KEY"),
            format!("{venue}_TESTNET_SECRET_KEY"),
        );
        let venue_pair = pair(format!("{venue}_API_KEY"), format!("{venue}_API_SECRET"));
        let generic_pair = pair("API_KEY".to_string(), "SECRET_KEY".to_string());

        let from_testnet = testnet_pair.is_some();
        let credentials = testnet_pair.or(venue_pair).or(generic_pair);
        let (api_key, api_secret) = match credentials {
            Some((key, secret)) => (Some(key), Some(secret)),
            None => (None, None),
        };

        let port = lookup("PORT")
            .and_then(|v| v.trim().parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let env = lookup("APP_ENV")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "development".to_string());

        Self {
            port,
            exchange_id,
            api_key,
            api_secret,
            is_sandbox: testnet_flag || from_testnet,
            env,
        }
    }

    /// Copy with each secret reduced to its first 4 characters + `***`,
    /// safe to include in logs.
    pub fn redacted(&self) -> Self {
        Self {
            api_key: self.api_key.as_deref().map(redact),
            api_secret: self.api_secret.as_deref().map(redact),
            ..self.clone()
        }
    }
}

fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}***")
}
