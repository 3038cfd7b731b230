//! Runtime configuration read from the environment (and `.env` via dotenv).

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_MENU_IMAGE_BASE_URL: &str = "/images/menu";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub port: u16,
    /// Upper bound on model round-trips in a single turn.
    pub max_tool_rounds: usize,
    pub model_timeout: Duration,
    pub session_ttl: chrono::Duration,
    pub order_expiry: chrono::Duration,
    /// Number of recent history turns considered for each request.
    pub history_window: usize,
    pub database_url: Option<String>,
    pub recommendation_service_url: Option<String>,
    pub menu_image_base_url: String,
    pub session_sweep_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            port: 8080,
            max_tool_rounds: 15,
            model_timeout: Duration::from_secs(60),
            session_ttl: chrono::Duration::hours(24),
            order_expiry: chrono::Duration::hours(12),
            history_window: 40,
            database_url: None,
            recommendation_service_url: None,
            menu_image_base_url: DEFAULT_MENU_IMAGE_BASE_URL.to_string(),
            session_sweep_interval: Duration::from_secs(300),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => parse_value("PORT", &raw)?,
            Err(_) => defaults.port,
        };

        let max_tool_rounds: usize = parse_env("MAX_TOOL_ROUNDS", defaults.max_tool_rounds)?;
        if max_tool_rounds == 0 {
            return Err(OrchestrationError::ConfigError(
                "MAX_TOOL_ROUNDS must be at least 1".to_string(),
            ));
        }

        let model_timeout_secs: u64 =
            parse_env("MODEL_TIMEOUT_SECS", defaults.model_timeout.as_secs())?;
        let session_ttl_hours: i64 =
            parse_env("SESSION_TTL_HOURS", defaults.session_ttl.num_hours())?;
        let order_expiry_hours: i64 =
            parse_env("ORDER_EXPIRY_HOURS", defaults.order_expiry.num_hours())?;
        let sweep_secs: u64 =
            parse_env("SESSION_SWEEP_SECS", defaults.session_sweep_interval.as_secs())?;

        Ok(Self {
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: non_empty_env("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            port,
            max_tool_rounds,
            model_timeout: Duration::from_secs(model_timeout_secs),
            session_ttl: chrono::Duration::hours(session_ttl_hours),
            order_expiry: chrono::Duration::hours(order_expiry_hours),
            history_window: parse_env("HISTORY_WINDOW", defaults.history_window)?,
            database_url: non_empty_env("POSTGRES_URL").or_else(|| non_empty_env("DATABASE_URL")),
            recommendation_service_url: non_empty_env("LOCAL_RECOMMENDATION_SERVICE")
                .map(|url| url.trim_end_matches('/').to_string()),
            menu_image_base_url: non_empty_env("MENU_IMAGE_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.menu_image_base_url),
            session_sweep_interval: Duration::from_secs(sweep_secs),
        })
    }

    /// True when a usable Gemini key is configured.
    pub fn has_model_credentials(&self) -> bool {
        !self.gemini_api_key.is_empty() && self.gemini_api_key != "your_gemini_api_key_here"
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match non_empty_env(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| OrchestrationError::ConfigError(format!("Invalid value for {}: {}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_tool_rounds, 15);
        assert_eq!(config.session_ttl.num_hours(), 24);
        assert_eq!(config.order_expiry.num_hours(), 12);
        assert!(!config.has_model_credentials());
    }

    #[test]
    fn test_parse_value_reports_key() {
        let err = parse_value::<u16>("PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("PORT"));
        assert_eq!(parse_value::<u16>("PORT", " 9090 ").unwrap(), 9090);
    }
}
