//! Barista recommendation lookup
//!
//! Asks the local recommendation service for the drink of the day and falls
//! back to a fixed recommendation when the service is missing or failing.

use crate::error::OrchestrationError;
use crate::models::Beverage;
use crate::Result;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

pub fn default_recommendation() -> Beverage {
    Beverage::new(
        "Mocha",
        vec!["double shots".to_string(), "chocolate sauce".to_string()],
    )
}

#[async_trait::async_trait]
pub trait RecommendationProvider: Send + Sync {
    /// Never fails; falls back to [`default_recommendation`].
    async fn recommend(&self) -> Beverage;
}

pub struct HttpRecommendationProvider {
    client: Client,
    base_url: Option<String>,
}

impl HttpRecommendationProvider {
    pub fn new(base_url: Option<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    async fn fetch(&self, base_url: &str) -> Result<Beverage> {
        let url = format!("{}/recommendation", base_url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            OrchestrationError::UpstreamModelError(format!(
                "Recommendation request failed for {}: {}",
                url, e
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestrationError::UpstreamModelError(format!(
                "Recommendation service returned {}",
                status
            )));
        }

        Ok(response.json::<Beverage>().await?)
    }
}

#[async_trait::async_trait]
impl RecommendationProvider for HttpRecommendationProvider {
    async fn recommend(&self) -> Beverage {
        let Some(base_url) = self.base_url.as_deref() else {
            warn!("LOCAL_RECOMMENDATION_SERVICE not configured, using default recommendation");
            return default_recommendation();
        };

        match self.fetch(base_url).await {
            Ok(recommendation) => {
                info!(drink = %recommendation.name, "Loaded barista recommendation");
                recommendation
            }
            Err(error) => {
                warn!("Falling back to default recommendation: {}", error);
                default_recommendation()
            }
        }
    }
}

/// Always returns the same drink.
pub struct FixedRecommendation(pub Beverage);

impl Default for FixedRecommendation {
    fn default() -> Self {
        Self(default_recommendation())
    }
}

#[async_trait::async_trait]
impl RecommendationProvider for FixedRecommendation {
    async fn recommend(&self) -> Beverage {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_service_falls_back() {
        let provider = HttpRecommendationProvider::new(None);
        assert_eq!(provider.recommend().await, default_recommendation());
    }

    #[tokio::test]
    async fn test_unreachable_service_falls_back() {
        let provider = HttpRecommendationProvider::new(Some("http://127.0.0.1:1/".into()));
        let recommendation = provider.recommend().await;
        assert_eq!(recommendation.name, "Mocha");
        assert_eq!(recommendation.modifiers, vec!["double shots", "chocolate sauce"]);
    }
}
