/// HTTP endpoint probe
use super::{HealthChecker, HealthStatus};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Healthy iff a GET on the target answers 200
pub struct HttpHealthChecker {
    client: Client,
}

impl HttpHealthChecker {
    pub fn new(check_timeout: Duration) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(check_timeout)
            .build()
            .map_err(|e| CoreError::health_check(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check_health(&self, target: &str) -> HealthStatus {
        match self.client.get(target).send().await {
            Ok(response) if response.status() == StatusCode::OK => HealthStatus::Healthy,
            Ok(response) => HealthStatus::Unhealthy {
                reason: format!("HTTP status {}", response.status()),
            },
            Err(e) if e.is_timeout() => HealthStatus::Timeout,
            Err(e) => HealthStatus::Unhealthy {
                reason: format!("Request failed: {}", e),
            },
        }
    }
}
