//! Delivery-provider API client
//!
//! The provider is a single external last-mile service. Everything the
//! gateway needs is behind [`DeliveryProvider`], so tests run against an
//! in-process fake and the binary wires in [`HttpDeliveryProvider`].

use async_trait::async_trait;
use serde_json::json;
use shared::models::{Depot, DispatchRequest, JobSnapshot};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Provider call errors
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// 429; callers back off and retry
    #[error("provider rate limited")]
    RateLimited,

    /// 5xx or connection failure; transient
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// 4xx; the request itself is wrong, retrying cannot help
    #[error("provider rejected request: {0}")]
    Rejected(String),

    #[error("delivery job not found: {0}")]
    JobNotFound(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable(_))
    }
}

#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Create a delivery job; returns the provider's job snapshot
    async fn create_job(&self, request: &DispatchRequest) -> Result<JobSnapshot, ProviderError>;

    /// Assign a carrier to an existing job
    async fn assign_carrier(&self, job_id: &str, carrier_id: &str) -> Result<(), ProviderError>;

    /// Fetch the current state of a job
    async fn get_job(&self, job_id: &str) -> Result<JobSnapshot, ProviderError>;

    /// List the merchant's pickup depots
    async fn list_depots(&self) -> Result<Vec<Depot>, ProviderError>;
}

/// HTTP implementation over the provider's REST API
pub struct HttpDeliveryProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpDeliveryProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn check(
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = response.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        let status = response.status();

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ProviderError::Unavailable(format!("provider returned {status}")));
        }
        if status.as_u16() == 404 {
            return Err(ProviderError::JobNotFound(
                response.url().path().to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!("{status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl DeliveryProvider for HttpDeliveryProvider {
    async fn create_job(&self, request: &DispatchRequest) -> Result<JobSnapshot, ProviderError> {
        let response = self
            .client
            .post(self.url("/v1/jobs"))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("bad job payload: {e}")))
    }

    async fn assign_carrier(&self, job_id: &str, carrier_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(self.url(&format!("/v1/jobs/{job_id}/assign")))
            .bearer_auth(&self.api_key)
            .json(&json!({ "carrier_id": carrier_id }))
            .send()
            .await;

        Self::check(response).await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<JobSnapshot, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/jobs/{job_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("bad job payload: {e}")))
    }

    async fn list_depots(&self) -> Result<Vec<Depot>, ProviderError> {
        let response = self
            .client
            .get(self.url("/v1/depots"))
            .bearer_auth(&self.api_key)
            .send()
            .await;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("bad depot payload: {e}")))
    }
}
