//! Client for the tracker backend REST API (`/api`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::models::{BackendHealth, DashboardSnapshot, NewTrigger, Trigger};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("backend response could not be decoded: {0}")]
    Decode(String),

    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn dashboard(&self, username: &str) -> Result<DashboardSnapshot>;
    async fn triggers(&self, username: &str) -> Result<Vec<Trigger>>;
    /// Any 2xx counts as created; the id is returned when the body carries one.
    async fn create_trigger(&self, trigger: &NewTrigger) -> Result<Option<String>>;
    async fn delete_trigger(&self, id: &str) -> Result<()>;
    async fn health(&self) -> Result<BackendHealth>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("code-tracker/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        let base_url = Url::parse(&format!("{}/api", base_url.trim_end_matches('/')))
            .map_err(|err| BackendError::InvalidUrl(err.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self { client, base_url })
    }

    /// Appends `segments` under `/api`, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| BackendError::Decode(err.to_string()))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status,
            message: error_detail(&body),
        })
    }
}

fn created_id(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()?
        .get("id")?
        .as_str()
        .map(str::to_string)
}

/// Pulls the `detail` field out of an error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl Backend for HttpBackend {
    async fn dashboard(&self, username: &str) -> Result<DashboardSnapshot> {
        let response = self
            .client
            .get(self.url(&["dashboard", username]))
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn triggers(&self, username: &str) -> Result<Vec<Trigger>> {
        let response = self
            .client
            .get(self.url(&["triggers", username]))
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn create_trigger(&self, trigger: &NewTrigger) -> Result<Option<String>> {
        let response = self
            .client
            .post(self.url(&["triggers"]))
            .json(trigger)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let id = match response.bytes().await {
            Ok(body) => created_id(&body),
            Err(err) => {
                debug!("create trigger response body unreadable: {err}");
                None
            }
        };
        Ok(id)
    }

    async fn delete_trigger(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&["triggers", id]))
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn health(&self) -> Result<BackendHealth> {
        let response = self.client.get(self.url(&["health"])).send().await?;
        Self::read_json(response).await
    }
}
