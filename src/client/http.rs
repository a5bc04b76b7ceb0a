use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::TaskBackend;
use super::types::{
    JobRequest, LoginStatusResponse, QuickDeliveryRequest, StatusSnapshot, SubmitResponse,
};
use crate::domain::{PlatformCode, PollingError, Stage};

const MAX_ERROR_MESSAGE_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Request timeout: {0}")]
    RequestTimeout(String),
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },
    #[error("Decode error: {0}")]
    DecodeError(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl From<ClientError> for PollingError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::HttpError { status, message } => PollingError::Http { status, message },
            ClientError::DecodeError(message) => PollingError::Decode(message),
            other => PollingError::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub user_agent: String,
    pub auth_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            user_agent: format!("task-orchestrator/{}", env!("CARGO_PKG_VERSION")),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

/// reqwest implementation of [`TaskBackend`].
#[derive(Debug, Clone)]
pub struct HttpTaskBackend {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
    stats: Arc<StatsCounters>,
}

impl HttpTaskBackend {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ClientError::InvalidConfiguration(format!(
                "Invalid base URL '{}': {}",
                config.base_url, e
            ))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidConfiguration(format!(
                "Base URL '{}' must be absolute",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url,
            auth_token: config.auth_token,
            stats: Arc::new(StatsCounters::default()),
        })
    }

    pub fn request_stats(&self) -> RequestStats {
        RequestStats {
            total_requests: self.stats.total.load(Ordering::Relaxed),
            successful_requests: self.stats.successful.load(Ordering::Relaxed),
            failed_requests: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ClientError::InvalidConfiguration("base URL must be absolute".to_string())
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        let result = match self.authorize(request).send().await {
            Ok(response) => read_json(response).await,
            Err(error) => Err(classify_transport_error(error)),
        };
        match &result {
            Ok(_) => self.stats.successful.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }
}

#[async_trait]
impl TaskBackend for HttpTaskBackend {
    async fn submit_job(
        &self,
        platform: &PlatformCode,
        stage: Stage,
        request: &JobRequest,
    ) -> Result<SubmitResponse, ClientError> {
        let url = self.endpoint(&["api", platform.as_str(), "task", stage.path_segment()])?;
        let idempotency_key = Uuid::new_v4().to_string();
        debug!(%platform, %stage, %url, idempotency_key = %idempotency_key, "submitting job");

        self.execute(
            self.client
                .post(url)
                .header("Idempotency-Key", idempotency_key)
                .json(request),
        )
        .await
    }

    async fn submit_quick_delivery(
        &self,
        platform: &PlatformCode,
        request: &QuickDeliveryRequest,
    ) -> Result<SubmitResponse, ClientError> {
        let url = self.endpoint(&["api", "task", "quick-delivery", "submit", platform.as_str()])?;
        let idempotency_key = Uuid::new_v4().to_string();
        debug!(%platform, %url, idempotency_key = %idempotency_key, "submitting quick delivery");

        self.execute(
            self.client
                .post(url)
                .header("Idempotency-Key", idempotency_key)
                .json(request),
        )
        .await
    }

    async fn fetch_status(&self) -> Result<StatusSnapshot, ClientError> {
        let url = self.endpoint(&["api", "tasks", "status"])?;
        self.execute(self.client.get(url)).await
    }

    async fn check_login(&self, platform: &PlatformCode) -> Result<bool, ClientError> {
        let url = self.endpoint(&["api", platform.as_str(), "task", "login-status"])?;
        let response: LoginStatusResponse = self.execute(self.client.get(url)).await?;
        Ok(response.logged_in)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::HttpError {
            status: status.as_u16(),
            message: truncate_error_message(&body),
        });
    }

    response.json::<T>().await.map_err(|e| {
        if e.is_timeout() {
            ClientError::RequestTimeout(e.to_string())
        } else {
            ClientError::DecodeError(e.to_string())
        }
    })
}

fn classify_transport_error(error: reqwest::Error) -> ClientError {
    if error.is_timeout() {
        ClientError::RequestTimeout(error.to_string())
    } else {
        ClientError::NetworkError(error)
    }
}

/// Keeps backend error bodies short enough to show as a stage message.
pub(crate) fn truncate_error_message(msg: &str) -> String {
    let char_count = msg.chars().count();
    if char_count <= MAX_ERROR_MESSAGE_LENGTH {
        return msg.to_string();
    }
    let truncated: String = msg.chars().take(MAX_ERROR_MESSAGE_LENGTH).collect();
    format!("{truncated}... (truncated, {char_count} chars)")
}
