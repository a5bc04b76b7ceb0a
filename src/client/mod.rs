//! Backend access for the orchestrator.
//!
//! [`TaskBackend`] is the seam between the orchestration engine and the remote
//! job service. [`HttpTaskBackend`] talks to the real service over reqwest.

pub mod http;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use http::{ClientConfig, ClientError, HttpTaskBackend, RequestStats};
pub use types::{
    JobRequest, LoginStatusResponse, QuickDeliveryRequest, StatusEntry, StatusSnapshot,
    SubmitResponse,
};

use async_trait::async_trait;

use crate::domain::{PlatformCode, Stage};

#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// `POST /api/{platform}/task/{stage}`
    async fn submit_job(
        &self,
        platform: &PlatformCode,
        stage: Stage,
        request: &JobRequest,
    ) -> Result<SubmitResponse, ClientError>;

    /// `POST /api/task/quick-delivery/submit/{platform}`
    async fn submit_quick_delivery(
        &self,
        platform: &PlatformCode,
        request: &QuickDeliveryRequest,
    ) -> Result<SubmitResponse, ClientError>;

    /// `GET /api/tasks/status`, one read for every platform.
    async fn fetch_status(&self) -> Result<StatusSnapshot, ClientError>;

    /// `GET /api/{platform}/task/login-status`
    async fn check_login(&self, platform: &PlatformCode) -> Result<bool, ClientError>;
}
