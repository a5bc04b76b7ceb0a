use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{
    ClientError, JobRequest, QuickDeliveryRequest, StatusSnapshot, SubmitResponse, TaskBackend,
};
use crate::domain::{PlatformCode, Stage};

/// In-memory backend with scripted answers and a call log.
#[derive(Default)]
pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    /// `None` makes the login check fail with a transport error.
    login: Option<bool>,
    submit_script: VecDeque<Result<SubmitResponse, String>>,
    snapshot: Option<StatusSnapshot>,
    submissions: Vec<(PlatformCode, Stage, JobRequest)>,
    quick_deliveries: Vec<(PlatformCode, QuickDeliveryRequest)>,
    login_checks: usize,
    status_reads: usize,
    next_task: usize,
}

impl FakeBackend {
    pub(crate) fn logged_in(logged_in: bool) -> Self {
        let backend = Self::default();
        backend.set_login(Some(logged_in));
        backend
    }

    pub(crate) fn set_login(&self, login: Option<bool>) {
        self.state.lock().login = login;
    }

    pub(crate) fn push_submit(&self, response: Result<SubmitResponse, String>) {
        self.state.lock().submit_script.push_back(response);
    }

    pub(crate) fn set_snapshot(&self, snapshot: StatusSnapshot) {
        self.state.lock().snapshot = Some(snapshot);
    }

    pub(crate) fn submissions(&self) -> Vec<(PlatformCode, Stage, JobRequest)> {
        self.state.lock().submissions.clone()
    }

    pub(crate) fn quick_deliveries(&self) -> usize {
        self.state.lock().quick_deliveries.len()
    }

    pub(crate) fn login_checks(&self) -> usize {
        self.state.lock().login_checks
    }

    pub(crate) fn status_reads(&self) -> usize {
        self.state.lock().status_reads
    }

    fn next_response(state: &mut FakeState) -> Result<SubmitResponse, ClientError> {
        match state.submit_script.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(ClientError::HttpError {
                status: 500,
                message,
            }),
            None => {
                state.next_task += 1;
                Ok(SubmitResponse {
                    success: true,
                    task_id: Some(format!("task-{}", state.next_task)),
                    message: None,
                })
            }
        }
    }
}

#[async_trait]
impl TaskBackend for FakeBackend {
    async fn submit_job(
        &self,
        platform: &PlatformCode,
        stage: Stage,
        request: &JobRequest,
    ) -> Result<SubmitResponse, ClientError> {
        let mut state = self.state.lock();
        state
            .submissions
            .push((platform.clone(), stage, request.clone()));
        Self::next_response(&mut state)
    }

    async fn submit_quick_delivery(
        &self,
        platform: &PlatformCode,
        request: &QuickDeliveryRequest,
    ) -> Result<SubmitResponse, ClientError> {
        let mut state = self.state.lock();
        state
            .quick_deliveries
            .push((platform.clone(), request.clone()));
        Self::next_response(&mut state)
    }

    async fn fetch_status(&self) -> Result<StatusSnapshot, ClientError> {
        let mut state = self.state.lock();
        state.status_reads += 1;
        state
            .snapshot
            .clone()
            .ok_or_else(|| ClientError::DecodeError("no snapshot scripted".to_string()))
    }

    async fn check_login(&self, _platform: &PlatformCode) -> Result<bool, ClientError> {
        let mut state = self.state.lock();
        state.login_checks += 1;
        state
            .login
            .ok_or_else(|| ClientError::RequestTimeout("login check timed out".to_string()))
    }
}
