//! Derived presentation state.
//!
//! Views are plain values recomputed from the session after every mutation and
//! compared before publishing, so subscribers only wake on a visible change.

use serde::Serialize;

use super::session::PlatformSession;
use crate::domain::{PlatformCode, Stage, StageStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageView {
    pub stage: Stage,
    pub status: StageStatus,
    pub message: String,
    pub task_id: Option<String>,
    pub enabled: bool,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub platform: PlatformCode,
    pub logged_in: bool,
    pub stages: Vec<StageView>,
}

impl SessionView {
    pub fn stage(&self, stage: Stage) -> &StageView {
        &self.stages[stage.index()]
    }
}

pub(crate) fn is_enabled(session: &PlatformSession, stage: Stage) -> bool {
    let slot = session.slot(stage);
    !slot.is_busy() && (!stage.requires_login() || session.last_known_login())
}

pub(crate) fn label(session: &PlatformSession, stage: Stage) -> String {
    let slot = session.slot(stage);
    if stage.requires_login() && !session.last_known_login() && !slot.is_busy() {
        return "Log in first".to_string();
    }
    let status = if slot.in_flight {
        StageStatus::Running
    } else {
        slot.state.status
    };
    let label = match (stage, status) {
        (Stage::Login, StageStatus::Pending) => "Log in",
        (Stage::Collect, StageStatus::Pending) => "Start collecting",
        (Stage::Filter, StageStatus::Pending) => "Start filtering",
        (Stage::Deliver, StageStatus::Pending) => "Start delivery",
        (Stage::Login, StageStatus::Running) => "Logging in...",
        (Stage::Collect, StageStatus::Running) => "Collecting...",
        (Stage::Filter, StageStatus::Running) => "Filtering...",
        (Stage::Deliver, StageStatus::Running) => "Delivering...",
        (Stage::Login, StageStatus::Success) => "Log in again",
        (Stage::Collect, StageStatus::Success) => "Collect again",
        (Stage::Filter, StageStatus::Success) => "Filter again",
        (Stage::Deliver, StageStatus::Success) => "Deliver again",
        (Stage::Login, StageStatus::Failed) => "Retry login",
        (Stage::Collect, StageStatus::Failed) => "Retry collecting",
        (Stage::Filter, StageStatus::Failed) => "Retry filtering",
        (Stage::Deliver, StageStatus::Failed) => "Retry delivery",
    };
    label.to_string()
}

pub(crate) fn session_view(session: &PlatformSession) -> SessionView {
    SessionView {
        platform: session.platform().clone(),
        logged_in: session.last_known_login(),
        stages: Stage::ALL
            .into_iter()
            .map(|stage| {
                let state = session.state(stage);
                StageView {
                    stage,
                    status: state.status,
                    message: state.message.clone(),
                    task_id: state.task_id.clone(),
                    enabled: is_enabled(session, stage),
                    label: label(session, stage),
                }
            })
            .collect(),
    }
}
