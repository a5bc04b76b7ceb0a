use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placeholder shown on dependent stages until a login is confirmed.
pub const WAITING_FOR_LOGIN: &str = "waiting for login";

/// Pipeline stage. Declaration order is pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Login,
    Collect,
    Filter,
    Deliver,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Login, Stage::Collect, Stage::Filter, Stage::Deliver];

    /// Stages gated on a confirmed login.
    pub const DEPENDENTS: [Stage; 3] = [Stage::Collect, Stage::Filter, Stage::Deliver];

    pub const fn index(self) -> usize {
        match self {
            Stage::Login => 0,
            Stage::Collect => 1,
            Stage::Filter => 2,
            Stage::Deliver => 3,
        }
    }

    /// Segment used in `/api/{platform}/task/{stage}`.
    pub const fn path_segment(self) -> &'static str {
        match self {
            Stage::Login => "login",
            Stage::Collect => "collect",
            Stage::Filter => "filter",
            Stage::Deliver => "deliver",
        }
    }

    /// Suffix used in composite snapshot keys (`BOSS_COLLECT`).
    pub const fn key_suffix(self) -> &'static str {
        match self {
            Stage::Login => "LOGIN",
            Stage::Collect => "COLLECT",
            Stage::Filter => "FILTER",
            Stage::Deliver => "DELIVER",
        }
    }

    pub fn from_key_suffix(suffix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.key_suffix().eq_ignore_ascii_case(suffix))
    }

    pub const fn requires_login(self) -> bool {
        !matches!(self, Stage::Login)
    }

    /// Stage whose task id this stage consumes.
    pub const fn upstream(self) -> Option<Stage> {
        match self {
            Stage::Filter => Some(Stage::Collect),
            Stage::Deliver => Some(Stage::Filter),
            Stage::Login | Stage::Collect => None,
        }
    }

    pub const fn ready_message(self) -> &'static str {
        match self {
            Stage::Login => "ready to log in",
            Stage::Collect => "ready to collect",
            Stage::Filter => "ready to filter",
            Stage::Deliver => "ready to deliver",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|stage| stage.path_segment().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                format!("unknown stage '{trimmed}'. Valid values: login, collect, filter, deliver")
            })
    }
}

/// Client-side status model. The backend vocabulary is wider; see [`StageStatus::from_backend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl StageStatus {
    /// Maps a backend status string onto the client model.
    ///
    /// Backend `PENDING` means the job is queued, so it counts as running here.
    /// Returns `None` for vocabulary the client does not know.
    pub fn from_backend(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STARTED" | "IN_PROGRESS" | "RUNNING" | "PENDING" => Some(StageStatus::Running),
            "SUCCESS" | "COMPLETED" => Some(StageStatus::Success),
            "FAILED" | "FAILURE" | "CANCEL" | "CANCELLED" | "CANCELED" => {
                Some(StageStatus::Failed)
            }
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Success | StageStatus::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Running => "RUNNING",
            StageStatus::Success => "SUCCESS",
            StageStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// What the UI shows for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageState {
    pub status: StageStatus,
    pub message: String,
    pub task_id: Option<String>,
}

impl StageState {
    pub fn initial(stage: Stage) -> Self {
        if stage.requires_login() {
            Self::locked()
        } else {
            Self::ready(stage)
        }
    }

    pub fn locked() -> Self {
        Self {
            status: StageStatus::Pending,
            message: WAITING_FOR_LOGIN.to_string(),
            task_id: None,
        }
    }

    pub fn ready(stage: Stage) -> Self {
        Self {
            status: StageStatus::Pending,
            message: stage.ready_message().to_string(),
            task_id: None,
        }
    }

    /// True while the stage shows exactly the login placeholder.
    pub fn is_locked(&self) -> bool {
        self.status == StageStatus::Pending && self.message == WAITING_FOR_LOGIN
    }

    pub fn is_running(&self) -> bool {
        self.status == StageStatus::Running
    }
}

pub(crate) fn default_message(stage: Stage, status: StageStatus) -> String {
    match status {
        StageStatus::Pending => stage.ready_message().to_string(),
        StageStatus::Running => format!("{stage} in progress"),
        StageStatus::Success => format!("{stage} finished"),
        StageStatus::Failed => format!("{stage} failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_vocabulary_maps_onto_three_way_model() {
        for raw in ["STARTED", "IN_PROGRESS", "RUNNING", "PENDING", "running"] {
            assert_eq!(StageStatus::from_backend(raw), Some(StageStatus::Running), "{raw}");
        }
        for raw in ["SUCCESS", "COMPLETED", " completed "] {
            assert_eq!(StageStatus::from_backend(raw), Some(StageStatus::Success), "{raw}");
        }
        for raw in ["FAILED", "FAILURE", "CANCEL", "CANCELLED"] {
            assert_eq!(StageStatus::from_backend(raw), Some(StageStatus::Failed), "{raw}");
        }
        assert_eq!(StageStatus::from_backend("PAUSED"), None);
        assert_eq!(StageStatus::from_backend(""), None);
    }

    #[test]
    fn dependents_start_locked_and_login_starts_ready() {
        assert!(StageState::initial(Stage::Collect).is_locked());
        assert!(StageState::initial(Stage::Deliver).is_locked());
        let login = StageState::initial(Stage::Login);
        assert!(!login.is_locked());
        assert_eq!(login.message, "ready to log in");
    }

    #[test]
    fn stage_parsing_is_case_insensitive() {
        assert_eq!("Collect".parse::<Stage>(), Ok(Stage::Collect));
        assert_eq!(Stage::from_key_suffix("deliver"), Some(Stage::Deliver));
        assert!("apply".parse::<Stage>().is_err());
    }

    #[test]
    fn chaining_follows_pipeline_order() {
        assert_eq!(Stage::Filter.upstream(), Some(Stage::Collect));
        assert_eq!(Stage::Deliver.upstream(), Some(Stage::Filter));
        assert_eq!(Stage::Collect.upstream(), None);
        assert!(Stage::ALL.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
