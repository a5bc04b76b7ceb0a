use thiserror::Error;

use super::platform::PlatformCode;
use super::stage::Stage;

/// A submission refused locally because a precondition is not met.
/// Never reaches the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatingError {
    #[error("{platform}: {stage} requires an active login")]
    NotLoggedIn { platform: PlatformCode, stage: Stage },
    #[error("{platform}: {stage} already has a submission in flight")]
    AlreadyRunning { platform: PlatformCode, stage: Stage },
}

/// The backend rejected the job or could not be reached. The stage is FAILED.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("{stage} rejected by backend: {message}")]
    Rejected { stage: Stage, message: String },
    #[error("{stage} submission failed: {message}")]
    Transport { stage: Stage, message: String },
}

impl SubmissionError {
    pub fn message(&self) -> &str {
        match self {
            SubmissionError::Rejected { message, .. } | SubmissionError::Transport { message, .. } => {
                message
            }
        }
    }
}

/// Transient failure while asking the backend about jobs. Never alters stage state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollingError {
    #[error("status request failed: {0}")]
    Transport(String),
    #[error("status endpoint returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("status response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error(transparent)]
    Gating(#[from] GatingError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid platform code {0:?}: expected ascii letters, digits, '-' or '_'")]
pub struct InvalidPlatformCode(pub String);
