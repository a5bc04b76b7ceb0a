//! Domain layer for task-orchestrator.
//!
//! Contains the canonical types shared across all modules:
//! - `Stage` / `StageStatus` / `StageState`: the per-stage state machine
//! - `PlatformCode`: platform identity and composite snapshot keys
//! - Typed errors: `GatingError`, `SubmissionError`, `PollingError`

pub mod error;
pub mod platform;
pub mod stage;

pub use error::{
    GatingError, InvalidPlatformCode, OrchestratorError, PollingError, SubmissionError,
};
pub use platform::{PlatformCode, parse_status_key};
pub use stage::{Stage, StageState, StageStatus, WAITING_FOR_LOGIN};
