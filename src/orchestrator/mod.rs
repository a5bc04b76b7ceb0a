//! Per-platform task orchestration.
//!
//! A [`TaskOrchestrator`] owns the stage table of one platform, submits jobs,
//! applies status snapshots and publishes derived [`SessionView`]s. The
//! [`OrchestratorRegistry`] keeps exactly one orchestrator per platform.

mod engine;
mod gate;
mod poller;
mod reconciler;
mod registry;
mod session;

pub use engine::{
    DEFAULT_POLL_INTERVAL, OrchestratorConfig, PollOutcome, SubmitOptions, SubmitReceipt,
    TaskOrchestrator,
};
pub use gate::{SessionView, StageView};
pub use reconciler::{LoginDecision, LoginSource, ReconcileStats, decide};
pub use registry::OrchestratorRegistry;
