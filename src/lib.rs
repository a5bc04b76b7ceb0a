#![deny(warnings, rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::missing_errors_doc,      // Internal API
    clippy::missing_panics_doc,      // Internal API
    clippy::module_name_repetitions, // e.g. ClientError in client module
    clippy::must_use_candidate,      // Annotated selectively on critical APIs
    clippy::doc_markdown             // Internal API
)]

pub mod app;
pub mod client;
pub mod domain;
pub mod orchestrator;

// Re-export main types for easy access
pub use app::{App, Config};
pub use client::{HttpTaskBackend, TaskBackend};
pub use domain::{PlatformCode, Stage, StageState, StageStatus};
pub use orchestrator::{OrchestratorConfig, OrchestratorRegistry, SubmitOptions, TaskOrchestrator};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
