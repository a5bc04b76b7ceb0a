pub mod config;
pub mod logging_system;
pub mod pipeline;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use logging_system::{LoggingError, setup_logging};
pub use pipeline::{PipelineError, PipelineReport, PipelineRunner};

use std::process;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::{ClientError, HttpTaskBackend, TaskBackend};
use crate::domain::{PlatformCode, Stage};
use crate::orchestrator::OrchestratorRegistry;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub struct App {
    config: Config,
    platform: PlatformCode,
    registry: Arc<OrchestratorRegistry>,
}

impl App {
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        let platform = config.platform_code()?;
        let backend: Arc<dyn TaskBackend> = Arc::new(HttpTaskBackend::new(config.client_config())?);
        let registry = Arc::new(OrchestratorRegistry::new(
            backend,
            config.orchestrator_config(),
        ));

        info!("Starting task-orchestrator v{}", crate::VERSION);
        info!(
            "Configuration: platform={}, base_url={}, stages={:?}, quick_delivery={}, poll_interval={:?}",
            platform, config.base_url, config.stages, config.quick_delivery, config.poll_interval
        );

        Ok(Self {
            config,
            platform,
            registry,
        })
    }

    /// Runs the configured pipeline once. The registry is shut down whatever the outcome.
    pub async fn run(self) -> Result<PipelineReport, AppError> {
        let cancel = CancellationToken::new();
        let signals = shutdown::spawn_signal_listener(cancel.clone());

        let orchestrator = self.registry.get_or_create(&self.platform);
        let runner = PipelineRunner::new(orchestrator, cancel.clone());
        let result = if self.config.quick_delivery {
            let config = self.config.submit_options(Stage::Deliver).config;
            runner.run_quick_delivery(config).await
        } else {
            runner
                .run_stages(&self.config.stages, |stage| self.config.submit_options(stage))
                .await
        };

        let report = runner.report();
        print_report(&report);

        cancel.cancel();
        signals.abort();
        self.registry.shutdown();

        match result {
            Ok(report) => {
                info!(platform = %self.platform, "pipeline finished");
                Ok(report)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn print_report(report: &PipelineReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to render report: {}", e),
    }
}

// Main entry point for the application
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match Config::load(std::env::args()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = setup_logging(config.log_level, config.log_format) {
        eprintln!("Logging error: {e}");
        process::exit(1);
    }

    match App::from_config(config) {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("Application error: {}", e);
                process::exit(1);
            }
        }
        Err(e) => {
            error!("Startup error: {}", e);
            process::exit(1);
        }
    }

    Ok(())
}
