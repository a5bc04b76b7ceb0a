use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::{OrchestratorError, PlatformCode, Stage, StageStatus};
use crate::orchestrator::{StageView, SubmitOptions, TaskOrchestrator};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("{stage} failed: {message}")]
    StageFailed { stage: Stage, message: String },
    #[error("cancelled while waiting for {stage}")]
    Cancelled { stage: Stage },
    #[error("orchestrator went away while waiting for {stage}")]
    ChannelClosed { stage: Stage },
}

/// Final per-stage state of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub platform: PlatformCode,
    pub logged_in: bool,
    pub stages: Vec<StageView>,
}

impl PipelineReport {
    fn capture(orchestrator: &TaskOrchestrator) -> Self {
        let view = orchestrator.view();
        Self {
            platform: view.platform,
            logged_in: view.logged_in,
            stages: view.stages,
        }
    }
}

/// Runs stages one after another, waiting for each to reach a terminal state.
pub struct PipelineRunner {
    orchestrator: TaskOrchestrator,
    cancel: CancellationToken,
}

impl PipelineRunner {
    pub fn new(orchestrator: TaskOrchestrator, cancel: CancellationToken) -> Self {
        Self {
            orchestrator,
            cancel,
        }
    }

    pub fn report(&self) -> PipelineReport {
        PipelineReport::capture(&self.orchestrator)
    }

    /// Submits each stage in order and stops at the first failure.
    ///
    /// LOGIN is skipped when the backend already reports an active login.
    pub async fn run_stages<F>(
        &self,
        stages: &[Stage],
        options: F,
    ) -> Result<PipelineReport, PipelineError>
    where
        F: Fn(Stage) -> SubmitOptions,
    {
        let platform = self.orchestrator.platform();
        for &stage in stages {
            if stage == Stage::Login && self.orchestrator.reconcile_login().await {
                info!(%platform, "already logged in, skipping login");
                continue;
            }

            let receipt = self.orchestrator.submit(stage, options(stage)).await?;
            info!(
                %platform,
                %stage,
                task_id = receipt.task_id.as_deref().unwrap_or("-"),
                "waiting for stage to finish"
            );
            self.await_terminal(stage).await?;
        }
        Ok(self.report())
    }

    pub async fn run_quick_delivery(
        &self,
        config: Option<Value>,
    ) -> Result<PipelineReport, PipelineError> {
        self.orchestrator.quick_deliver(config).await?;
        self.await_terminal(Stage::Deliver).await?;
        Ok(self.report())
    }

    async fn await_terminal(&self, stage: Stage) -> Result<StageView, PipelineError> {
        let mut views = self.orchestrator.subscribe();
        let view = tokio::select! {
            () = self.cancel.cancelled() => return Err(PipelineError::Cancelled { stage }),
            result = views.wait_for(|view| view.stage(stage).status.is_terminal()) => {
                result
                    .map(|view| view.stage(stage).clone())
                    .map_err(|_| PipelineError::ChannelClosed { stage })?
            }
        };

        info!(
            platform = %self.orchestrator.platform(),
            %stage,
            status = %view.status,
            message = %view.message,
            "stage finished"
        );
        match view.status {
            StageStatus::Failed => Err(PipelineError::StageFailed {
                stage,
                message: view.message.clone(),
            }),
            StageStatus::Pending | StageStatus::Running | StageStatus::Success => Ok(view),
        }
    }
}
