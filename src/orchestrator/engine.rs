use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::gate::{self, SessionView};
use super::poller::{MIN_POLL_PERIOD, PollTarget, StatusPoller, TickControl};
use super::reconciler::{LoginDecision, LoginReconciler, LoginSource, ReconcileStats};
use super::session::{EntryOutcome, Generations, PlatformSession};
use crate::client::http::truncate_error_message;
use crate::client::{
    ClientError, JobRequest, QuickDeliveryRequest, StatusEntry, StatusSnapshot, SubmitResponse,
    TaskBackend,
};
use crate::domain::{
    GatingError, OrchestratorError, PlatformCode, PollingError, Stage, StageState,
    SubmissionError,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    /// RUNNING stages older than this are failed on the next tick. Off when `None`.
    pub stage_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stage_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitOptions {
    /// Stage-specific configuration, forwarded verbatim as `config`.
    pub config: Option<Value>,
    /// Only read for DELIVER.
    pub enable_actual_delivery: bool,
}

impl SubmitOptions {
    pub fn with_config(config: Value) -> Self {
        Self {
            config: Some(config),
            ..Self::default()
        }
    }
}

/// Backend acceptance of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub stage: Stage,
    pub task_id: Option<String>,
    pub generation: u64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Some stage state or the login belief changed.
    pub changed: bool,
    /// DELIVER reached a terminal state in this application.
    pub pipeline_complete: bool,
    /// No stage is running or reserved afterwards.
    pub idle: bool,
    activity: u64,
}

enum Request {
    Job(JobRequest),
    QuickDelivery(QuickDeliveryRequest),
}

/// Per-platform orchestration engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    this: Weak<Inner>,
    platform: PlatformCode,
    backend: Arc<dyn TaskBackend>,
    config: OrchestratorConfig,
    session: Mutex<PlatformSession>,
    reconciler: LoginReconciler,
    poller: StatusPoller,
    views: watch::Sender<SessionView>,
}

/// Releases a stage reservation if the submitting future is dropped.
struct Reservation<'a> {
    inner: &'a Inner,
    stage: Stage,
    generation: Option<u64>,
    armed: bool,
}

impl Reservation<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut session = self.inner.session.lock();
            session.release(self.stage);
            if let Some(generation) = self.generation {
                session.fail_submission(self.stage, generation, "submission cancelled".to_string());
            }
        }
        self.inner.publish();
    }
}

impl TaskOrchestrator {
    /// `config.poll_interval` is raised to a 100ms floor.
    pub fn new(
        platform: PlatformCode,
        backend: Arc<dyn TaskBackend>,
        mut config: OrchestratorConfig,
    ) -> Self {
        if config.poll_interval < MIN_POLL_PERIOD {
            warn!(
                %platform,
                poll_interval_ms = config.poll_interval.as_millis() as u64,
                "poll interval below minimum, using {}ms",
                MIN_POLL_PERIOD.as_millis()
            );
            config.poll_interval = MIN_POLL_PERIOD;
        }
        let session = PlatformSession::new(platform.clone());
        let (views, _) = watch::channel(gate::session_view(&session));
        let inner = Arc::new_cyclic(|this| Inner {
            this: this.clone(),
            platform,
            backend,
            config,
            session: Mutex::new(session),
            reconciler: LoginReconciler::default(),
            poller: StatusPoller::default(),
            views,
        });
        Self { inner }
    }

    pub fn platform(&self) -> &PlatformCode {
        &self.inner.platform
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Submits `stage` as a new job.
    ///
    /// Refused without a network call when the stage is already running, or when
    /// a dependent stage is submitted while the backend reports no login.
    /// FILTER and DELIVER carry the upstream task id as it is at this moment.
    pub async fn submit(
        &self,
        stage: Stage,
        options: SubmitOptions,
    ) -> Result<SubmitReceipt, OrchestratorError> {
        self.inner
            .run(stage, |session| Request::Job(build_request(session, stage, options)))
            .await
    }

    /// One backend job covering the whole pipeline, tracked on DELIVER.
    pub async fn quick_deliver(
        &self,
        config: Option<Value>,
    ) -> Result<SubmitReceipt, OrchestratorError> {
        self.inner
            .run(Stage::Deliver, |_| {
                Request::QuickDelivery(QuickDeliveryRequest { config })
            })
            .await
    }

    /// Applies one entry pushed from outside the poller. Returns whether anything changed.
    ///
    /// A DELIVER entry that moves the stage into a terminal state stops the poller.
    pub fn apply_status(&self, stage: Stage, entry: &StatusEntry) -> bool {
        let (outcome, delivered) = {
            let mut session = self.inner.session.lock();
            let before = session.state(stage).status;
            let outcome = session.apply_entry(stage, entry, None, Instant::now());
            let after = session.state(stage).status;
            let delivered = stage == Stage::Deliver && after.is_terminal() && before != after;
            (outcome, delivered)
        };
        match outcome {
            EntryOutcome::Applied { changed } => {
                if changed {
                    self.inner.publish();
                }
                if delivered && self.inner.poller.stop() {
                    info!(platform = %self.inner.platform, "delivery finished, pipeline complete");
                }
                changed
            }
            EntryOutcome::Skipped(reason) => {
                debug!(platform = %self.inner.platform, %stage, %reason, "status entry skipped");
                false
            }
        }
    }

    /// Applies this platform's slice of a snapshot. Stops the poller when DELIVER finishes.
    pub fn apply_snapshot(&self, snapshot: &StatusSnapshot) -> PollOutcome {
        let outcome = self.inner.apply(snapshot, None);
        if outcome.pipeline_complete {
            self.inner.poller.stop();
        }
        outcome
    }

    /// One poll tick, outside the timer.
    pub async fn poll_once(&self) -> Result<PollOutcome, PollingError> {
        self.inner.poll_once().await
    }

    pub async fn reconcile_login(&self) -> bool {
        self.inner.reconcile_login().await.logged_in
    }

    pub async fn reconcile_login_decision(&self) -> LoginDecision {
        self.inner.reconcile_login().await
    }

    pub fn state(&self, stage: Stage) -> StageState {
        self.inner.session.lock().state(stage).clone()
    }

    pub fn last_known_login(&self) -> bool {
        self.inner.session.lock().last_known_login()
    }

    pub fn is_stage_enabled(&self, stage: Stage) -> bool {
        gate::is_enabled(&self.inner.session.lock(), stage)
    }

    pub fn label(&self, stage: Stage) -> String {
        gate::label(&self.inner.session.lock(), stage)
    }

    pub fn view(&self) -> SessionView {
        self.inner.views.borrow().clone()
    }

    /// The receiver only wakes when the derived view changes value.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.inner.views.subscribe()
    }

    pub fn start_polling(&self) -> bool {
        self.inner.start_polling()
    }

    pub fn stop_polling(&self) -> bool {
        self.inner.poller.stop()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.poller.is_running()
    }

    pub fn reconcile_stats(&self) -> ReconcileStats {
        self.inner.reconciler.stats()
    }

    pub fn shutdown(&self) {
        if self.inner.poller.stop() {
            info!(platform = %self.inner.platform, "orchestrator shut down");
        }
    }
}

impl Inner {
    async fn run<F>(&self, stage: Stage, build: F) -> Result<SubmitReceipt, OrchestratorError>
    where
        F: FnOnce(&PlatformSession) -> Request,
    {
        let platform = &self.platform;
        self.session.lock().try_reserve(stage)?;
        let mut reservation = Reservation {
            inner: self,
            stage,
            generation: None,
            armed: true,
        };
        self.publish();

        if stage.requires_login() && !self.reconcile_login().await.logged_in {
            warn!(%platform, %stage, "submission refused: not logged in");
            drop(reservation);
            return Err(GatingError::NotLoggedIn {
                platform: platform.clone(),
                stage,
            }
            .into());
        }

        let (generation, request) = {
            let mut session = self.session.lock();
            let request = build(&session);
            (session.begin_submission(stage, Instant::now()), request)
        };
        reservation.generation = Some(generation);
        self.publish();

        let response = match &request {
            Request::Job(request) => {
                info!(%platform, %stage, generation, "submitting job");
                self.backend.submit_job(platform, stage, request).await
            }
            Request::QuickDelivery(request) => {
                info!(%platform, generation, "submitting quick delivery");
                self.backend.submit_quick_delivery(platform, request).await
            }
        };

        let result = {
            let mut session = self.session.lock();
            session.release(stage);
            match classify_response(stage, response) {
                Ok(accepted) => {
                    session.complete_submission(
                        stage,
                        generation,
                        accepted.task_id.clone(),
                        accepted.message.clone(),
                    );
                    Ok(SubmitReceipt {
                        stage,
                        task_id: accepted.task_id,
                        generation,
                        message: accepted.message,
                    })
                }
                Err(error) => {
                    session.fail_submission(stage, generation, error.message().to_string());
                    Err(error)
                }
            }
        };
        reservation.disarm();
        self.publish();

        match result {
            Ok(receipt) => {
                info!(
                    %platform,
                    %stage,
                    task_id = receipt.task_id.as_deref().unwrap_or("-"),
                    "submission accepted"
                );
                self.start_polling();
                Ok(receipt)
            }
            Err(error) => {
                warn!(%platform, %stage, error = %error, "submission failed");
                Err(error.into())
            }
        }
    }

    async fn reconcile_login(&self) -> LoginDecision {
        let cached = self.session.lock().last_known_login();
        let decision = self
            .reconciler
            .reconcile(self.backend.as_ref(), &self.platform, cached)
            .await;
        if decision.source == LoginSource::Remote {
            let changed = self.session.lock().set_login(decision.logged_in);
            if changed {
                self.publish();
            }
        }
        decision
    }

    async fn poll_once(&self) -> Result<PollOutcome, PollingError> {
        let observed = self.session.lock().generations();
        let snapshot = self.backend.fetch_status().await?;
        Ok(self.apply(&snapshot, Some(observed)))
    }

    /// Applies all four stages under one lock.
    fn apply(&self, snapshot: &StatusSnapshot, observed: Option<Generations>) -> PollOutcome {
        let now = Instant::now();
        let mut outcome = PollOutcome::default();
        let mut skipped = Vec::new();
        let mut expired = Vec::new();
        {
            let mut session = self.session.lock();
            for stage in Stage::ALL {
                let Some(entry) = snapshot.get(&self.platform, stage) else {
                    continue;
                };
                let before = session.state(stage).status;
                let generation = observed.map(|generations| generations[stage.index()]);
                match session.apply_entry(stage, entry, generation, now) {
                    EntryOutcome::Applied { changed } => {
                        outcome.changed |= changed;
                        let after = session.state(stage).status;
                        if stage == Stage::Deliver && after.is_terminal() && before != after {
                            outcome.pipeline_complete = true;
                        }
                    }
                    EntryOutcome::Skipped(reason) => skipped.push((stage, reason)),
                }
            }
            if let Some(timeout) = self.config.stage_timeout {
                expired = session.expire_stale(timeout, now);
                outcome.changed |= !expired.is_empty();
            }
            outcome.idle = !session.any_busy();
            outcome.activity = session.activity();
        }

        for (stage, reason) in skipped {
            debug!(platform = %self.platform, %stage, %reason, "snapshot entry skipped");
        }
        for stage in expired {
            warn!(platform = %self.platform, %stage, "stage timed out waiting for the backend");
        }
        if outcome.pipeline_complete {
            info!(platform = %self.platform, "delivery finished, pipeline complete");
        }
        if outcome.changed {
            self.publish();
        }
        outcome
    }

    fn start_polling(&self) -> bool {
        let started = self
            .poller
            .start(self.this.clone(), self.config.poll_interval);
        if started {
            debug!(platform = %self.platform, "status polling started");
        }
        started
    }

    fn publish(&self) {
        let view = gate::session_view(&self.session.lock());
        self.views.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

#[async_trait]
impl PollTarget for Inner {
    async fn tick(&self) -> TickControl {
        match self.poll_once().await {
            Ok(outcome) if outcome.pipeline_complete || outcome.idle => TickControl::Stop {
                activity: outcome.activity,
            },
            Ok(_) => TickControl::Continue,
            Err(error) => {
                warn!(platform = %self.platform, error = %error, "status poll failed");
                TickControl::Continue
            }
        }
    }

    fn activity(&self) -> u64 {
        self.session.lock().activity()
    }
}

fn build_request(session: &PlatformSession, stage: Stage, options: SubmitOptions) -> JobRequest {
    let SubmitOptions {
        config,
        enable_actual_delivery,
    } = options;
    match stage {
        Stage::Login => JobRequest::Login { config },
        Stage::Collect => JobRequest::Collect { config },
        Stage::Filter => JobRequest::Filter {
            collect_task_id: session.chain_task_id(stage),
            config,
        },
        Stage::Deliver => JobRequest::Deliver {
            filter_task_id: session.chain_task_id(stage),
            config,
            enable_actual_delivery,
        },
    }
}

fn classify_response(
    stage: Stage,
    response: Result<SubmitResponse, ClientError>,
) -> Result<SubmitResponse, SubmissionError> {
    match response {
        Ok(accepted) if accepted.success => Ok(accepted),
        Ok(rejected) => Err(SubmissionError::Rejected {
            stage,
            message: rejected
                .message
                .unwrap_or_else(|| format!("{stage} rejected by backend")),
        }),
        Err(ClientError::HttpError { status, message }) => {
            // Error bodies usually repeat the submission response shape.
            let message = serde_json::from_str::<SubmitResponse>(&message)
                .ok()
                .and_then(|body| body.message)
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| {
                    if message.is_empty() {
                        format!("HTTP {status}")
                    } else {
                        message
                    }
                });
            Err(SubmissionError::Rejected {
                stage,
                message: truncate_error_message(&message),
            })
        }
        Err(other) => Err(SubmissionError::Transport {
            stage,
            message: truncate_error_message(&other.to_string()),
        }),
    }
}
