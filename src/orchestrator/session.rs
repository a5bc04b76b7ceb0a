use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};

use crate::client::StatusEntry;
use crate::domain::stage::default_message;
use crate::domain::{GatingError, PlatformCode, Stage, StageState, StageStatus};

/// Submission generation per stage, indexed by [`Stage::index`].
pub(crate) type Generations = [u64; 4];

/// Why a snapshot entry was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SkipReason {
    UnknownStatus,
    /// A submission started after the snapshot read, or is still waiting for its response.
    SupersededBySubmission,
    /// `updatedAt` is older than what the stage already reflects.
    OutOfOrder,
    /// Terminal entry for a stage that shows the login placeholder.
    Locked,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::UnknownStatus => "unknown status",
            SkipReason::SupersededBySubmission => "superseded by submission",
            SkipReason::OutOfOrder => "out of order",
            SkipReason::Locked => "locked",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryOutcome {
    Applied { changed: bool },
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub(crate) struct StageSlot {
    pub(crate) state: StageState,
    pub(crate) generation: u64,
    pub(crate) in_flight: bool,
    pub(crate) last_success_task_id: Option<String>,
    last_remote_update: Option<DateTime<Utc>>,
    /// Status of the last applied backend entry since the latest submission.
    last_remote_status: Option<StageStatus>,
    awaiting_fresh: bool,
    running_since: Option<Instant>,
}

impl StageSlot {
    fn new(stage: Stage) -> Self {
        Self {
            state: StageState::initial(stage),
            generation: 0,
            in_flight: false,
            last_success_task_id: None,
            last_remote_update: None,
            last_remote_status: None,
            awaiting_fresh: false,
            running_since: None,
        }
    }

    /// Running or reserved by a submission that has not resolved yet.
    pub(crate) fn is_busy(&self) -> bool {
        self.in_flight || self.state.is_running()
    }

    fn replace_state(&mut self, next: StageState, now: Instant) -> bool {
        if next.status == StageStatus::Running {
            if !self.state.is_running() {
                self.running_since = Some(now);
            }
        } else {
            self.running_since = None;
        }
        if self.state == next {
            return false;
        }
        self.state = next;
        true
    }
}

/// Stage table for one platform. Owned by exactly one orchestrator.
#[derive(Debug, Clone)]
pub(crate) struct PlatformSession {
    platform: PlatformCode,
    slots: [StageSlot; 4],
    last_known_login: bool,
}

impl PlatformSession {
    pub(crate) fn new(platform: PlatformCode) -> Self {
        Self {
            platform,
            slots: Stage::ALL.map(StageSlot::new),
            last_known_login: false,
        }
    }

    pub(crate) fn platform(&self) -> &PlatformCode {
        &self.platform
    }

    pub(crate) fn slot(&self, stage: Stage) -> &StageSlot {
        &self.slots[stage.index()]
    }

    fn slot_mut(&mut self, stage: Stage) -> &mut StageSlot {
        &mut self.slots[stage.index()]
    }

    pub(crate) fn state(&self, stage: Stage) -> &StageState {
        &self.slot(stage).state
    }

    pub(crate) fn last_known_login(&self) -> bool {
        self.last_known_login
    }

    pub(crate) fn generations(&self) -> Generations {
        Stage::ALL.map(|stage| self.slot(stage).generation)
    }

    /// Total submissions ever started on this session.
    pub(crate) fn activity(&self) -> u64 {
        self.slots.iter().map(|slot| slot.generation).sum()
    }

    pub(crate) fn any_busy(&self) -> bool {
        self.slots.iter().any(StageSlot::is_busy)
    }

    pub(crate) fn try_reserve(&mut self, stage: Stage) -> Result<(), GatingError> {
        let platform = self.platform.clone();
        let slot = self.slot_mut(stage);
        if slot.is_busy() {
            return Err(GatingError::AlreadyRunning { platform, stage });
        }
        slot.in_flight = true;
        Ok(())
    }

    pub(crate) fn release(&mut self, stage: Stage) {
        self.slot_mut(stage).in_flight = false;
    }

    /// Task id a submission of `stage` should carry: the upstream stage's current
    /// id when it shows SUCCESS, otherwise the last id it succeeded with.
    pub(crate) fn chain_task_id(&self, stage: Stage) -> Option<String> {
        let upstream = self.slot(stage.upstream()?);
        if upstream.state.status == StageStatus::Success
            && let Some(task_id) = &upstream.state.task_id
        {
            return Some(task_id.clone());
        }
        upstream.last_success_task_id.clone()
    }

    /// Optimistic RUNNING for a new submission. Returns the submission's generation.
    pub(crate) fn begin_submission(&mut self, stage: Stage, now: Instant) -> u64 {
        let slot = self.slot_mut(stage);
        slot.generation += 1;
        slot.awaiting_fresh = true;
        slot.last_remote_status = None;
        slot.replace_state(
            StageState {
                status: StageStatus::Running,
                message: format!("{stage} submitted"),
                task_id: None,
            },
            now,
        );
        slot.generation
    }

    /// Records the backend's acceptance. Ignored when a newer submission exists
    /// or a snapshot already resolved the job.
    pub(crate) fn complete_submission(
        &mut self,
        stage: Stage,
        generation: u64,
        task_id: Option<String>,
        message: Option<String>,
    ) -> bool {
        let slot = self.slot_mut(stage);
        if slot.generation != generation || !slot.state.is_running() {
            return false;
        }
        let mut changed = false;
        if slot.state.task_id.is_none() && task_id.is_some() {
            slot.state.task_id = task_id;
            changed = true;
        }
        if let Some(message) = message
            && slot.state.message != message
        {
            slot.state.message = message;
            changed = true;
        }
        changed
    }

    pub(crate) fn fail_submission(&mut self, stage: Stage, generation: u64, message: String) -> bool {
        let slot = self.slot_mut(stage);
        if slot.generation != generation {
            return false;
        }
        slot.replace_state(
            StageState {
                status: StageStatus::Failed,
                message,
                task_id: None,
            },
            Instant::now(),
        )
    }

    /// Updates the cached login belief. Placeholders follow the new value;
    /// running and completed stages are left alone.
    pub(crate) fn set_login(&mut self, logged_in: bool) -> bool {
        if self.last_known_login == logged_in {
            return false;
        }
        self.last_known_login = logged_in;
        for stage in Stage::DEPENDENTS {
            let slot = self.slot_mut(stage);
            if logged_in && slot.state.is_locked() {
                slot.state = StageState::ready(stage);
            } else if !logged_in
                && slot.state.status == StageStatus::Pending
                && !slot.state.is_locked()
            {
                slot.state = StageState::locked();
            }
        }
        true
    }

    /// Applies one snapshot entry.
    ///
    /// `observed` is the stage generation read before the snapshot was fetched;
    /// `None` means the entry is current (pushed rather than polled).
    pub(crate) fn apply_entry(
        &mut self,
        stage: Stage,
        entry: &StatusEntry,
        observed: Option<u64>,
        now: Instant,
    ) -> EntryOutcome {
        let Some(status) = StageStatus::from_backend(&entry.status) else {
            return EntryOutcome::Skipped(SkipReason::UnknownStatus);
        };

        let slot = self.slot(stage);
        if slot.in_flight || observed.is_some_and(|generation| generation != slot.generation) {
            return EntryOutcome::Skipped(SkipReason::SupersededBySubmission);
        }
        if let (Some(incoming), Some(applied)) = (entry.updated_at, slot.last_remote_update) {
            let stale = if slot.awaiting_fresh {
                incoming <= applied
            } else {
                incoming < applied
            };
            if stale {
                return EntryOutcome::Skipped(SkipReason::OutOfOrder);
            }
        }
        if stage.requires_login() && slot.state.is_locked() && status.is_terminal() {
            return EntryOutcome::Skipped(SkipReason::Locked);
        }

        let previous = slot.last_remote_status;
        let task_id = match status {
            StageStatus::Success | StageStatus::Running => {
                entry.task_id.clone().or_else(|| slot.state.task_id.clone())
            }
            StageStatus::Pending | StageStatus::Failed => None,
        };
        let next = StageState {
            status,
            message: entry
                .message
                .clone()
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| default_message(stage, status)),
            task_id,
        };

        let slot = self.slot_mut(stage);
        if let Some(incoming) = entry.updated_at {
            slot.last_remote_update = Some(incoming);
        }
        slot.awaiting_fresh = false;
        slot.last_remote_status = Some(status);
        if status == StageStatus::Success && next.task_id.is_some() {
            slot.last_success_task_id.clone_from(&next.task_id);
        }
        let mut changed = slot.replace_state(next, now);

        if stage == Stage::Login && previous != Some(status) {
            changed |= self.cascade_login(status);
        }
        EntryOutcome::Applied { changed }
    }

    fn cascade_login(&mut self, status: StageStatus) -> bool {
        match status {
            StageStatus::Success => self.set_login(true),
            StageStatus::Failed => {
                let mut changed = self.last_known_login;
                self.last_known_login = false;
                for stage in Stage::DEPENDENTS {
                    let slot = self.slot_mut(stage);
                    if !slot.state.is_running() && !slot.state.is_locked() {
                        slot.state = StageState::locked();
                        slot.running_since = None;
                        changed = true;
                    }
                }
                changed
            }
            StageStatus::Pending | StageStatus::Running => false,
        }
    }

    /// Fails stages that have been RUNNING longer than `timeout`.
    pub(crate) fn expire_stale(&mut self, timeout: Duration, now: Instant) -> Vec<Stage> {
        let mut expired = Vec::new();
        for stage in Stage::ALL {
            let slot = self.slot_mut(stage);
            let overdue = slot
                .running_since
                .is_some_and(|since| now.saturating_duration_since(since) >= timeout);
            if slot.state.is_running() && !slot.in_flight && overdue {
                slot.replace_state(
                    StageState {
                        status: StageStatus::Failed,
                        message: format!(
                            "{stage} timed out after {}s without a result",
                            timeout.as_secs()
                        ),
                        task_id: None,
                    },
                    now,
                );
                expired.push(stage);
            }
        }
        expired
    }
}
