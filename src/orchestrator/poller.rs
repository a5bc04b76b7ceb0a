use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shortest period a loop will run with; `tokio::time::interval` rejects zero.
pub(crate) const MIN_POLL_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickControl {
    Continue,
    /// Nothing left to watch as of `activity`.
    Stop { activity: u64 },
}

/// Something the poller drives once per tick.
#[async_trait]
pub(crate) trait PollTarget: Send + Sync + 'static {
    async fn tick(&self) -> TickControl;

    /// Monotonic submission counter, compared against the value a stop decision was based on.
    fn activity(&self) -> u64;
}

struct ActiveLoop {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct PollerShared {
    active: Mutex<Option<ActiveLoop>>,
    next_id: AtomicU64,
}

/// At most one timer loop at a time; start is idempotent.
#[derive(Default)]
pub(crate) struct StatusPoller {
    shared: Arc<PollerShared>,
}

impl StatusPoller {
    /// Spawns the loop unless one is already running. Returns whether a loop was spawned.
    ///
    /// The first tick fires one `period` after start. A loop whose task has
    /// finished without clearing its slot is replaced.
    pub(crate) fn start<T: PollTarget>(&self, target: Weak<T>, period: Duration) -> bool {
        let mut active = self.shared.active.lock();
        if active.as_ref().is_some_and(|active| !active.task.is_finished()) {
            return false;
        }
        let period = if period < MIN_POLL_PERIOD {
            warn!(period_ms = period.as_millis() as u64, "poll period too short, clamping");
            MIN_POLL_PERIOD
        } else {
            period
        };

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.shared),
            id,
            target,
            period,
            cancel.clone(),
        ));
        *active = Some(ActiveLoop { id, cancel, task });
        true
    }

    pub(crate) fn stop(&self) -> bool {
        let stopped = self.shared.active.lock().take();
        match stopped {
            Some(active) => {
                active.cancel.cancel();
                debug!(loop_id = active.id, "status poller stopped");
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.shared
            .active
            .lock()
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop<T: PollTarget>(
    shared: Arc<PollerShared>,
    id: u64,
    target: Weak<T>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(loop_id = id, period_ms = period.as_millis() as u64, "status poller started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(strong) = target.upgrade() else {
            break;
        };
        let control = tokio::select! {
            () = cancel.cancelled() => return,
            control = strong.tick() => control,
        };

        if let TickControl::Stop { activity } = control {
            let mut active = shared.active.lock();
            // A submission since the decision needs this loop.
            if strong.activity() != activity {
                continue;
            }
            if active.as_ref().is_some_and(|active| active.id == id) {
                *active = None;
            }
            debug!(loop_id = id, "status poller finished");
            return;
        }
    }

    let mut active = shared.active.lock();
    if active.as_ref().is_some_and(|active| active.id == id) {
        *active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        ticks: AtomicUsize,
        stop_after: usize,
    }

    #[async_trait]
    impl PollTarget for Counter {
        async fn tick(&self) -> TickControl {
            let ticks = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if ticks >= self.stop_after {
                TickControl::Stop { activity: 0 }
            } else {
                TickControl::Continue
            }
        }

        fn activity(&self) -> u64 {
            0
        }
    }

    fn counter(stop_after: usize) -> Arc<Counter> {
        Arc::new(Counter {
            ticks: AtomicUsize::new(0),
            stop_after,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let target = counter(usize::MAX);
        let poller = StatusPoller::default();
        assert!(poller.start(Arc::downgrade(&target), Duration::from_millis(100)));
        assert!(!poller.start(Arc::downgrade(&target), Duration::from_millis(100)));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(target.ticks.load(Ordering::SeqCst), 3);
        assert!(poller.stop());
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ends_itself_and_can_restart() {
        let target = counter(2);
        let poller = StatusPoller::default();
        poller.start(Arc::downgrade(&target), Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(target.ticks.load(Ordering::SeqCst), 2);
        assert!(!poller.is_running());

        assert!(poller.start(Arc::downgrade(&target), Duration::from_millis(100)));
        assert!(poller.is_running());
        poller.stop();
    }

    struct Panicking;

    #[async_trait]
    impl PollTarget for Panicking {
        async fn tick(&self) -> TickControl {
            panic!("tick failed");
        }

        fn activity(&self) -> u64 {
            0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn finished_loop_is_replaced_on_start() {
        let broken = Arc::new(Panicking);
        let poller = StatusPoller::default();
        assert!(poller.start(Arc::downgrade(&broken), Duration::from_millis(100)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!poller.is_running());

        let target = counter(usize::MAX);
        assert!(poller.start(Arc::downgrade(&target), Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(target.ticks.load(Ordering::SeqCst), 1);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_clamped() {
        let target = counter(usize::MAX);
        let poller = StatusPoller::default();
        assert!(poller.start(Arc::downgrade(&target), Duration::ZERO));

        tokio::time::sleep(MIN_POLL_PERIOD * 3 + Duration::from_millis(10)).await;
        assert_eq!(target.ticks.load(Ordering::SeqCst), 3);
        assert!(poller.is_running());
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_target_ends_loop() {
        let target = counter(usize::MAX);
        let poller = StatusPoller::default();
        poller.start(Arc::downgrade(&target), Duration::from_millis(100));
        drop(target);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!poller.is_running());
    }
}
