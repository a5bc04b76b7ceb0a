use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::client::TaskBackend;
use crate::domain::{PlatformCode, PollingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginSource {
    Remote,
    /// The remote check failed and the cached belief was used instead.
    CachedFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoginDecision {
    pub logged_in: bool,
    /// Cache and remote disagreed. Expected after a session expires server side.
    pub diverged: bool,
    pub source: LoginSource,
}

/// Resolves the cached belief against a fresh remote answer. The remote answer wins.
pub fn decide(cached: bool, remote: Option<bool>) -> LoginDecision {
    match remote {
        Some(remote) => LoginDecision {
            logged_in: remote,
            diverged: remote != cached,
            source: LoginSource::Remote,
        },
        None => LoginDecision {
            logged_in: cached,
            diverged: false,
            source: LoginSource::CachedFallback,
        },
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub checks: u64,
    pub divergences: u64,
    pub fallbacks: u64,
}

#[derive(Debug, Default)]
pub(crate) struct LoginReconciler {
    checks: AtomicU64,
    divergences: AtomicU64,
    fallbacks: AtomicU64,
}

impl LoginReconciler {
    pub(crate) async fn reconcile(
        &self,
        backend: &dyn TaskBackend,
        platform: &PlatformCode,
        cached: bool,
    ) -> LoginDecision {
        self.checks.fetch_add(1, Ordering::Relaxed);

        let remote = match backend.check_login(platform).await {
            Ok(logged_in) => Some(logged_in),
            Err(error) => {
                let error = PollingError::from(error);
                warn!(%platform, cached, error = %error, "login check failed, using cached value");
                None
            }
        };

        let decision = decide(cached, remote);
        if decision.diverged {
            self.divergences.fetch_add(1, Ordering::Relaxed);
            warn!(
                %platform,
                cached,
                remote = decision.logged_in,
                "cached login state disagrees with backend"
            );
        }
        if decision.source == LoginSource::CachedFallback {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        debug!(%platform, logged_in = decision.logged_in, source = ?decision.source, "login reconciled");
        decision
    }

    pub(crate) fn stats(&self) -> ReconcileStats {
        ReconcileStats {
            checks: self.checks.load(Ordering::Relaxed),
            divergences: self.divergences.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::FakeBackend;

    #[test]
    fn remote_answer_wins() {
        assert_eq!(
            decide(true, Some(false)),
            LoginDecision {
                logged_in: false,
                diverged: true,
                source: LoginSource::Remote
            }
        );
        assert!(!decide(false, Some(false)).diverged);
    }

    #[test]
    fn missing_remote_answer_falls_back_to_cache() {
        let decision = decide(true, None);
        assert!(decision.logged_in);
        assert!(!decision.diverged);
        assert_eq!(decision.source, LoginSource::CachedFallback);
    }

    #[tokio::test]
    async fn counters_track_divergence_and_fallback() {
        let backend = FakeBackend::logged_in(false);
        let platform = PlatformCode::new("boss").unwrap();
        let reconciler = LoginReconciler::default();

        let decision = reconciler.reconcile(&backend, &platform, true).await;
        assert!(!decision.logged_in);

        backend.set_login(None);
        let decision = reconciler.reconcile(&backend, &platform, true).await;
        assert!(decision.logged_in);

        assert_eq!(
            reconciler.stats(),
            ReconcileStats {
                checks: 2,
                divergences: 1,
                fallbacks: 1
            }
        );
    }
}
