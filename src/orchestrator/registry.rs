use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::engine::{OrchestratorConfig, PollOutcome, TaskOrchestrator};
use crate::client::{StatusSnapshot, TaskBackend};
use crate::domain::PlatformCode;

/// One orchestrator per platform for the whole process.
///
/// Built once at startup and passed to whoever needs cross-platform access,
/// such as a handler that routes a status event for a platform the user is not
/// currently looking at.
pub struct OrchestratorRegistry {
    backend: Arc<dyn TaskBackend>,
    config: OrchestratorConfig,
    orchestrators: RwLock<HashMap<PlatformCode, TaskOrchestrator>>,
}

impl OrchestratorRegistry {
    pub fn new(backend: Arc<dyn TaskBackend>, config: OrchestratorConfig) -> Self {
        Self {
            backend,
            config,
            orchestrators: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the platform's orchestrator, creating it on first use.
    pub fn get_or_create(&self, platform: &PlatformCode) -> TaskOrchestrator {
        if let Some(existing) = self.orchestrators.read().get(platform) {
            return existing.clone();
        }

        let mut orchestrators = self.orchestrators.write();
        orchestrators
            .entry(platform.clone())
            .or_insert_with(|| {
                debug!(%platform, "creating orchestrator");
                TaskOrchestrator::new(platform.clone(), Arc::clone(&self.backend), self.config)
            })
            .clone()
    }

    pub fn get(&self, platform: &PlatformCode) -> Option<TaskOrchestrator> {
        self.orchestrators.read().get(platform).cloned()
    }

    pub fn platforms(&self) -> Vec<PlatformCode> {
        let mut platforms: Vec<PlatformCode> = self.orchestrators.read().keys().cloned().collect();
        platforms.sort();
        platforms
    }

    /// Routes one snapshot to every registered platform.
    ///
    /// Platforms present in the snapshot but not registered are ignored.
    pub fn dispatch_snapshot(&self, snapshot: &StatusSnapshot) -> Vec<(PlatformCode, PollOutcome)> {
        let orchestrators: Vec<TaskOrchestrator> =
            self.orchestrators.read().values().cloned().collect();
        let mut outcomes: Vec<(PlatformCode, PollOutcome)> = orchestrators
            .iter()
            .map(|orchestrator| {
                (
                    orchestrator.platform().clone(),
                    orchestrator.apply_snapshot(snapshot),
                )
            })
            .collect();
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }

    /// Stops every poller and empties the registry.
    pub fn shutdown(&self) {
        let drained: Vec<TaskOrchestrator> = self
            .orchestrators
            .write()
            .drain()
            .map(|(_, orchestrator)| orchestrator)
            .collect();
        for orchestrator in &drained {
            orchestrator.shutdown();
        }
        info!(platforms = drained.len(), "orchestrator registry shut down");
    }

    pub fn len(&self) -> usize {
        self.orchestrators.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orchestrators.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StatusEntry;
    use crate::client::mock::FakeBackend;
    use crate::domain::Stage;

    fn registry() -> OrchestratorRegistry {
        OrchestratorRegistry::new(
            Arc::new(FakeBackend::logged_in(true)),
            OrchestratorConfig::default(),
        )
    }

    #[test]
    fn same_platform_shares_one_orchestrator() {
        let registry = registry();
        let boss = PlatformCode::new("boss").unwrap();
        let first = registry.get_or_create(&boss);
        let second = registry.get_or_create(&boss);

        first.apply_status(Stage::Login, &StatusEntry::new("SUCCESS"));
        assert!(second.last_known_login());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&PlatformCode::new("zhilian").unwrap()).is_none());
    }

    #[test]
    fn dispatch_reaches_every_registered_platform() {
        let registry = registry();
        let boss = PlatformCode::new("boss").unwrap();
        let liepin = PlatformCode::new("liepin").unwrap();
        registry.get_or_create(&boss);
        registry.get_or_create(&liepin);

        let snapshot = StatusSnapshot::from_entries([
            ("BOSS_LOGIN", StatusEntry::new("SUCCESS")),
            ("LIEPIN_LOGIN", StatusEntry::new("FAILED")),
            ("ZHILIAN_LOGIN", StatusEntry::new("SUCCESS")),
        ]);
        let outcomes = registry.dispatch_snapshot(&snapshot);

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, boss);
        assert!(outcomes[0].1.changed);
        assert!(registry.get(&boss).unwrap().last_known_login());
        assert!(!registry.get(&liepin).unwrap().last_known_login());
        assert_eq!(registry.platforms(), vec![boss, liepin]);
    }

    #[test]
    fn shutdown_empties_registry() {
        let registry = registry();
        registry.get_or_create(&PlatformCode::new("boss").unwrap());
        registry.shutdown();
        assert!(registry.is_empty());
    }
}
