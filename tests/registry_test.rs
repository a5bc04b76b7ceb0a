use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use task_orchestrator::client::{ClientConfig, HttpTaskBackend, TaskBackend};
use task_orchestrator::{OrchestratorConfig, OrchestratorRegistry, PlatformCode, Stage, StageStatus};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn registry(server: &MockServer) -> (Arc<dyn TaskBackend>, OrchestratorRegistry) {
    let backend: Arc<dyn TaskBackend> = Arc::new(
        HttpTaskBackend::new(ClientConfig {
            base_url: server.uri(),
            ..ClientConfig::default()
        })
        .unwrap(),
    );
    let registry = OrchestratorRegistry::new(
        Arc::clone(&backend),
        OrchestratorConfig {
            poll_interval: Duration::from_secs(3600),
            stage_timeout: None,
        },
    );
    (backend, registry)
}

#[tokio::test]
async fn one_snapshot_read_updates_every_registered_platform() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "BOSS_LOGIN": {"status": "SUCCESS"},
            "BOSS_COLLECT": {"status": "IN_PROGRESS", "count": 8},
            "JOB_51_LOGIN": {"status": "FAILURE", "message": "captcha"},
            "LAGOU_LOGIN": {"status": "SUCCESS"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (backend, registry) = registry(&server);
    let boss = PlatformCode::new("boss").unwrap();
    let job51 = PlatformCode::new("job_51").unwrap();
    registry.get_or_create(&boss);
    registry.get_or_create(&job51);

    let snapshot = backend.fetch_status().await.unwrap();
    let outcomes = registry.dispatch_snapshot(&snapshot);
    assert_eq!(outcomes.len(), 2);

    let boss_view = registry.get(&boss).unwrap().view();
    assert!(boss_view.logged_in);
    assert_eq!(boss_view.stage(Stage::Collect).status, StageStatus::Running);

    let job51_view = registry.get(&job51).unwrap().view();
    assert!(!job51_view.logged_in);
    assert_eq!(job51_view.stage(Stage::Login).message, "captcha");

    assert!(registry.get(&PlatformCode::new("lagou").unwrap()).is_none());
}

#[tokio::test]
async fn shutdown_stops_pollers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/boss/task/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "taskId": "l1"})),
        )
        .mount(&server)
        .await;

    let (_, registry) = registry(&server);
    let boss = registry.get_or_create(&PlatformCode::new("boss").unwrap());
    boss.submit(Stage::Login, Default::default()).await.unwrap();
    assert!(boss.is_polling());

    registry.shutdown();
    assert!(!boss.is_polling());
    assert!(registry.is_empty());
}
