use serde_json::json;
use std::time::Duration;
use task_orchestrator::client::{
    ClientConfig, ClientError, HttpTaskBackend, JobRequest, QuickDeliveryRequest, TaskBackend,
};
use task_orchestrator::{PlatformCode, Stage};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, header_exists, method, path},
};

fn backend(server: &MockServer) -> HttpTaskBackend {
    HttpTaskBackend::new(ClientConfig {
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
        auth_token: Some("secret".to_string()),
        ..ClientConfig::default()
    })
    .unwrap()
}

fn boss() -> PlatformCode {
    PlatformCode::new("boss").unwrap()
}

#[tokio::test]
async fn submit_job_posts_stage_body_with_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/boss/task/filter"))
        .and(header("authorization", "Bearer secret"))
        .and(header_exists("idempotency-key"))
        .and(body_json(json!({"collectTaskId": "c1", "config": null})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "taskId": "f1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = backend(&server);
    let response = client
        .submit_job(
            &boss(),
            Stage::Filter,
            &JobRequest::Filter {
                collect_task_id: Some("c1".into()),
                config: None,
            },
        )
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.task_id.as_deref(), Some("f1"));
    let stats = client.request_stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.successful_requests, 1);
}

#[tokio::test]
async fn each_submission_gets_a_fresh_idempotency_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/boss/task/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(2)
        .mount(&server)
        .await;

    let client = backend(&server);
    for _ in 0..2 {
        client
            .submit_job(&boss(), Stage::Login, &JobRequest::Login { config: None })
            .await
            .unwrap();
    }

    let requests = server.received_requests().await.unwrap();
    let keys: Vec<_> = requests
        .iter()
        .map(|request| request.headers.get("idempotency-key").unwrap().clone())
        .collect();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
}

#[tokio::test]
async fn quick_delivery_uses_its_own_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/task/quick-delivery/submit/boss"))
        .and(body_json(json!({"config": {"maxApplications": 5}})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "taskId": "q1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = backend(&server)
        .submit_quick_delivery(
            &boss(),
            &QuickDeliveryRequest {
                config: Some(json!({"maxApplications": 5})),
            },
        )
        .await
        .unwrap();
    assert_eq!(response.task_id.as_deref(), Some("q1"));
}

#[tokio::test]
async fn status_snapshot_tolerates_malformed_entries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "BOSS_LOGIN": {"status": "SUCCESS", "message": "logged in"},
            "BOSS_COLLECT": {"status": "RUNNING", "count": 42, "updatedAt": "2026-01-05T08:00:00Z"},
            "BOSS_FILTER": {"message": "no status"},
            "LIEPIN_DELIVER": {"status": "FAILED"}
        })))
        .mount(&server)
        .await;

    let snapshot = backend(&server).fetch_status().await.unwrap();
    assert_eq!(snapshot.len(), 3);
    let collect = snapshot.get(&boss(), Stage::Collect).unwrap();
    assert_eq!(collect.count, Some(42));
    assert!(collect.updated_at.is_some());
    assert!(snapshot.get(&boss(), Stage::Filter).is_none());
    assert_eq!(snapshot.platforms().len(), 2);
}

#[tokio::test]
async fn login_status_is_read_from_dedicated_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/boss/task/login-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"loggedIn": true})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(backend(&server).check_login(&boss()).await.unwrap());
}

#[tokio::test]
async fn server_errors_surface_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/status"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = backend(&server);
    match client.fetch_status().await {
        Err(ClientError::HttpError { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected HttpError, got {other:?}"),
    }
    assert_eq!(client.request_stats().failed_requests, 1);
}

#[tokio::test]
async fn slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/boss/task/login-status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"loggedIn": true}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = HttpTaskBackend::new(ClientConfig {
        base_url: server.uri(),
        timeout: Duration::from_millis(200),
        ..ClientConfig::default()
    })
    .unwrap();

    let result = client.check_login(&boss()).await;
    assert!(matches!(result, Err(ClientError::RequestTimeout(_))));
}
