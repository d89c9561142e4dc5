//! Integration tests: status, capabilities, task listing/removal, pause/resume/stop, classify.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use idle_api::server::{self, AppState};
use idle_classify::ClassificationRules;
use idle_host::HostIdlePort;
use idle_scheduler::{IdlePort, IdleTaskScheduler, SchedulerConfig, Task, TaskScheduler};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

fn test_app() -> (axum::Router, IdleTaskScheduler, Arc<HostIdlePort>) {
    let port = Arc::new(HostIdlePort::new());
    let idle: Arc<dyn IdlePort> = port.clone();
    let scheduler = IdleTaskScheduler::new(SchedulerConfig::default(), Some(idle), None);
    let state = Arc::new(AppState {
        scheduler: Arc::new(scheduler.clone()),
        rules: ClassificationRules::default(),
    });
    (server::router(state), scheduler, port)
}

fn noop_task(id: &str, priority: i32) -> Task {
    Task::from_fn(id, id, priority, Duration::from_millis(1), || async { Ok(()) })
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(b) => {
            builder = builder.header("content-type", "application/json");
            Body::from(b.to_string())
        }
        None => Body::empty(),
    };
    let res = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _, _) = test_app();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn status_reports_queue_and_stats() {
    let (app, scheduler, _) = test_app();
    let j = send(&app, "GET", "/scheduler/status", None).await;
    assert_eq!(j["code"], 200);
    assert_eq!(j["data"]["state"], "idle");
    assert_eq!(j["data"]["queue_length"], 0);
    assert_eq!(j["data"]["is_tab_visible"], true);
    assert_eq!(j["data"]["stats"]["tasks_completed"], 0);

    scheduler.add_task(noop_task("a", 1)).unwrap();
    let j = send(&app, "GET", "/scheduler/status", None).await;
    assert_eq!(j["data"]["state"], "processing");
    assert_eq!(j["data"]["queue_length"], 1);
}

#[tokio::test]
async fn capabilities_reflect_idle_port() {
    let (app, _, _) = test_app();
    let j = send(&app, "GET", "/scheduler/capabilities", None).await;
    assert_eq!(j["data"]["supports_idle_callback"], true);

    let state = Arc::new(AppState {
        scheduler: Arc::new(IdleTaskScheduler::with_timer_fallback(SchedulerConfig::default())),
        rules: ClassificationRules::default(),
    });
    let fallback = server::router(state);
    let j = send(&fallback, "GET", "/scheduler/capabilities", None).await;
    assert_eq!(j["data"]["supports_idle_callback"], false);
}

#[tokio::test]
async fn list_and_remove_tasks() {
    let (app, scheduler, port) = test_app();
    scheduler.add_task(noop_task("late", 9)).unwrap();
    scheduler.add_task(noop_task("early", 1)).unwrap();

    let j = send(&app, "GET", "/scheduler/tasks", None).await;
    assert_eq!(j["data"], json!(["early", "late"]));

    let j = send(&app, "DELETE", "/scheduler/tasks/early", None).await;
    assert_eq!(j["code"], 200);
    assert_eq!(j["data"]["removed"], true);

    let j = send(&app, "DELETE", "/scheduler/tasks/early", None).await;
    assert_eq!(j["code"], 404);
    assert!(j.get("data").is_none());

    let j = send(&app, "DELETE", "/scheduler/tasks/late", None).await;
    assert_eq!(j["code"], 200);
    assert_eq!(scheduler.get_status().queue_length, 0);
    assert_eq!(port.pending_requests(), 0);
}

#[tokio::test]
async fn pause_resume_stop_round_trip() {
    let (app, scheduler, port) = test_app();
    scheduler.add_task(noop_task("a", 1)).unwrap();
    scheduler.add_task(noop_task("b", 2)).unwrap();

    let j = send(&app, "POST", "/scheduler/pause", None).await;
    assert_eq!(j["data"]["state"], "paused");
    assert_eq!(j["data"]["queue_length"], 2);
    assert_eq!(port.pending_requests(), 0);

    let j = send(&app, "POST", "/scheduler/resume", None).await;
    assert_eq!(j["data"]["state"], "processing");
    assert_eq!(port.pending_requests(), 1);

    let j = send(&app, "POST", "/scheduler/stop", None).await;
    assert_eq!(j["data"]["state"], "idle");
    assert_eq!(j["data"]["queue_length"], 0);
    assert_eq!(port.pending_requests(), 0);
}

#[tokio::test]
async fn tasks_run_when_host_grants_idle_time() {
    let (app, scheduler, port) = test_app();
    scheduler.add_task(noop_task("a", 1)).unwrap();
    assert!(port.grant(Duration::from_millis(40)).await);
    let j = send(&app, "GET", "/scheduler/status", None).await;
    assert_eq!(j["data"]["state"], "idle");
    assert_eq!(j["data"]["stats"]["tasks_completed"], 1);
    assert_eq!(j["data"]["stats"]["idle_slots"], 1);
}

#[tokio::test]
async fn classify_assigns_tiers() {
    let (app, _, _) = test_app();
    let j = send(&app, "POST", "/classify", Some(json!({ "key": "user_settings" }))).await;
    assert_eq!(j["code"], 200);
    assert_eq!(j["data"]["priority"], "critical");
    assert_eq!(j["data"]["estimated_size"], 2048);

    let body = json!({
        "key": "session:42",
        "metadata": {
            "size_bytes": 900,
            "last_accessed": "2024-03-01T08:00:00Z",
            "as_of": "2024-03-01T10:00:00Z"
        }
    });
    let j = send(&app, "POST", "/classify", Some(body)).await;
    assert_eq!(j["data"]["priority"], "important");
    assert_eq!(j["data"]["estimated_size"], 900);

    let j = send(&app, "POST", "/classify", Some(json!({ "key": "session:2019" }))).await;
    assert_eq!(j["data"]["priority"], "background");
}

#[tokio::test]
async fn classify_rejects_empty_key() {
    let (app, _, _) = test_app();
    let j = send(&app, "POST", "/classify", Some(json!({ "key": "  " }))).await;
    assert_eq!(j["code"], 400);
    assert_eq!(j["message"], "key is required");
}

#[tokio::test]
async fn plan_splits_batch() {
    let (app, _, _) = test_app();
    let body = json!({
        "entries": [
            { "key": "archive:b", "metadata": { "size_bytes": 5000 } },
            { "key": "roster" },
            { "key": "archive:a", "metadata": { "size_bytes": 100 } }
        ]
    });
    let j = send(&app, "POST", "/classify/plan", Some(body)).await;
    assert_eq!(j["code"], 200);
    let immediate: Vec<_> = j["data"]["immediate"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["key"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(immediate, vec!["roster"]);
    let deferred: Vec<_> = j["data"]["deferred"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["key"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(deferred, vec!["archive:a", "archive:b"]);
    assert_eq!(j["data"]["enqueued"], json!([]));
}

#[tokio::test]
async fn plan_can_enqueue_deferred_work() {
    let (app, scheduler, port) = test_app();
    let body = json!({
        "enqueue": true,
        "entries": [
            { "key": "archive:b", "metadata": { "size_bytes": 2048 } },
            { "key": "settings" },
            { "key": "archive:a", "metadata": { "size_bytes": 100 } }
        ]
    });
    let j = send(&app, "POST", "/classify/plan", Some(body.clone())).await;
    assert_eq!(j["code"], 200);
    assert_eq!(j["data"]["enqueued"], json!(["archive:a", "archive:b"]));
    assert_eq!(scheduler.queued_task_ids(), vec!["archive:a", "archive:b"]);

    // Already queued ids are reported as not enqueued.
    let j = send(&app, "POST", "/classify/plan", Some(body)).await;
    assert_eq!(j["data"]["enqueued"], json!([]));

    assert!(port.grant(Duration::from_millis(45)).await);
    let j = send(&app, "GET", "/scheduler/status", None).await;
    assert_eq!(j["data"]["stats"]["tasks_completed"], 2);
    assert_eq!(j["data"]["state"], "idle");
}
