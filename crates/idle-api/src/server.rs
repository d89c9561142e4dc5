//! Axum server and routes.

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use idle_classify::{classify, plan, Classification, ClassificationRules, StorageMetadata, WorkPlan};
use idle_scheduler::{FnProcessor, SchedulerStatus, TaskError, TaskProcessor, TaskScheduler};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Throughput assumed when turning a record size into a task duration estimate.
pub const DEFAULT_BYTES_PER_MS: u64 = 1024;

pub struct AppState {
    pub scheduler: Arc<dyn TaskScheduler>,
    pub rules: ClassificationRules,
}

/// Response envelope shared by every JSON route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
        })
    }

    fn error(code: i32, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            code,
            message: message.into(),
            data: None,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_idle_callback: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveTaskResult {
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub key: String,
    #[serde(default)]
    pub metadata: StorageMetadata,
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub entries: Vec<ClassifyRequest>,
    /// Also queue the deferred records on the scheduler.
    #[serde(default)]
    pub enqueue: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlanResult {
    #[serde(flatten)]
    pub plan: WorkPlan,
    /// Ids accepted by the scheduler; empty unless `enqueue` was set.
    pub enqueued: Vec<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/scheduler/status", get(handle_status))
        .route("/scheduler/capabilities", get(handle_capabilities))
        .route("/scheduler/tasks", get(handle_list_tasks))
        .route("/scheduler/tasks/:id", delete(handle_remove_task))
        .route("/scheduler/pause", post(handle_pause))
        .route("/scheduler/resume", post(handle_resume))
        .route("/scheduler/stop", post(handle_stop))
        .route("/classify", post(handle_classify))
        .route("/classify/plan", post(handle_plan))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn handle_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SchedulerStatus>> {
    ApiResponse::ok(state.scheduler.get_status())
}

async fn handle_capabilities(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Capabilities>> {
    ApiResponse::ok(Capabilities {
        supports_idle_callback: state.scheduler.supports_idle_callback(),
    })
}

async fn handle_list_tasks(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<String>>> {
    ApiResponse::ok(state.scheduler.queued_task_ids())
}

async fn handle_remove_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<ApiResponse<RemoveTaskResult>> {
    if state.scheduler.remove_task(&id) {
        tracing::info!(task_id = %id, "task removed via api");
        ApiResponse::ok(RemoveTaskResult { removed: true })
    } else {
        ApiResponse::error(404, "Task not found")
    }
}

async fn handle_pause(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SchedulerStatus>> {
    state.scheduler.pause_processing();
    ApiResponse::ok(state.scheduler.get_status())
}

async fn handle_resume(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SchedulerStatus>> {
    state.scheduler.resume_processing();
    ApiResponse::ok(state.scheduler.get_status())
}

async fn handle_stop(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SchedulerStatus>> {
    state.scheduler.stop_processing();
    ApiResponse::ok(state.scheduler.get_status())
}

async fn handle_classify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClassifyRequest>,
) -> Json<ApiResponse<Classification>> {
    if req.key.trim().is_empty() {
        return ApiResponse::error(400, "key is required");
    }
    ApiResponse::ok(classify(&req.key, &req.metadata, &state.rules))
}

async fn handle_plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlanRequest>,
) -> Json<ApiResponse<PlanResult>> {
    if req.entries.iter().any(|e| e.key.trim().is_empty()) {
        return ApiResponse::error(400, "every entry needs a key");
    }
    let enqueue = req.enqueue;
    let entries = req.entries.into_iter().map(|e| (e.key, e.metadata));
    let work = plan(entries, &state.rules);

    let mut enqueued = Vec::new();
    if enqueue {
        for task in work.clone().into_tasks(DEFAULT_BYTES_PER_MS, logging_processor) {
            let id = task.id.clone();
            match state.scheduler.add_task(task) {
                Ok(()) => enqueued.push(id),
                Err(e) => tracing::warn!(task_id = %id, error = %e, "deferred record not queued"),
            }
        }
    }
    ApiResponse::ok(PlanResult {
        plan: work,
        enqueued,
    })
}

/// Stand-in processor for deferred records: logs the record it was built for.
fn logging_processor(c: &Classification) -> Arc<dyn TaskProcessor> {
    let key = c.key.clone();
    let size = c.estimated_size;
    Arc::new(FnProcessor(move || {
        let key = key.clone();
        async move {
            tracing::info!(key = %key, size, "deferred record processed");
            Ok::<(), TaskError>(())
        }
    }))
}

async fn handle_health() -> &'static str {
    "ok"
}
