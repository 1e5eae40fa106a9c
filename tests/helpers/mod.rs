//! In-process stand-in for the catalog management API.
//!
//! Serves the task endpoints on an ephemeral port. Each submitted job
//! replays a script of status replies; the last reply repeats.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

/// One scripted reply to `GET /tasks/{id}/status`.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Error(StatusCode),
}

#[derive(Debug, Clone, Default)]
pub struct MockJob {
    pub replies: Vec<Reply>,
    pub result: Option<Value>,
}

impl MockJob {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            result: None,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// A request the mock received, with the id or params it carried.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub route: &'static str,
    pub target: String,
}

#[derive(Default)]
pub struct MockCatalog {
    upcoming: Mutex<VecDeque<MockJob>>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    results: Mutex<HashMap<String, Value>>,
    received: Mutex<Vec<Received>>,
    submit_bodies: Mutex<Vec<Value>>,
    last_auth: Mutex<Option<String>>,
    reject: Mutex<Option<(StatusCode, String)>>,
    fail_fleet: AtomicBool,
    active: Mutex<Vec<Value>>,
}

impl MockCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the next submitted job.
    pub fn queue_job(&self, job: MockJob) {
        self.upcoming.lock().unwrap().push_back(job);
    }

    /// Script a job that exists without having been submitted here.
    pub fn seed_job(&self, task_id: &str, job: MockJob) {
        self.install(task_id, job);
    }

    pub fn reject_submissions(&self, status: StatusCode, detail: &str) {
        *self.reject.lock().unwrap() = Some((status, detail.to_string()));
    }

    pub fn fail_fleet(&self, fail: bool) {
        self.fail_fleet.store(fail, Ordering::SeqCst);
    }

    pub fn set_active(&self, tasks: Vec<Value>) {
        *self.active.lock().unwrap() = tasks;
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self, route: &str, target: &str) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.route == route && r.target == target)
            .count()
    }

    pub fn submit_bodies(&self) -> Vec<Value> {
        self.submit_bodies.lock().unwrap().clone()
    }

    pub fn last_auth(&self) -> Option<String> {
        self.last_auth.lock().unwrap().clone()
    }

    fn install(&self, task_id: &str, job: MockJob) {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), job.replies.into());
        if let Some(result) = job.result {
            self.results
                .lock()
                .unwrap()
                .insert(task_id.to_string(), result);
        }
    }

    fn record(&self, route: &'static str, target: impl Into<String>) {
        self.received.lock().unwrap().push(Received {
            route,
            target: target.into(),
        });
    }

    fn next_reply(&self, task_id: &str) -> Option<Reply> {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.get_mut(task_id)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }

    fn accept(&self, route: &'static str, headers: &HeaderMap, params: Value) -> (StatusCode, Json<Value>) {
        *self.last_auth.lock().unwrap() = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.record(route, params.to_string());
        self.submit_bodies.lock().unwrap().push(params);

        if let Some((status, detail)) = self.reject.lock().unwrap().clone() {
            return (status, Json(json!({ "detail": detail })));
        }

        let task_id = Uuid::new_v4().to_string();
        let job = self
            .upcoming
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockJob::new(vec![pending()]));
        self.install(&task_id, job);

        (
            StatusCode::OK,
            Json(json!({
                "task_id": task_id,
                "status": "started",
                "message": "Catalog parsing started"
            })),
        )
    }
}

pub fn pending() -> Reply {
    Reply::Json(json!({ "status": "PENDING", "current": 0, "total": 100 }))
}

pub fn progress(percent: u8, phase: &str) -> Reply {
    Reply::Json(json!({
        "status": "PROGRESS",
        "current": percent,
        "total": 100,
        "meta": { "status": phase, "progress": percent }
    }))
}

pub fn success(total_found: u64) -> Reply {
    Reply::Json(json!({
        "status": "SUCCESS",
        "current": 100,
        "total": 100,
        "result": { "success": true, "total_found": total_found }
    }))
}

pub fn failure(error: &str) -> Reply {
    Reply::Json(json!({ "status": "FAILURE", "error": error }))
}

pub fn outcome(total_found: u64, quality_score: f64) -> Value {
    json!({
        "success": true,
        "products": [],
        "total_found": total_found,
        "success_count": total_found,
        "failed_count": 0,
        "quality_score": quality_score,
        "parsing_time": 4.2,
        "metadata": {},
        "task_completed_at": "2024-05-01T10:00:00"
    })
}

pub fn active_task(task_id: &str, query: &str, limit: u32) -> Value {
    json!({
        "task_id": task_id,
        "name": "app.tasks.catalog_tasks.process_catalog_chain",
        "worker": "celery@worker-1",
        "args": [],
        "kwargs": { "query": query, "limit": limit, "domain": "kz" },
        "time_start": 1_714_557_600.0
    })
}

pub fn stats(total_items: u64) -> Value {
    json!({
        "total_items": total_items,
        "recent_items_week": 3,
        "price_range": { "min": 1990.0, "max": 45990.0, "average": 12000.0 },
        "top_brands": [{ "brand": "Levi's", "count": 4 }],
        "top_categories": [{ "category": null, "count": 1 }],
        "generated_at": "2024-05-01T10:00:00.123456"
    })
}

type Shared = State<Arc<MockCatalog>>;

async fn parse(State(mock): Shared, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    mock.accept("parse", &headers, body)
}

async fn parse_simple(
    State(mock): Shared,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    mock.accept("parse-simple", &headers, json!(params))
}

async fn test_chain(State(mock): Shared, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    mock.accept("test-chain", &headers, json!({}))
}

async fn test_parser(
    State(mock): Shared,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    mock.accept("test-parser", &headers, json!(params))
}

async fn task_status(State(mock): Shared, Path(task_id): Path<String>) -> (StatusCode, Json<Value>) {
    mock.record("status", task_id.as_str());
    match mock.next_reply(&task_id) {
        Some(Reply::Json(mut body)) => {
            body["task_id"] = json!(task_id);
            (StatusCode::OK, Json(body))
        }
        Some(Reply::Error(status)) => (status, Json(json!({ "detail": "Internal error" }))),
        None => (StatusCode::NOT_FOUND, Json(json!({ "detail": "Task not found" }))),
    }
}

async fn task_result(State(mock): Shared, Path(task_id): Path<String>) -> Json<Value> {
    mock.record("result", task_id.as_str());
    match mock.results.lock().unwrap().get(&task_id) {
        Some(result) => Json(json!({
            "task_id": task_id,
            "status": "success",
            "result": result
        })),
        None => Json(json!({
            "task_id": task_id,
            "status": "pending",
            "message": "Task is still running"
        })),
    }
}

async fn cancel_task(State(mock): Shared, Path(task_id): Path<String>) -> (StatusCode, Json<Value>) {
    mock.record("cancel", task_id.as_str());
    if mock.scripts.lock().unwrap().contains_key(&task_id) {
        (StatusCode::OK, Json(json!({ "message": "Task cancelled" })))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "detail": "Task not found" })))
    }
}

async fn list_tasks(State(mock): Shared) -> (StatusCode, Json<Value>) {
    mock.record("tasks", "");
    if mock.fail_fleet.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "Celery inspect failed" })),
        );
    }
    let active = mock.active.lock().unwrap().clone();
    (StatusCode::OK, Json(Value::Array(active)))
}

async fn catalog_stats(State(mock): Shared) -> (StatusCode, Json<Value>) {
    mock.record("stats", "");
    if mock.fail_fleet.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "Database unavailable" })),
        );
    }
    (StatusCode::OK, Json(stats(2)))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "celery_workers": 2,
        "active_queues": 3,
        "services": { "celery": "running", "parser": "available" }
    }))
}

pub fn router(mock: Arc<MockCatalog>) -> Router {
    let catalog = Router::new()
        .route("/parse", post(parse))
        .route("/parse-simple", post(parse_simple))
        .route("/test-chain", post(test_chain))
        .route("/test-parser", post(test_parser))
        .route("/tasks", get(list_tasks))
        .route("/tasks/{task_id}", delete(cancel_task))
        .route("/tasks/{task_id}/status", get(task_status))
        .route("/tasks/{task_id}/result", get(task_result))
        .route("/stats", get(catalog_stats))
        .route("/health", get(health));

    Router::new()
        .nest("/api/v1/catalog", catalog)
        .with_state(mock)
}

/// Serve `mock` on an ephemeral port and return the API root URL.
pub async fn spawn(mock: Arc<MockCatalog>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock catalog");
    let addr = listener.local_addr().expect("Mock catalog has no address");
    tokio::spawn(async move {
        axum::serve(listener, router(mock))
            .await
            .expect("Mock catalog stopped");
    });
    format!("http://{}/api/v1", addr)
}

/// Poll `check` every 20ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
