//! Scripted in-memory backend for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::fleet::{ActiveTask, CatalogStats, PriceRange};
use crate::models::job::JobKind;
use crate::models::outcome::TaskOutcome;
use crate::models::status::StatusRecord;
use crate::services::status_client::{ClientError, TaskBackend};

/// One scripted reply to a status call. The last step of a script repeats.
#[derive(Debug, Clone)]
pub enum Step {
    Status(StatusRecord),
    Delayed(Duration, StatusRecord),
    Transport,
    NotFound,
}

impl Step {
    pub fn status(record: StatusRecord) -> Self {
        Step::Status(record)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Submit(&'static str),
    Status(String),
    Result(String),
    Cancel(String),
    ListActive,
    Stats,
}

#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    results: Mutex<HashMap<String, TaskOutcome>>,
    calls: Mutex<Vec<Call>>,
    next_id: Mutex<usize>,
    reject_submissions: Mutex<Option<String>>,
    fail_cancel: Mutex<bool>,
    fail_fleet: Mutex<bool>,
    active: Mutex<Vec<ActiveTask>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, task_id: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), steps.into());
    }

    pub fn set_result(&self, task_id: &str, outcome: TaskOutcome) {
        self.results
            .lock()
            .unwrap()
            .insert(task_id.to_string(), outcome);
    }

    pub fn reject_submissions(&self, reason: &str) {
        *self.reject_submissions.lock().unwrap() = Some(reason.to_string());
    }

    pub fn fail_cancel(&self, fail: bool) {
        *self.fail_cancel.lock().unwrap() = fail;
    }

    pub fn fail_fleet(&self, fail: bool) {
        *self.fail_fleet.lock().unwrap() = fail;
    }

    pub fn set_active(&self, tasks: Vec<ActiveTask>) {
        *self.active.lock().unwrap() = tasks;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn status_calls(&self, task_id: &str) -> usize {
        self.count(|c| matches!(c, Call::Status(id) if id == task_id))
    }

    pub fn result_calls(&self, task_id: &str) -> usize {
        self.count(|c| matches!(c, Call::Result(id) if id == task_id))
    }

    pub fn cancel_calls(&self, task_id: &str) -> usize {
        self.count(|c| matches!(c, Call::Cancel(id) if id == task_id))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_step(&self, task_id: &str) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(task_id) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap(),
            Some(steps) => steps.front().cloned().unwrap_or(Step::NotFound),
            None => Step::NotFound,
        }
    }
}

pub fn stats(total_items: u64) -> CatalogStats {
    CatalogStats {
        total_items,
        recent_items_week: 0,
        price_range: PriceRange::default(),
        top_brands: Vec::new(),
        top_categories: Vec::new(),
        generated_at: "2024-05-01T10:00:00".to_string(),
    }
}

#[async_trait]
impl TaskBackend for ScriptedBackend {
    async fn submit(&self, kind: &JobKind) -> Result<String, ClientError> {
        self.record(Call::Submit(kind.name()));
        if let Some(reason) = self.reject_submissions.lock().unwrap().clone() {
            return Err(ClientError::Submission(reason));
        }
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        Ok(format!("job-{}", *next))
    }

    async fn get_status(&self, task_id: &str) -> Result<StatusRecord, ClientError> {
        self.record(Call::Status(task_id.to_string()));
        match self.next_step(task_id) {
            Step::Status(record) => Ok(record),
            Step::Delayed(delay, record) => {
                tokio::time::sleep(delay).await;
                Ok(record)
            }
            Step::Transport => Err(ClientError::Transport("connection reset".to_string())),
            Step::NotFound => Err(ClientError::NotFound(task_id.to_string())),
        }
    }

    async fn get_result(&self, task_id: &str) -> Result<TaskOutcome, ClientError> {
        self.record(Call::Result(task_id.to_string()));
        self.results
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or_else(|| ClientError::NotReady {
                task_id: task_id.to_string(),
                status: "pending".to_string(),
            })
    }

    async fn cancel(&self, task_id: &str) -> Result<(), ClientError> {
        self.record(Call::Cancel(task_id.to_string()));
        if *self.fail_cancel.lock().unwrap() {
            return Err(ClientError::Transport("broker unreachable".to_string()));
        }
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<ActiveTask>, ClientError> {
        self.record(Call::ListActive);
        if *self.fail_fleet.lock().unwrap() {
            return Err(ClientError::Transport("inspect timed out".to_string()));
        }
        Ok(self.active.lock().unwrap().clone())
    }

    async fn get_stats(&self) -> Result<CatalogStats, ClientError> {
        self.record(Call::Stats);
        if *self.fail_fleet.lock().unwrap() {
            return Err(ClientError::Transport("inspect timed out".to_string()));
        }
        Ok(stats(self.active.lock().unwrap().len() as u64))
    }
}
