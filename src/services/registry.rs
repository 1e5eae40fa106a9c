//! In-memory set of jobs visible to the user.
//!
//! The registry is the only writer of its job map. Pollers report into it
//! through callbacks; listeners registered by the UI get plain [`JobEvent`]s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::models::job::{Job, JobKind};
use crate::models::outcome::TaskOutcome;
use crate::models::status::{StatusRecord, TaskState};
use crate::services::poller::{JobPoller, PollError, PollSettings, StopHandle};
use crate::services::status_client::{ClientError, TaskBackend};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Opaque reference to a tracked job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self(task_id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Notification delivered to job listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Status(StatusRecord),
    ResultReady(TaskOutcome),
    /// The job succeeded but its detailed result could not be fetched.
    ResultUnavailable(String),
    /// The poll budget ran out; the job may still be running.
    TimedOut(String),
    /// Watching stopped for another reason, e.g. the backend forgot the id.
    WatchFailed(String),
}

pub type JobListener = Arc<dyn Fn(&JobEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid job parameters: {0}")]
    Validation(#[from] garde::Report),

    #[error("Job {0} is already being tracked")]
    AlreadyTracked(String),

    #[error("Job {0} is not tracked")]
    UnknownJob(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

struct Entry {
    job: Job,
    stop: StopHandle,
    listeners: Vec<JobListener>,
    // Monotonic time the entry became eligible for removal.
    finished: Option<Instant>,
}

struct Inner {
    client: Arc<dyn TaskBackend>,
    poller: JobPoller,
    grace_period: Duration,
    jobs: Mutex<HashMap<String, Entry>>,
}

/// Tracks submitted jobs and drives one poller per job.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

impl JobRegistry {
    pub fn new(client: Arc<dyn TaskBackend>, poll: PollSettings, grace_period: Duration) -> Self {
        let poller = JobPoller::new(client.clone(), poll);
        Self {
            inner: Arc::new(Inner {
                client,
                poller,
                grace_period,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate, submit and start watching a new job.
    ///
    /// Invalid parameters are rejected before any remote call.
    pub async fn submit(&self, kind: JobKind) -> Result<JobHandle, RegistryError> {
        if let Err(report) = kind.validate() {
            tracing::warn!(kind = kind.name(), error = %report, "Rejected job parameters");
            return Err(RegistryError::Validation(report));
        }

        let task_id = self.inner.client.submit(&kind).await?;

        metrics::counter!("catalog_jobs_submitted_total", "kind" => kind.name()).increment(1);
        tracing::info!(job_id = %task_id, kind = kind.name(), "Job submitted");

        self.track(task_id, kind)
    }

    /// Start watching a job that already exists on the backend.
    ///
    /// At most one poller is attached per id; tracking an id twice fails.
    /// Must be called from within a tokio runtime.
    pub fn track(&self, task_id: String, kind: JobKind) -> Result<JobHandle, RegistryError> {
        let stop = StopHandle::new();
        {
            let mut jobs = self.jobs();
            if jobs.contains_key(&task_id) {
                return Err(RegistryError::AlreadyTracked(task_id));
            }
            jobs.insert(
                task_id.clone(),
                Entry {
                    job: Job::new(task_id.clone(), kind, Utc::now()),
                    stop: stop.clone(),
                    listeners: Vec::new(),
                    finished: None,
                },
            );
            metrics::gauge!("catalog_jobs_tracked").set(jobs.len() as f64);
        }

        let registry = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move { registry.drive(id, stop).await });

        Ok(JobHandle(task_id))
    }

    /// Register a listener for a job. It immediately receives the current
    /// status, then every later event in order.
    ///
    /// A listener may cancel its own job or register further listeners.
    pub fn on_status(&self, handle: &JobHandle, listener: JobListener) -> Result<(), RegistryError> {
        let unknown = || RegistryError::UnknownJob(handle.id().to_string());
        let stop = self
            .jobs()
            .get(handle.id())
            .map(|e| e.stop.clone())
            .ok_or_else(unknown)?;

        // Registering under the gate keeps the replay ahead of any newer
        // status the poller delivers.
        let mut registered = false;
        stop.run_if_active(|| {
            let current = {
                let mut jobs = self.jobs();
                let Some(entry) = jobs.get_mut(handle.id()) else {
                    return;
                };
                entry.listeners.push(listener.clone());
                entry.job.status.clone()
            };
            listener(&JobEvent::Status(current));
            registered = true;
        });

        if registered {
            Ok(())
        } else {
            Err(unknown())
        }
    }

    pub fn get(&self, task_id: &str) -> Option<Job> {
        self.jobs().get(task_id).map(|e| e.job.clone())
    }

    /// Visible jobs, oldest submission first.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs().values().map(|e| e.job.clone()).collect();
        jobs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// Drop a job from the visible set and stop its poller.
    ///
    /// When this returns no listener of the job will be called again. Called
    /// from one of those listeners, the notification pass in progress ends
    /// first.
    pub fn remove(&self, task_id: &str) -> Option<Job> {
        let entry = {
            let mut jobs = self.jobs();
            let entry = jobs.remove(task_id);
            metrics::gauge!("catalog_jobs_tracked").set(jobs.len() as f64);
            entry
        }?;
        entry.stop.stop();
        Some(entry.job)
    }

    /// Remove jobs finished more than the grace period ago.
    pub fn sweep(&self) -> Vec<String> {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> Vec<String> {
        let mut jobs = self.jobs();
        let removed = sweep_finished(&mut jobs, now, self.inner.grace_period);
        if !removed.is_empty() {
            metrics::gauge!("catalog_jobs_tracked").set(jobs.len() as f64);
            tracing::debug!(removed = removed.len(), "Swept finished jobs");
        }
        removed
    }

    /// Stop every poller without removing entries.
    pub fn stop_all(&self) {
        let stops: Vec<StopHandle> = self.jobs().values().map(|e| e.stop.clone()).collect();
        for stop in stops {
            stop.stop();
        }
    }

    async fn drive(self, task_id: String, stop: StopHandle) {
        let outcome = self
            .inner
            .poller
            .watch(&task_id, StatusRecord::pending(), &stop, |record| {
                self.apply_status(&task_id, record)
            })
            .await;

        match outcome {
            Ok(record) if record.state == TaskState::Success => {
                self.fetch_result(&task_id, &stop).await
            }
            Ok(_) | Err(PollError::Stopped(_)) => {}
            Err(e @ PollError::Timeout { .. }) => {
                self.end_watch(&task_id, &stop, true, JobEvent::TimedOut(e.to_string()))
            }
            Err(e) => {
                tracing::warn!(job_id = %task_id, error = %e, "Stopped watching job");
                self.end_watch(&task_id, &stop, false, JobEvent::WatchFailed(e.to_string()))
            }
        }
    }

    fn apply_status(&self, task_id: &str, record: &StatusRecord) {
        let listeners = {
            let mut jobs = self.jobs();
            let Some(entry) = jobs.get_mut(task_id) else {
                return;
            };
            if entry.job.status.is_terminal() {
                return;
            }
            entry.job.status = record.clone();
            if record.is_terminal() {
                entry.finished = Some(Instant::now());
                entry.job.finished_at = Some(Utc::now());
                metrics::counter!("catalog_jobs_finished_total", "state" => record.state.to_string())
                    .increment(1);
            }
            entry.listeners.clone()
        };
        notify(&listeners, &JobEvent::Status(record.clone()));
    }

    async fn fetch_result(&self, task_id: &str, stop: &StopHandle) {
        if stop.is_stopped() {
            return;
        }

        let event = match self.inner.client.get_result(task_id).await {
            Ok(outcome) => {
                tracing::info!(
                    job_id = %task_id,
                    total_found = outcome.total_found,
                    quality_score = outcome.quality_score,
                    "Job result fetched"
                );
                let mut jobs = self.jobs();
                if let Some(entry) = jobs.get_mut(task_id) {
                    entry.job.result = Some(outcome.clone());
                }
                JobEvent::ResultReady(outcome)
            }
            Err(e) => {
                // The job stays successful, just without a detail payload.
                tracing::warn!(job_id = %task_id, error = %e, "Could not fetch job result");
                JobEvent::ResultUnavailable(e.to_string())
            }
        };

        stop.run_if_active(|| {
            let listeners = self.listeners(task_id);
            notify(&listeners, &event);
        });
    }

    fn listeners(&self, task_id: &str) -> Vec<JobListener> {
        self.jobs()
            .get(task_id)
            .map(|e| e.listeners.clone())
            .unwrap_or_default()
    }

    fn end_watch(&self, task_id: &str, stop: &StopHandle, timed_out: bool, event: JobEvent) {
        {
            let mut jobs = self.jobs();
            let Some(entry) = jobs.get_mut(task_id) else {
                return;
            };
            entry.finished = Some(Instant::now());
            entry.job.finished_at = Some(Utc::now());
            entry.job.watch_timed_out = timed_out;
        }
        stop.run_if_active(|| {
            let listeners = self.listeners(task_id);
            notify(&listeners, &event);
        });
    }
}

fn notify(listeners: &[JobListener], event: &JobEvent) {
    for listener in listeners {
        listener(event);
    }
}

/// Remove entries finished strictly more than `grace` before `now`.
fn sweep_finished(
    jobs: &mut HashMap<String, Entry>,
    now: Instant,
    grace: Duration,
) -> Vec<String> {
    let expired: Vec<String> = jobs
        .iter()
        .filter(|(_, entry)| {
            entry
                .finished
                .is_some_and(|at| now.saturating_duration_since(at) > grace)
        })
        .map(|(id, _)| id.clone())
        .collect();

    for id in &expired {
        jobs.remove(id);
    }
    expired
}
