//! Poll loop for a single remote job.
//!
//! The loop is a plain future: the owner decides where it runs and stops it
//! through a [`StopHandle`]. The wall-clock budget bounds the whole watch,
//! including a status call that is still in flight when it expires.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::models::status::StatusRecord;
use crate::services::status_client::{ClientError, TaskBackend};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Delay between two status calls.
    pub interval: Duration,
    /// Budget measured from the start of the watch.
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Gave up watching job {task_id} after {}s; it may still be running", elapsed.as_secs())]
    Timeout { task_id: String, elapsed: Duration },

    #[error("Stopped watching job {0}")]
    Stopped(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

thread_local! {
    // Gates whose callback is currently running on this thread.
    static HELD_GATES: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Pops the gate id pushed by `run_if_active`, also when the callback panics.
struct HeldGate(usize);

impl HeldGate {
    fn enter(id: usize) -> Self {
        HELD_GATES.with(|held| held.borrow_mut().push(id));
        Self(id)
    }
}

impl Drop for HeldGate {
    fn drop(&mut self) {
        HELD_GATES.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|id| *id == self.0) {
                held.remove(pos);
            }
        });
    }
}

/// Stops a poll loop. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
    stopped: Arc<AtomicBool>,
    // Held while a status callback runs, so `stop` waits for it.
    gate: Arc<Mutex<()>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Once this returns, no further callback for the watched job runs.
    ///
    /// Called from inside the job's own callback it returns at once; the
    /// callback pass in progress completes and nothing runs after it.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.token.cancel();
        if !self.in_callback() {
            // Wait out a callback running elsewhere.
            drop(self.gate.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Run `f` unless the handle was stopped. Returns whether it ran.
    ///
    /// Re-entrant: a callback may register or run further callbacks for the
    /// same job.
    pub fn run_if_active(&self, f: impl FnOnce()) -> bool {
        if self.in_callback() {
            if self.is_stopped() {
                return false;
            }
            f();
            return true;
        }

        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_stopped() {
            return false;
        }
        let _held = HeldGate::enter(self.gate_id());
        f();
        true
    }

    fn gate_id(&self) -> usize {
        Arc::as_ptr(&self.gate) as usize
    }

    fn in_callback(&self) -> bool {
        let id = self.gate_id();
        HELD_GATES.with(|held| held.borrow().contains(&id))
    }

    async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// Watches one job at a time per call; cheap to clone.
#[derive(Clone)]
pub struct JobPoller {
    client: Arc<dyn TaskBackend>,
    settings: PollSettings,
}

impl JobPoller {
    pub fn new(client: Arc<dyn TaskBackend>, settings: PollSettings) -> Self {
        Self { client, settings }
    }

    /// Poll `task_id` until it reaches a terminal state.
    ///
    /// `on_status` is invoked after every status call with the best-known
    /// record, starting from `initial`. A transport failure re-reports the
    /// previous record; a report that would move the state backwards is
    /// dropped the same way.
    pub async fn watch<F>(
        &self,
        task_id: &str,
        initial: StatusRecord,
        stop: &StopHandle,
        mut on_status: F,
    ) -> Result<StatusRecord, PollError>
    where
        F: FnMut(&StatusRecord) + Send,
    {
        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let mut current = initial;

        loop {
            let call_started = Instant::now();
            let fetched = tokio::select! {
                biased;
                _ = stop.stopped() => return Err(PollError::Stopped(task_id.to_string())),
                _ = sleep_until(deadline) => return Err(self.timed_out(task_id, started)),
                fetched = self.client.get_status(task_id) => fetched,
            };
            metrics::histogram!("catalog_job_poll_seconds")
                .record(call_started.elapsed().as_secs_f64());

            match fetched {
                Ok(record) if current.state.can_transition_to(record.state) => {
                    metrics::counter!("catalog_job_polls_total", "outcome" => "ok").increment(1);
                    tracing::debug!(
                        job_id = %task_id,
                        state = %record.state,
                        percent = ?record.percent(),
                        "Job status"
                    );
                    current = record;
                }
                Ok(record) => {
                    metrics::counter!("catalog_job_polls_total", "outcome" => "out_of_order")
                        .increment(1);
                    tracing::warn!(
                        job_id = %task_id,
                        from = %current.state,
                        to = %record.state,
                        "Ignoring backwards status transition"
                    );
                }
                Err(ClientError::Transport(e)) => {
                    metrics::counter!("catalog_job_polls_total", "outcome" => "transport_error")
                        .increment(1);
                    tracing::warn!(job_id = %task_id, error = %e, "Status poll failed, keeping last status");
                }
                Err(e) => return Err(e.into()),
            }

            if !stop.run_if_active(|| on_status(&current)) {
                return Err(PollError::Stopped(task_id.to_string()));
            }

            if current.is_terminal() {
                tracing::info!(
                    job_id = %task_id,
                    state = %current.state,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job reached final state"
                );
                return Ok(current);
            }

            tokio::select! {
                biased;
                _ = stop.stopped() => return Err(PollError::Stopped(task_id.to_string())),
                _ = sleep_until(deadline) => return Err(self.timed_out(task_id, started)),
                _ = sleep(self.settings.interval) => {}
            }
        }
    }

    fn timed_out(&self, task_id: &str, started: Instant) -> PollError {
        let elapsed = started.elapsed();
        tracing::warn!(
            job_id = %task_id,
            elapsed_secs = elapsed.as_secs(),
            "Poll budget exhausted before a final state"
        );
        PollError::Timeout {
            task_id: task_id.to_string(),
            elapsed,
        }
    }
}
