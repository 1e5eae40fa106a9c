use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::fleet::FleetSnapshot;
use crate::models::job::{Job, JobKind};
use crate::services::cancellation::{CancellationController, PendingCancel};
use crate::services::fleet::{FleetMonitor, DEFAULT_FLEET_INTERVAL, MIN_TICK};
use crate::services::poller::PollSettings;
use crate::services::registry::{
    JobEvent, JobHandle, JobRegistry, RegistryError, DEFAULT_GRACE_PERIOD,
};
use crate::services::status_client::TaskBackend;

#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub poll: PollSettings,
    /// Cadence of fleet refreshes and of the finished-job sweep.
    pub fleet_interval: Duration,
    pub grace_period: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            fleet_interval: DEFAULT_FLEET_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Entry point for UI code: submit, observe and cancel jobs, and follow
/// the fleet.
pub struct JobTracker {
    registry: JobRegistry,
    cancellation: CancellationController,
    fleet: FleetMonitor,
    shutdown: CancellationToken,
}

impl JobTracker {
    /// Wire up the services and start the fleet and sweep loops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(client: Arc<dyn TaskBackend>, settings: TrackerSettings) -> Self {
        let registry = JobRegistry::new(client.clone(), settings.poll, settings.grace_period);
        let cancellation = CancellationController::new(client.clone(), registry.clone());
        let fleet = FleetMonitor::new(client, settings.fleet_interval);
        let shutdown = CancellationToken::new();

        tokio::spawn(fleet.clone().run(shutdown.clone()));
        tokio::spawn(sweep_loop(
            registry.clone(),
            settings.fleet_interval,
            shutdown.clone(),
        ));

        tracing::info!(
            poll_interval_ms = settings.poll.interval.as_millis() as u64,
            poll_timeout_secs = settings.poll.timeout.as_secs(),
            grace_period_secs = settings.grace_period.as_secs(),
            "Job tracker started"
        );

        Self {
            registry,
            cancellation,
            fleet,
            shutdown,
        }
    }

    pub async fn submit(&self, kind: JobKind) -> Result<JobHandle, RegistryError> {
        self.registry.submit(kind).await
    }

    /// Follow a job submitted elsewhere.
    pub fn track(&self, task_id: impl Into<String>, kind: JobKind) -> Result<JobHandle, RegistryError> {
        self.registry.track(task_id.into(), kind)
    }

    pub fn on_status<F>(&self, handle: &JobHandle, callback: F) -> Result<(), RegistryError>
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.registry.on_status(handle, Arc::new(callback))
    }

    pub fn cancel(&self, handle: &JobHandle) -> PendingCancel {
        self.cancellation.cancel(handle.id())
    }

    /// Call `callback` with the current fleet snapshot, if one was ever
    /// refreshed, then with every new one until shutdown.
    pub fn subscribe_fleet<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&FleetSnapshot) + Send + 'static,
    {
        let mut updates = self.fleet.subscribe();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let current = updates.borrow_and_update().clone();
            if current.refreshed_at.is_some() {
                callback(&current);
            }
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = updates.borrow_and_update().clone();
                        callback(&snapshot);
                    }
                }
            }
        })
    }

    pub fn fleet_snapshot(&self) -> FleetSnapshot {
        self.fleet.current()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Stop background loops and every poller.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.stop_all();
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn sweep_loop(registry: JobRegistry, every: Duration, shutdown: CancellationToken) {
    let mut ticker = interval(every.max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                registry.sweep();
            }
        }
    }
}
