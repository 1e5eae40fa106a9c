//! Fleet-wide view of running tasks and catalog statistics.
//!
//! Independent of the job registry: a job may show up in both views at
//! slightly different instants and nothing reconciles them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::fleet::FleetSnapshot;
use crate::services::status_client::{ClientError, TaskBackend};

pub const DEFAULT_FLEET_INTERVAL: Duration = Duration::from_secs(3);

/// Shortest period a background loop ticks at; `interval` rejects zero.
pub(crate) const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Could not list active tasks: {0}")]
    ActiveTasks(#[source] ClientError),

    #[error("Could not load catalog stats: {0}")]
    Stats(#[source] ClientError),
}

#[derive(Clone)]
pub struct FleetMonitor {
    client: Arc<dyn TaskBackend>,
    interval: Duration,
    snapshot: Arc<watch::Sender<FleetSnapshot>>,
}

impl FleetMonitor {
    pub fn new(client: Arc<dyn TaskBackend>, interval: Duration) -> Self {
        let (snapshot, _) = watch::channel(FleetSnapshot::default());
        Self {
            client,
            interval,
            snapshot: Arc::new(snapshot),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FleetSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn current(&self) -> FleetSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Refresh both views once and publish the result.
    ///
    /// A part that fails keeps its previous value. Nothing is published when
    /// both fail. Returns the failures, empty on full success.
    pub async fn refresh(&self) -> Vec<FleetError> {
        let (active, stats) = tokio::join!(self.client.list_active(), self.client.get_stats());

        let mut next = self.current();
        let mut errors = Vec::new();
        match active {
            Ok(active) => next.active = active,
            Err(e) => errors.push(FleetError::ActiveTasks(e)),
        }
        match stats {
            Ok(stats) => next.stats = Some(stats),
            Err(e) => errors.push(FleetError::Stats(e)),
        }

        for e in &errors {
            metrics::counter!("catalog_fleet_refresh_failures_total").increment(1);
            tracing::warn!(error = %e, "Fleet refresh failed, keeping previous snapshot");
        }

        if errors.len() < 2 {
            next.refreshed_at = Some(Utc::now());
            tracing::debug!(active = next.active.len(), "Fleet snapshot refreshed");
            self.snapshot.send_replace(next);
        }
        errors
    }

    /// Refresh on a fixed interval until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.refresh().await;
                }
            }
        }
        tracing::debug!("Fleet monitor stopped");
    }
}
