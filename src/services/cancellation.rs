//! Optimistic job cancellation.
//!
//! The job leaves the visible set immediately; the backend revoke runs in the
//! background and its failure never brings the job back.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::services::registry::JobRegistry;
use crate::services::status_client::{ClientError, TaskBackend};

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("Backend did not confirm cancelling job {task_id}: {source}")]
    Backend {
        task_id: String,
        #[source]
        source: ClientError,
    },

    #[error("Cancel request for job {0} was aborted")]
    Aborted(String),
}

/// Background revoke request started by [`CancellationController::cancel`].
pub struct PendingCancel {
    task_id: String,
    was_tracked: bool,
    request: JoinHandle<Result<(), ClientError>>,
}

impl PendingCancel {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Whether the job was visible in the registry when cancelled.
    pub fn was_tracked(&self) -> bool {
        self.was_tracked
    }

    /// Wait for the backend to acknowledge the revoke.
    pub async fn acknowledged(self) -> Result<(), CancelError> {
        match self.request.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(CancelError::Backend {
                task_id: self.task_id,
                source,
            }),
            Err(_) => Err(CancelError::Aborted(self.task_id)),
        }
    }
}

#[derive(Clone)]
pub struct CancellationController {
    client: Arc<dyn TaskBackend>,
    registry: JobRegistry,
}

impl CancellationController {
    pub fn new(client: Arc<dyn TaskBackend>, registry: JobRegistry) -> Self {
        Self { client, registry }
    }

    /// Hide the job and stop its poller now, then revoke it remotely.
    ///
    /// Ids the registry does not know (e.g. taken from the fleet list) are
    /// still revoked on the backend.
    pub fn cancel(&self, task_id: &str) -> PendingCancel {
        let was_tracked = self.registry.remove(task_id).is_some();
        tracing::info!(job_id = %task_id, tracked = was_tracked, "Cancelling job");
        metrics::counter!("catalog_jobs_cancelled_total").increment(1);

        let client = self.client.clone();
        let id = task_id.to_string();
        let request = tokio::spawn(async move {
            let result = client.cancel(&id).await;
            if let Err(e) = &result {
                tracing::warn!(job_id = %id, error = %e, "Backend cancel failed; job stays hidden");
            }
            result
        });

        PendingCancel {
            task_id: task_id.to_string(),
            was_tracked,
            request,
        }
    }
}
