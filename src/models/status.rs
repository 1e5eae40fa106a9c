use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Remote task state as reported by the catalog workers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum TaskState {
    // RECEIVED: a worker holds the task but has not started it.
    #[strum(to_string = "PENDING", serialize = "RECEIVED")]
    #[serde(alias = "RECEIVED")]
    Pending,
    // Celery reports STARTED for tasks that have not published progress yet.
    #[strum(to_string = "PROGRESS", serialize = "STARTED")]
    #[serde(alias = "STARTED")]
    Progress,
    Success,
    // REJECTED: the worker refused the task, it will never run.
    #[strum(to_string = "FAILURE", serialize = "REJECTED")]
    #[serde(alias = "REJECTED")]
    Failure,
    Retry,
    Revoked,
}

impl TaskState {
    /// Success, Failure and Revoked admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure | TaskState::Revoked)
    }

    /// Whether an observed move from `self` to `next` is a legal forward step.
    ///
    /// Repeated polls of a non-terminal state are allowed. Retry may be
    /// entered from Pending or Progress and leaves back into Pending or
    /// Progress, or straight to a terminal state when the backend gives up.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Success | Failure | Revoked, _) => false,
            (Pending, Pending | Progress | Retry) => true,
            (Progress, Progress | Retry) => true,
            (Retry, Retry | Pending | Progress) => true,
            (_, Success | Failure | Revoked) => true,
            _ => false,
        }
    }
}

/// Progress details published while a task is running.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub percent: Option<u8>,
    /// Human-readable phase label, e.g. "Processing parse results".
    pub phase: Option<String>,
}

/// Terse summary attached directly to a status payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultSummary {
    pub success: Option<bool>,
    pub total_found: Option<u64>,
    pub imported_count: Option<u64>,
    pub updated_count: Option<u64>,
}

impl ResultSummary {
    /// Extract the summary counters from an arbitrary task payload.
    /// Returns `None` when the payload carries none of them.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let count = |key: &str| value.get(key).and_then(serde_json::Value::as_u64);
        let summary = Self {
            success: value.get("success").and_then(serde_json::Value::as_bool),
            total_found: count("total_found").or_else(|| count("products_found")),
            imported_count: count("imported_count"),
            updated_count: count("updated_count"),
        };
        (summary != Self::default()).then_some(summary)
    }
}

/// Latest known status of a job. Always replaced as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusRecord {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<ResultSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl StatusRecord {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            progress: None,
            result_summary: None,
            error_detail: None,
        }
    }

    /// The record every job starts with right after submission.
    pub fn pending() -> Self {
        Self::new(TaskState::Pending)
    }

    pub fn progress(percent: u8, phase: impl Into<String>) -> Self {
        Self {
            progress: Some(Progress {
                percent: Some(percent.min(100)),
                phase: Some(phase.into()),
            }),
            ..Self::new(TaskState::Progress)
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::new(TaskState::Failure)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Progress as a percentage, only while the task is in Progress.
    pub fn percent(&self) -> Option<u8> {
        match self.state {
            TaskState::Progress => self.progress.as_ref().and_then(|p| p.percent),
            _ => None,
        }
    }
}
