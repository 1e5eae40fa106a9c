use serde::{Deserialize, Serialize};

/// Full result of a finished parse task, fetched separately from its status.
///
/// Products are kept as opaque JSON; their schema belongs to the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskOutcome {
    pub success: bool,
    pub products: Vec<serde_json::Value>,
    pub total_found: u64,
    pub success_count: u64,
    pub failed_count: u64,
    /// Mean parse quality in `[0, 1]`.
    pub quality_score: f64,
    /// Wall-clock parsing time in seconds.
    pub parsing_time: f64,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    /// Clamp values the backend is expected to keep in range.
    pub fn normalized(mut self) -> Self {
        if !self.quality_score.is_finite() {
            self.quality_score = 0.0;
        }
        self.quality_score = self.quality_score.clamp(0.0, 1.0);
        if !self.parsing_time.is_finite() || self.parsing_time < 0.0 {
            self.parsing_time = 0.0;
        }
        self
    }
}
