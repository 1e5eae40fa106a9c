use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{Domain, JobKind, ScrapeParams};

/// A task currently running somewhere on the worker fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveTask {
    pub task_id: String,
    /// Registered task name, e.g. `app.tasks.catalog_tasks.parse_catalog_task`.
    pub name: String,
    pub worker: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    /// Unix timestamp (seconds) at which the worker picked the task up.
    #[serde(default)]
    pub time_start: Option<f64>,
}

impl ActiveTask {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.time_start?;
        DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
    }

    /// Best guess at what was requested, from the task name and kwargs.
    /// `None` for tasks that are not a top-level catalog job.
    pub fn job_kind(&self) -> Option<JobKind> {
        let params = || {
            let query = self.kwargs.get("query")?.as_str()?.to_string();
            let limit = self.kwargs.get("limit")?.as_u64()?;
            let domain = self
                .kwargs
                .get("domain")
                .and_then(serde_json::Value::as_str)
                .and_then(|d| Domain::from_str(d).ok())
                .unwrap_or_default();
            Some(ScrapeParams::new(query, u32::try_from(limit).ok()?).with_domain(domain))
        };

        if self.name.ends_with("process_catalog_chain") {
            Some(JobKind::FullImport(params()?))
        } else if self.name.ends_with("parse_catalog_task") {
            Some(JobKind::PreviewOnly(params()?))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrandCount {
    pub brand: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryCount {
    pub category: Option<String>,
    pub count: u64,
}

/// Aggregate catalog statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogStats {
    pub total_items: u64,
    pub recent_items_week: u64,
    #[serde(default)]
    pub price_range: PriceRange,
    #[serde(default)]
    pub top_brands: Vec<BrandCount>,
    #[serde(default)]
    pub top_categories: Vec<CategoryCount>,
    /// Backend-side timestamp; naive ISO-8601, no zone.
    pub generated_at: String,
}

/// Response of the catalog health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogHealth {
    /// `healthy` or `unhealthy`.
    pub status: String,
    #[serde(default)]
    pub celery_workers: u32,
    #[serde(default)]
    pub active_queues: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub services: serde_json::Map<String, serde_json::Value>,
}

impl CatalogHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy" && self.celery_workers > 0
    }
}

/// Fleet-wide view, replaced wholesale on every refresh.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FleetSnapshot {
    pub active: Vec<ActiveTask>,
    pub stats: Option<CatalogStats>,
    pub refreshed_at: Option<DateTime<Utc>>,
}
