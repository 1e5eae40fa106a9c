use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

use crate::services::poller::PollSettings;
use crate::tracker::TrackerSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Catalog API root, e.g. "http://localhost:8000/api/v1"
    #[garde(length(min = 1))]
    pub api_base_url: String,

    /// Bearer token for admin-only endpoints
    #[serde(default)]
    #[garde(skip)]
    pub api_token: Option<String>,

    /// Delay between two status polls of one job
    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 1))]
    pub poll_interval_ms: u64,

    /// Give up watching a job after this long
    #[serde(default = "default_poll_timeout_secs")]
    #[garde(range(min = 1))]
    pub poll_timeout_secs: u64,

    /// Fleet refresh and sweep cadence
    #[serde(default = "default_fleet_interval_ms")]
    #[garde(range(min = 1))]
    pub fleet_interval_ms: u64,

    /// How long a finished job stays visible
    #[serde(default = "default_grace_period_secs")]
    #[garde(skip)]
    pub grace_period_secs: u64,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    #[garde(range(min = 1))]
    pub request_timeout_secs: u64,

    /// Prometheus listener address (e.g., "0.0.0.0:9100"). Disabled when unset.
    #[serde(default)]
    #[garde(skip)]
    pub metrics_addr: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_poll_timeout_secs() -> u64 {
    300
}

fn default_fleet_interval_ms() -> u64 {
    3_000
}

fn default_grace_period_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        envy::from_env::<Self>()?.checked()
    }

    /// Reject intervals and timeouts of zero.
    fn checked(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_secs(self.poll_timeout_secs),
        }
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            poll: self.poll_settings(),
            fleet_interval: Duration::from_millis(self.fleet_interval_ms),
            grace_period: Duration::from_secs(self.grace_period_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
