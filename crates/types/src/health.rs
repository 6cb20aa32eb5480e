//! Health status and monitoring configuration for the companion service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of the companion service's health as seen by the monitor.
///
/// Values of this type are always copies. Mutating one never affects the
/// monitor that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealthStatus {
    /// Outcome of the most recent completed probe.
    pub is_available: bool,

    /// Time the most recent probe cycle completed.
    pub last_check: Option<DateTime<Utc>>,

    /// Failed probes since the last success.
    pub consecutive_errors: u32,

    /// Open requests issued through the monitor.
    pub total_requests: u64,

    /// Open requests that succeeded.
    pub successful_requests: u64,

    /// Open requests that failed.
    pub failed_requests: u64,

    /// Moving average of probe latency over the last samples, in milliseconds.
    pub average_response_time_ms: f64,

    /// Time since the last successful probe.
    #[serde(default, with = "duration_millis")]
    pub uptime: Option<Duration>,
}

impl ServiceHealthStatus {
    /// Create a new status for a service that has never been probed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful probe.
    pub fn mark_available(&mut self) {
        self.is_available = true;
        self.consecutive_errors = 0;
    }

    /// Record a failed probe.
    pub fn mark_unavailable(&mut self) {
        self.is_available = false;
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    /// Zero the request counters and the latency average.
    pub fn clear_counters(&mut self) {
        self.total_requests = 0;
        self.successful_requests = 0;
        self.failed_requests = 0;
        self.average_response_time_ms = 0.0;
    }
}

/// Runtime-replaceable settings for the health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringConfig {
    /// Delay between probe cycles in milliseconds.
    pub check_interval_ms: u64,

    /// Failures in a row before recovery kicks in.
    pub max_consecutive_errors: u32,

    /// Whether to attempt recovery automatically.
    pub auto_restart: bool,

    /// Log every probe cycle at info level.
    pub debug: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 30_000,
            max_consecutive_errors: 3,
            auto_restart: true,
            debug: false,
        }
    }
}

impl MonitoringConfig {
    /// Interval between probe cycles.
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Merge the set fields of `patch` into this config.
    pub fn apply(&mut self, patch: &MonitoringConfigPatch) {
        if let Some(interval) = patch.check_interval_ms {
            self.check_interval_ms = interval;
        }
        if let Some(max) = patch.max_consecutive_errors {
            self.max_consecutive_errors = max;
        }
        if let Some(auto_restart) = patch.auto_restart {
            self.auto_restart = auto_restart;
        }
        if let Some(debug) = patch.debug {
            self.debug = debug;
        }
    }
}

/// Partial update for [`MonitoringConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfigPatch {
    pub check_interval_ms: Option<u64>,
    pub max_consecutive_errors: Option<u32>,
    pub auto_restart: Option<bool>,
    pub debug: Option<bool>,
}

/// Serializes `Option<Duration>` as an optional number of milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
