//! Sync job progress and its state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a server-side sync job as tracked by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Pending,
    Syncing,
    Completed,
    Error,
}

impl SyncStatus {
    /// Whether `self -> next` is an allowed transition.
    ///
    /// `Completed` and `Error` are terminal until the client is reset.
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (Idle, Pending)
                | (Pending, Syncing)
                | (Pending, Error)
                | (Syncing, Syncing)
                | (Syncing, Completed)
                | (Syncing, Error)
                | (Completed, Idle)
                | (Error, Idle)
        )
    }

    /// Whether the job is finished (successfully or not).
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Error)
    }

    /// Whether a job is pending or running.
    pub fn is_active(self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Syncing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Completed => "completed",
            SyncStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid sync transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SyncStatus,
    pub to: SyncStatus,
}

/// Progress of the current sync job.
///
/// Field names match the JSON payloads of the sync event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub current_batch: u64,
    #[serde(default)]
    pub total_batches: u64,
    #[serde(default, rename = "duration", alias = "durationMs", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncProgress {
    /// The idle value every client starts from.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Move to `next`, rejecting transitions outside the table.
    pub fn transition(&mut self, next: SyncStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Copy the counters of `other` into `self`, leaving the status alone.
    pub fn overwrite_counts(&mut self, other: &SyncProgress) {
        self.processed = other.processed;
        self.total = other.total;
        self.current_batch = other.current_batch;
        self.total_batches = other.total_batches;
        if other.duration_ms.is_some() {
            self.duration_ms = other.duration_ms;
        }
    }

    /// Percentage of processed items, if the total is known.
    pub fn percent(&self) -> Option<f64> {
        (self.total > 0).then(|| self.processed as f64 * 100.0 / self.total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SyncStatus::*;

    const ALL: [SyncStatus; 5] = [Idle, Pending, Syncing, Completed, Error];

    #[test]
    fn transition_table_matches_lifecycle() {
        let allowed = [
            (Idle, Pending),
            (Pending, Syncing),
            (Pending, Error),
            (Syncing, Syncing),
            (Syncing, Completed),
            (Syncing, Error),
            (Completed, Idle),
            (Error, Idle),
        ];
        for from in ALL {
            for to in ALL {
                let expected = allowed.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn rejected_transition_leaves_status_unchanged() {
        let mut progress = SyncProgress::idle();
        let err = progress.transition(Completed).unwrap_err();
        assert_eq!(err, InvalidTransition { from: Idle, to: Completed });
        assert_eq!(progress.status, Idle);

        progress.transition(Pending).unwrap();
        progress.transition(Syncing).unwrap();
        assert!(progress.transition(Pending).is_err());
        assert_eq!(progress.status, Syncing);
    }

    #[test]
    fn parses_stream_payload() {
        let payload = r#"{"processed":10,"total":50,"currentBatch":2,"totalBatches":5,"duration":1200}"#;
        let progress: SyncProgress = serde_json::from_str(payload).unwrap();
        assert_eq!(progress.status, Idle);
        assert_eq!(progress.processed, 10);
        assert_eq!(progress.current_batch, 2);
        assert_eq!(progress.duration_ms, Some(1200));
        assert_eq!(progress.percent(), Some(20.0));
    }

    #[test]
    fn overwrite_counts_keeps_previous_duration_when_absent() {
        let mut progress = SyncProgress {
            duration_ms: Some(10),
            ..Default::default()
        };
        progress.overwrite_counts(&SyncProgress {
            processed: 3,
            total: 4,
            ..Default::default()
        });
        assert_eq!(progress.processed, 3);
        assert_eq!(progress.duration_ms, Some(10));
    }
}
