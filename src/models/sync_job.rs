use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::SyncStatus;
use super::progress::Progress;

/// Summary statistics for a completed or in-progress sync, sourced from
/// the rclone daemon's core/stats at the time the sync finished.
///
/// `files_skipped` is not reported directly by rclone; it is approximated
/// as `total_transfers - transfers`, clamped at zero so a daemon stats
/// quirk (e.g. `transfers` briefly exceeding `total_transfers` mid-run)
/// never produces a negative count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub bytes_transferred: u64,
    pub transfers: u64,
    pub total_transfers: u64,
    pub errors: u64,
    pub files_skipped: u64,
}

impl SyncStats {
    pub fn from_daemon_totals(
        bytes_transferred: u64,
        transfers: u64,
        total_transfers: u64,
        errors: u64,
    ) -> Self {
        let files_skipped = total_transfers.saturating_sub(transfers);
        Self {
            bytes_transferred,
            transfers,
            total_transfers,
            errors,
            files_skipped,
        }
    }
}

/// A whole-library sync run against the rclone remote. Syncs are
/// single-slot: at most one may be `Queued` or `Running` at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub remote_path: String,
    pub local_path: String,
    pub status: SyncStatus,
    /// The daemon-side job id returned by the `sync/copy` rc call, once
    /// the transfer has actually been started.
    pub rclone_job_id: Option<i64>,
    pub progress: Progress,
    pub stats: SyncStats,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    pub fn new(remote_path: String, local_path: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            remote_path,
            local_path,
            status: SyncStatus::Queued,
            rclone_job_id: None,
            progress: Progress::default(),
            stats: SyncStats::default(),
            last_error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Record the daemon job id once the copy call has actually started,
    /// and flip to `Running`.
    pub fn mark_started(&mut self, rclone_job_id: i64, now: DateTime<Utc>) {
        self.rclone_job_id = Some(rclone_job_id);
        self.status = SyncStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.updated_at = now;
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = SyncStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, stats: SyncStats, now: DateTime<Utc>) {
        self.status = SyncStatus::Completed;
        self.stats = stats;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = SyncStatus::Failed;
        self.last_error = Some(error);
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = SyncStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}
