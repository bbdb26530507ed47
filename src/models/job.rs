use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::enums::JobStatus;
use super::progress::Progress;
use super::tuning::TransferTuning;

/// A single download/transfer job. `Job` is the unit of work the
/// scheduler dequeues, runs through `Executor`, and retries on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub source_path: String,
    pub dest_path: String,
    pub status: JobStatus,
    /// Higher runs first. Ties break on `created_at` ascending (FIFO).
    pub priority: i32,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub file_size_bytes: Option<u64>,
    pub tuning: TransferTuning,
    pub progress: Progress,
    pub retries: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    /// Arbitrary caller-supplied metadata, stored as opaque JSON.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(source_path: String, dest_path: String, max_retries: u32) -> Self {
        Self::with_priority(source_path, dest_path, max_retries, 0)
    }

    pub fn with_priority(source_path: String, dest_path: String, max_retries: u32, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_path,
            dest_path,
            status: JobStatus::Queued,
            priority,
            category: None,
            tags: Vec::new(),
            file_size_bytes: None,
            tuning: TransferTuning::default(),
            progress: Progress::default(),
            retries: 0,
            max_retries,
            last_error: None,
            metadata: Value::Null,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether another attempt may still be scheduled after a failure.
    /// Invariant: `retries` never exceeds `max_retries`.
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        // A transfer that never reported a non-zero total (a tiny or
        // instantaneous copy) still must read back at 100%, so floor
        // total_bytes to whatever was actually transferred.
        self.progress.total_bytes = self.progress.total_bytes.max(self.progress.bytes).max(1);
        self.progress.bytes = self.progress.total_bytes;
        self.progress.files_completed = self.progress.files_total.max(self.progress.files_completed);
        self.progress.last_update = now;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.last_error = Some(error);
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn requeue_for_retry(&mut self, error: String, now: DateTime<Utc>) {
        self.last_error = Some(error);
        self.retries += 1;
        self.status = JobStatus::Queued;
        self.updated_at = now;
    }

    /// Put a job interrupted by a graceful shutdown back in `Queued` so
    /// the next `start()`'s recovery pass picks it up again. Unlike
    /// `requeue_for_retry`, this isn't a failed attempt against the job
    /// itself, so `retries` is left untouched.
    pub fn mark_interrupted_by_shutdown(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_queued_with_zero_retries() {
        let job = Job::new("src".into(), "dst".into(), 3);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retries, 0);
        assert!(job.can_retry());
    }

    #[test]
    fn retries_never_exceed_max() {
        let mut job = Job::new("src".into(), "dst".into(), 2);
        let now = Utc::now();
        job.requeue_for_retry("boom".into(), now);
        job.requeue_for_retry("boom again".into(), now);
        assert_eq!(job.retries, 2);
        assert!(!job.can_retry());
    }

    #[test]
    fn completed_implies_full_progress_and_timestamp() {
        let mut job = Job::new("src".into(), "dst".into(), 3);
        job.progress.total_bytes = 1000;
        let now = Utc::now();
        job.mark_completed(now);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress.percentage(), 100.0);
        assert_eq!(job.completed_at, Some(now));
    }

    #[test]
    fn completed_reads_100_percent_even_when_daemon_never_reported_a_total() {
        // A tiny or instantaneous transfer can finish before any poll
        // observes a non-zero totalBytes; percentage must still read 100.
        let mut job = Job::new("src".into(), "dst".into(), 3);
        let now = Utc::now();
        job.mark_completed(now);
        assert_eq!(job.progress.percentage(), 100.0);
    }
}
