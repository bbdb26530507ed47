use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::AttemptStatus;

/// One execution attempt of a `Job`. Attempts are append-only: a job's
/// `attempt_num` sequence is contiguous starting at 1, and a past
/// attempt is never mutated once it reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttempt {
    pub id: Uuid,
    pub job_id: Uuid,
    pub attempt_num: u32,
    pub status: AttemptStatus,
    pub log: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobAttempt {
    pub fn start(job_id: Uuid, attempt_num: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            attempt_num,
            status: AttemptStatus::Running,
            log: String::new(),
            error: None,
            started_at: now,
            finished_at: None,
        }
    }

    /// Append a line to the attempt's log. Never replaces prior content.
    pub fn append_log(&mut self, line: &str) {
        if !self.log.is_empty() {
            self.log.push('\n');
        }
        self.log.push_str(line);
    }

    pub fn finish_completed(&mut self, now: DateTime<Utc>) {
        self.status = AttemptStatus::Completed;
        self.finished_at = Some(now);
    }

    pub fn finish_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = AttemptStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_log_accumulates_lines() {
        let mut attempt = JobAttempt::start(Uuid::new_v4(), 1, Utc::now());
        attempt.append_log("starting copy");
        attempt.append_log("50% complete");
        assert_eq!(attempt.log, "starting copy\n50% complete");
    }

    #[test]
    fn finish_sets_terminal_status_and_timestamp() {
        let mut attempt = JobAttempt::start(Uuid::new_v4(), 1, Utc::now());
        let now = Utc::now();
        attempt.finish_failed("timeout".into(), now);
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(attempt.finished_at, Some(now));
        assert_eq!(attempt.error.as_deref(), Some("timeout"));
    }
}
