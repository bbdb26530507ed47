pub mod enums;
pub mod job;
pub mod job_attempt;
pub mod progress;
pub mod sync_job;
pub mod tuning;

pub use enums::{AttemptStatus, JobStatus, SyncStatus};
pub use job::Job;
pub use job_attempt::JobAttempt;
pub use progress::Progress;
pub use sync_job::{SyncJob, SyncStats};
pub use tuning::{ResolvedTuning, TransferTuning};
