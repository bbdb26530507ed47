use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::db::{JobFilter, Repository};
use crate::error::AppError;
use crate::executor::Executor;
use crate::gatekeeper::Gatekeeper;
use crate::models::{Job, JobAttempt, JobStatus};
use crate::notifier::Notifier;

const QUEUE_CAPACITY: usize = 1000;
const SCHEDULER_TICK: Duration = Duration::from_secs(5);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
/// Upper bound on how many queued/pending jobs a single sweep considers.
/// Large enough that a reasonable `max_concurrent` never starves a
/// lower-priority job behind the cap, small enough that one sweep tick
/// never does an unbounded table scan.
const SWEEP_BATCH: i64 = 200;

/// In-memory, DB-backed job scheduler. The channel holds ready-to-run
/// job ids for fast dispatch; the repository is the source of truth
/// that survives a restart. A job that can't fit on the channel (a
/// burst past `QUEUE_CAPACITY`) is still persisted as `Queued` and
/// picked up by the next scheduler tick's sweep, so enqueue never loses
/// work even when the channel is momentarily full.
pub struct JobQueue {
    repository: Repository,
    gatekeeper: Arc<Gatekeeper>,
    executor: Arc<dyn Executor>,
    notifier: Arc<dyn Notifier>,
    config: JobsConfig,
    sender: mpsc::Sender<Uuid>,
    receiver: Mutex<Option<mpsc::Receiver<Uuid>>>,
    semaphore: Arc<Semaphore>,
    active: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    root_cancel: CancellationToken,
    /// Set by `stop()` before it cancels `root_cancel`, so `run_job` can
    /// tell a shutdown-triggered cancellation (requeue for recovery)
    /// apart from an explicit `cancel()` (terminal).
    shutting_down: Arc<AtomicBool>,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(
        repository: Repository,
        gatekeeper: Arc<Gatekeeper>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
        config: JobsConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            repository,
            gatekeeper,
            executor,
            notifier,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
            sender,
            receiver: Mutex::new(Some(receiver)),
            active: Arc::new(RwLock::new(HashMap::new())),
            root_cancel: CancellationToken::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
            scheduler_handle: Mutex::new(None),
        }
    }

    /// Submit a new job for execution. Persists first, then tries to
    /// notify the scheduler loop; a full channel just means the job
    /// waits for the next periodic sweep instead of failing.
    pub async fn submit(&self, job: Job) -> Result<Uuid, AppError> {
        let id = job.id;
        self.repository.create_job(&job).await?;
        if self.sender.try_send(id).is_err() {
            warn!(job_id = %id, "scheduler channel full, job will run on next sweep");
        }
        Ok(id)
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<(), AppError> {
        if let Some(token) = self.active.read().await.get(&job_id) {
            token.cancel();
            return Ok(());
        }

        let mut job = self.repository.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Err(AppError::NotFound(format!("job {job_id} is not active")));
        }
        job.mark_cancelled(Utc::now());
        self.repository.update_job(&job).await
    }

    /// Reset any job left in `Pending`/`Running` by an unclean shutdown
    /// back to `Queued`, then spawn the scheduler loop. A job that was
    /// actually mid-transfer (`Running`, not merely `Pending` on a
    /// gatekeeper denial) left its attempt row open; that attempt is
    /// closed out as interrupted and `retries` is bumped so the next
    /// run's attempt number continues the contiguous sequence instead
    /// of repeating one already on record.
    pub async fn start(self: &Arc<Self>) -> Result<(), AppError> {
        for mut job in self.repository.list_recoverable_jobs().await? {
            warn!(job_id = %job.id, "recovering job left active by prior shutdown");

            if job.status == JobStatus::Running {
                if let Some(mut attempt) = self
                    .repository
                    .list_attempts(job.id)
                    .await?
                    .into_iter()
                    .last()
                {
                    if attempt.status == crate::models::AttemptStatus::Running {
                        attempt.finish_failed("interrupted by restart".to_string(), Utc::now());
                        self.repository.update_attempt(&attempt).await?;
                    }
                }
                job.retries += 1;
            }

            job.status = JobStatus::Queued;
            job.updated_at = Utc::now();
            self.repository.update_job(&job).await?;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.scheduler_loop().await;
        });
        *self.scheduler_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Cancel the root context (propagates to every running job), then
    /// wait up to `shutdown_timeout` for in-flight jobs to settle.
    pub async fn stop(&self, shutdown_timeout: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.root_cancel.cancel();

        let deadline = tokio::time::Instant::now() + shutdown_timeout;
        while tokio::time::Instant::now() < deadline {
            if self.active.read().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if let Some(handle) = self.scheduler_handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn scheduler_loop(self: Arc<Self>) {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .expect("scheduler_loop invoked more than once");

        let mut tick = tokio::time::interval(SCHEDULER_TICK);
        let mut cleanup_tick = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                _ = self.root_cancel.cancelled() => {
                    info!("job queue scheduler shutting down");
                    return;
                }
                Some(job_id) = receiver.recv() => {
                    self.try_dispatch(job_id).await;
                }
                _ = tick.tick() => {
                    self.sweep_queued().await;
                }
                _ = cleanup_tick.tick() => {
                    if let Err(err) = self.cleanup().await {
                        error!(%err, "job cleanup pass failed");
                    }
                }
            }
        }
    }

    /// Pick up every `Queued`/`Pending` job (crash recovery, gatekeeper
    /// re-tries, channel-full overflow), highest priority first, and try
    /// to admit each.
    async fn sweep_queued(&self) {
        let filter = JobFilter {
            statuses: vec![JobStatus::Queued, JobStatus::Pending],
            limit: Some(SWEEP_BATCH),
            ..Default::default()
        };
        match self.repository.list_jobs(&filter).await {
            Ok(jobs) => {
                for job in jobs {
                    self.try_admit(job).await;
                }
            }
            Err(err) => error!(%err, "failed to sweep queued jobs"),
        }
    }

    async fn try_dispatch(&self, job_id: Uuid) {
        match self.repository.get_job(job_id).await {
            Ok(job) if matches!(job.status, JobStatus::Queued | JobStatus::Pending) => {
                self.try_admit(job).await
            }
            Ok(_) => {}
            Err(err) => error!(%err, %job_id, "failed to load job for dispatch"),
        }
    }

    /// Consult the gatekeeper first, so a denial never consumes a
    /// concurrency permit. A job the gatekeeper denies is marked
    /// `Pending` and persisted so it is both visible as "not simply
    /// waiting for a slot" and automatically retried on the next sweep.
    /// A job the gatekeeper allows but that finds no free permit is left
    /// `Queued` for the next sweep.
    async fn try_admit(&self, mut job: Job) {
        let check = self.gatekeeper.can_start_job(job.file_size_bytes).await;
        if !check.allowed {
            if job.status != JobStatus::Pending {
                job.status = JobStatus::Pending;
                job.updated_at = Utc::now();
                if let Err(err) = self.repository.update_job(&job).await {
                    error!(%err, job_id = %job.id, "failed to persist pending status");
                }
            }
            return;
        }

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return,
        };

        if job.status != JobStatus::Queued {
            job.status = JobStatus::Queued;
            job.updated_at = Utc::now();
            if let Err(err) = self.repository.update_job(&job).await {
                error!(%err, job_id = %job.id, "failed to clear pending status before dispatch");
            }
        }

        self.spawn_run(job, permit);
    }

    fn spawn_run(&self, job: Job, permit: tokio::sync::OwnedSemaphorePermit) {
        let job_id = job.id;
        let token = self.root_cancel.child_token();
        let active = Arc::clone(&self.active);
        let active_insert = Arc::clone(&active);

        let repository = self.repository.clone();
        let executor = Arc::clone(&self.executor);
        let notifier = Arc::clone(&self.notifier);
        let max_retries = self.config.max_retries;
        let backoff_base_ms = self.config.backoff_base_ms;
        let backoff_max_ms = self.config.backoff_max_ms;
        let sender = self.sender.clone();
        let token_for_insert = token.clone();
        let shutting_down = Arc::clone(&self.shutting_down);

        tokio::spawn(async move {
            active_insert.write().await.insert(job_id, token_for_insert);
            let _permit = permit;
            run_job(
                job,
                repository,
                executor,
                notifier,
                token,
                shutting_down,
                max_retries,
                backoff_base_ms,
                backoff_max_ms,
                sender,
            )
            .await;
            active.write().await.remove(&job_id);
        });
    }

    async fn cleanup(&self) -> Result<u64, AppError> {
        let now = Utc::now();
        let completed_before = now - chrono::Duration::hours(self.config.cleanup_completed_after_hours);
        let failed_before = now - chrono::Duration::hours(self.config.cleanup_failed_after_hours);
        self.repository.cleanup_old_jobs(completed_before, failed_before).await
    }
}

/// Exponential backoff, capped: `base * 2^retries`, never exceeding `max`.
pub fn backoff_delay(retries: u32, base_ms: u64, max_ms: u64) -> Duration {
    let scaled = base_ms.saturating_mul(1u64 << retries.min(32));
    Duration::from_millis(scaled.min(max_ms))
}

#[allow(clippy::too_many_arguments)]
async fn run_job(
    mut job: Job,
    repository: Repository,
    executor: Arc<dyn Executor>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
    shutting_down: Arc<AtomicBool>,
    max_retries: u32,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
    requeue_sender: mpsc::Sender<Uuid>,
) {
    let job_id = job.id;
    job.max_retries = max_retries;
    job.mark_running(Utc::now());
    if let Err(err) = repository.update_job(&job).await {
        error!(%err, %job_id, "failed to mark job running");
        return;
    }

    let attempt_num = job.retries + 1;
    let mut attempt = JobAttempt::start(job_id, attempt_num, Utc::now());
    if let Err(err) = repository.create_attempt(&attempt).await {
        error!(%err, %job_id, "failed to record job attempt");
    }

    let result = executor.execute(&job, cancel).await;
    let now = Utc::now();

    match result {
        Ok(()) => {
            attempt.finish_completed(now);
            job.mark_completed(now);
            notifier.notify_job_completed(&job).await;
        }
        Err(err) if err.is_cancelled() => {
            if shutting_down.load(Ordering::SeqCst) {
                attempt.finish_failed("interrupted by shutdown".to_string(), now);
                job.mark_interrupted_by_shutdown(now);
            } else {
                attempt.finish_failed("cancelled".to_string(), now);
                job.mark_cancelled(now);
            }
        }
        Err(err) => {
            attempt.finish_failed(err.to_string(), now);

            if err.is_retryable() && job.can_retry() {
                job.requeue_for_retry(err.to_string(), now);
                let delay = backoff_delay(job.retries, backoff_base_ms, backoff_max_ms);
                let sender = requeue_sender.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = sender.send(job_id).await;
                });
            } else {
                job.mark_failed(err.to_string(), now);
                notifier.notify_job_failed(&job, &err.to_string()).await;
            }
        }
    }

    if let Err(err) = repository.update_attempt(&attempt).await {
        error!(%err, %job_id, "failed to persist attempt outcome");
    }
    if let Err(err) = repository.update_job(&job).await {
        error!(%err, %job_id, "failed to persist job outcome");
    }
}
