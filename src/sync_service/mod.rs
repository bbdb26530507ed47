use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RcloneConfig;
use crate::db::Repository;
use crate::error::{AppError, AppResult};
use crate::gatekeeper::Gatekeeper;
use crate::models::{ResolvedTuning, SyncJob, SyncStats, SyncStatus};
use crate::notifier::Notifier;
use crate::rclone::{CopyRequest, RCloneClient};

const MONITOR_TICK: Duration = Duration::from_secs(2);
const CANCEL_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A single-slot scheduler for whole-library mirror syncs. Unlike
/// `JobQueue`, there is no concurrency cap to enforce beyond "at most
/// one" and no retries — a failed sync is simply reported and left for
/// a caller to start again.
pub struct SyncService {
    repository: Repository,
    gatekeeper: Arc<Gatekeeper>,
    rclone: RCloneClient,
    remote_name: String,
    notifier: Arc<dyn Notifier>,
    default_tuning: ResolvedTuning,
    active: Arc<RwLock<Option<(Uuid, CancellationToken)>>>,
    root_cancel: CancellationToken,
    running_task: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl SyncService {
    pub fn new(
        repository: Repository,
        gatekeeper: Arc<Gatekeeper>,
        rclone_config: &RcloneConfig,
        notifier: Arc<dyn Notifier>,
    ) -> AppResult<Self> {
        Ok(Self {
            repository,
            gatekeeper,
            rclone: RCloneClient::new(rclone_config)?,
            remote_name: rclone_config.remote_name.clone(),
            notifier,
            default_tuning: ResolvedTuning::default(),
            active: Arc::new(RwLock::new(None)),
            root_cancel: CancellationToken::new(),
            running_task: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Consult the gatekeeper, ping the daemon, create a `queued` row,
    /// and launch the execution task. Returns the created row.
    pub async fn start_sync(self: &Arc<Self>, remote_path: String, local_path: String) -> AppResult<SyncJob> {
        let check = self.gatekeeper.can_start_sync().await;
        if !check.allowed {
            return Err(AppError::GatekeeperDenied { reason: check.reason });
        }

        self.rclone.ping().await?;

        let sync = SyncJob::new(remote_path, local_path);
        self.repository.create_sync_job(&sync).await?;

        self.gatekeeper.mark_sync_started();
        self.launch(sync.clone());

        Ok(sync)
    }

    fn launch(self: &Arc<Self>, sync: SyncJob) {
        let this = Arc::clone(self);
        let token = self.root_cancel.child_token();
        let sync_id = sync.id;
        let active = Arc::clone(&self.active);

        let handle = tokio::spawn(async move {
            active.write().await.replace((sync_id, token.clone()));
            this.execute_sync_job(sync, token).await;
            active.write().await.take();
            this.gatekeeper.mark_sync_finished();
        });

        tokio::spawn(async move {
            let _ = handle.await;
        });
    }

    async fn execute_sync_job(&self, mut sync: SyncJob, cancel: CancellationToken) {
        let sync_id = sync.id;
        let tuning = self.default_tuning.clone();

        let dst_fs = if sync.local_path.ends_with('/') {
            sync.local_path.clone()
        } else {
            format!("{}/", sync.local_path)
        };

        let req = CopyRequest {
            src_fs: format!("{}:{}", self.remote_name, sync.remote_path.trim_start_matches('/')),
            dst_fs,
            transfers: tuning.transfers,
            checkers: tuning.checkers,
            bandwidth_limit_mbps: tuning.bandwidth_limit_mbps,
            retries: tuning.retries,
            order: tuning.order,
            buffer_size_mb: tuning.buffer_size_mb,
            ignore_existing: tuning.ignore_existing,
            include_rules: Vec::new(),
        };

        let handle = match self.rclone.start_copy(&req).await {
            Ok(h) => h,
            Err(err) => {
                sync.mark_failed(err.to_string(), Utc::now());
                if let Err(e) = self.repository.update_sync_job(&sync).await {
                    error!(%e, %sync_id, "failed to persist sync failure");
                }
                self.notifier.notify_sync_failed(&sync, &err.to_string()).await;
                return;
            }
        };

        sync.mark_started(handle.jobid, Utc::now());
        if let Err(err) = self.repository.update_sync_job(&sync).await {
            error!(%err, %sync_id, "failed to persist sync start");
        }

        self.monitor_until_done(sync, handle.jobid, cancel).await;
    }

    async fn monitor_until_done(&self, mut sync: SyncJob, rclone_job_id: i64, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(MONITOR_TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = tokio::time::timeout(CANCEL_STOP_TIMEOUT, self.rclone.stop_job(rclone_job_id)).await;
                    let now = Utc::now();
                    if self.shutting_down.load(Ordering::SeqCst) {
                        // The root token fired because of a graceful shutdown,
                        // not a user cancel_sync() — requeue so the next
                        // start's recovery pass picks this sync back up.
                        sync.status = SyncStatus::Queued;
                        sync.rclone_job_id = None;
                        sync.updated_at = now;
                        if let Err(err) = self.repository.update_sync_job(&sync).await {
                            error!(%err, sync_id = %sync.id, "failed to persist sync demotion on shutdown");
                        }
                    } else {
                        sync.mark_cancelled(now);
                        if let Err(err) = self.repository.update_sync_job(&sync).await {
                            error!(%err, sync_id = %sync.id, "failed to persist sync cancellation");
                        }
                    }
                    return;
                }
                _ = ticker.tick() => {
                    let status = match self.rclone.job_status(rclone_job_id).await {
                        Ok(s) => s,
                        Err(err) => {
                            warn!(%err, sync_id = %sync.id, "transient error polling sync status, retrying next tick");
                            continue;
                        }
                    };

                    let now = Utc::now();
                    sync.progress = crate::models::Progress::from_daemon_stats(
                        status.output.bytes,
                        status.output.total_bytes,
                        (status.output.speed) as u64,
                        status.output.transfers,
                        status.output.total_transfers,
                        None,
                        now,
                    );
                    sync.updated_at = now;

                    if status.finished {
                        let stats = SyncStats::from_daemon_totals(
                            status.output.bytes,
                            status.output.transfers,
                            status.output.total_transfers,
                            status.output.errors,
                        );

                        if status.success {
                            sync.mark_completed(stats, now);
                            if let Err(err) = self.repository.update_sync_job(&sync).await {
                                error!(%err, sync_id = %sync.id, "failed to persist sync completion");
                            }
                            self.notifier.notify_sync_completed(&sync).await;
                        } else {
                            sync.mark_failed(status.error.clone(), now);
                            if let Err(err) = self.repository.update_sync_job(&sync).await {
                                error!(%err, sync_id = %sync.id, "failed to persist sync failure");
                            }
                            self.notifier.notify_sync_failed(&sync, &status.error).await;
                        }
                        return;
                    }

                    if let Err(err) = self.repository.update_sync_job(&sync).await {
                        error!(%err, sync_id = %sync.id, "failed to persist sync progress");
                    }
                }
            }
        }
    }

    pub async fn cancel_sync(&self, sync_id: Uuid) -> AppResult<()> {
        let active = self.active.read().await.clone();
        match active {
            Some((id, token)) if id == sync_id => {
                token.cancel();
                Ok(())
            }
            _ => {
                let mut sync = self.repository.get_sync_job(sync_id).await?;
                if sync.status.is_terminal() {
                    return Err(AppError::NotFound(format!("sync {sync_id} is not active")));
                }
                if let Some(rclone_job_id) = sync.rclone_job_id {
                    let _ = tokio::time::timeout(CANCEL_STOP_TIMEOUT, self.rclone.stop_job(rclone_job_id)).await;
                }
                sync.mark_cancelled(Utc::now());
                self.repository.update_sync_job(&sync).await
            }
        }
    }

    /// Any row left `running` by an unclean shutdown is demoted to
    /// `queued` and relaunched. Called once at startup.
    pub async fn recover_interrupted_syncs(self: &Arc<Self>) -> AppResult<()> {
        for mut sync in self.repository.list_recoverable_sync_jobs().await? {
            warn!(sync_id = %sync.id, "recovering sync left active by prior shutdown");
            sync.status = SyncStatus::Queued;
            sync.rclone_job_id = None;
            sync.updated_at = Utc::now();
            self.repository.update_sync_job(&sync).await?;

            self.gatekeeper.mark_sync_started();
            self.launch(sync);
        }
        Ok(())
    }

    /// Best-effort stop of any active sync, bounded by
    /// `SHUTDOWN_STOP_TIMEOUT`, demoting it back to `queued` so the next
    /// start's recovery pass picks it up again.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.root_cancel.cancel();

        let active = self.active.read().await.clone();
        if let Some((sync_id, _)) = active {
            if let Ok(mut sync) = self.repository.get_sync_job(sync_id).await {
                if let Some(rclone_job_id) = sync.rclone_job_id {
                    let _ = tokio::time::timeout(SHUTDOWN_STOP_TIMEOUT, self.rclone.stop_job(rclone_job_id)).await;
                }
                sync.status = SyncStatus::Queued;
                sync.updated_at = Utc::now();
                if let Err(err) = self.repository.update_sync_job(&sync).await {
                    error!(%err, %sync_id, "failed to persist sync demotion on shutdown");
                }
            }
        }

        if let Some(handle) = self.running_task.lock().await.take() {
            handle.abort();
        }

        info!("sync service shut down");
    }
}
