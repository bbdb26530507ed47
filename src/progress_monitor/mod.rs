use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::db::Repository;
use crate::models::Progress;
use crate::rclone::{CoreStats, RCloneClient, TransferStat};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
struct Registration {
    rclone_job_id: i64,
}

/// Polls the rclone daemon's aggregate stats once per tick and fans the
/// result out to every in-flight job, persisting progress to the
/// repository. Deliberately a single global `core_stats` call per tick
/// rather than one call per registered job — with dozens of concurrent
/// transfers, per-job polling would mean dozens of RPCs every 2 seconds
/// just to track progress.
pub struct ProgressMonitor {
    rclone: RCloneClient,
    repository: Repository,
    registrations: Arc<RwLock<HashMap<Uuid, Registration>>>,
    poll_handle: RwLock<Option<JoinHandle<()>>>,
}

impl ProgressMonitor {
    pub fn new(rclone: RCloneClient, repository: Repository) -> Self {
        Self {
            rclone,
            repository,
            registrations: Arc::new(RwLock::new(HashMap::new())),
            poll_handle: RwLock::new(None),
        }
    }

    pub async fn register(&self, job_id: Uuid, rclone_job_id: i64) {
        self.registrations
            .write()
            .await
            .insert(job_id, Registration { rclone_job_id });
    }

    pub async fn unregister(&self, job_id: Uuid) {
        self.registrations.write().await.remove(&job_id);
    }

    pub async fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.poll_loop().await;
        });
        *self.poll_handle.write().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.poll_handle.write().await.take() {
            handle.abort();
        }
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    async fn poll_once(&self) {
        let snapshot: Vec<(Uuid, Registration)> = self
            .registrations
            .read()
            .await
            .iter()
            .map(|(id, reg)| (*id, *reg))
            .collect();

        if snapshot.is_empty() {
            return;
        }

        let stats = match self.rclone.core_stats(None).await {
            Ok(stats) => stats,
            Err(err) => {
                warn!(%err, "failed to fetch global core stats, skipping this tick");
                return;
            }
        };

        let by_daemon_id = transfer_lookup(&stats);
        let now = Utc::now();

        for (job_id, reg) in snapshot {
            let progress = match by_daemon_id.get(&reg.rclone_job_id) {
                Some(t) => Progress::from_daemon_stats(
                    t.bytes,
                    t.size,
                    t.speed_avg as u64,
                    0,
                    0,
                    t.eta,
                    now,
                ),
                None if stats.total_bytes > 0 || stats.bytes > 0 => Progress::from_daemon_stats(
                    stats.bytes,
                    stats.total_bytes,
                    stats.speed as u64,
                    stats.transfers,
                    stats.total_transfers,
                    stats.eta,
                    now,
                ),
                None => continue,
            };

            if let Err(err) = self.persist_progress(job_id, progress).await {
                warn!(%job_id, %err, "failed to persist progress sample");
            }
        }
    }

    async fn persist_progress(&self, job_id: Uuid, progress: Progress) -> Result<(), crate::error::AppError> {
        let mut job = self.repository.get_job(job_id).await?;
        job.progress = progress;
        job.updated_at = Utc::now();
        self.repository.update_job(&job).await
    }
}

/// Extract a `daemon job id -> TransferStat` lookup from the
/// `transferring` array, keyed by the numeric suffix of any
/// `group == "job/<N>"` entry. Entries with a differently-shaped group
/// (or none) are not ours and are ignored.
fn transfer_lookup(stats: &CoreStats) -> HashMap<i64, &TransferStat> {
    stats
        .transferring
        .iter()
        .filter_map(|t| {
            t.group
                .strip_prefix("job/")
                .and_then(|n| n.parse::<i64>().ok())
                .map(|id| (id, t))
        })
        .collect()
}
