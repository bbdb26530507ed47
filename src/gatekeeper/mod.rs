use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{DiskExt, System, SystemExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::GatekeeperConfig;
use crate::rclone::RCloneClient;

/// Fixed, externally-contracted denial/approval reasons. Callers (and
/// anyone scripting against job failures) match on these strings, so
/// they must never be reworded casually.
pub mod reasons {
    pub const SYNC_IN_PROGRESS: &str = "Sync operation in progress";
    pub const BANDWIDTH_LIMIT_REACHED: &str = "Bandwidth limit reached";
    pub const CACHE_DISK_USAGE_TOO_HIGH: &str = "Cache disk usage too high";
    pub const FILE_SIZE_EXCEEDS_CACHE: &str = "File size would exceed cache limit";
    pub const SYNC_ALREADY_RUNNING: &str = "Another sync is already running";
    pub const INSUFFICIENT_CACHE_FOR_SYNC: &str = "Insufficient cache space for sync";
    pub const ALL_CHECKS_PASSED: &str = "All checks passed";
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub allowed: bool,
    pub reason: String,
}

impl CheckResult {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: reasons::ALL_CHECKS_PASSED.to_string(),
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ResourceSample {
    bandwidth_usage_mbps: f64,
    cache_used_percent: f64,
    cache_free_bytes: u64,
    cache_used_bytes: u64,
    cache_total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ResourceStatus {
    pub bandwidth_usage_mbps: f64,
    pub bandwidth_limit_mbps: f64,
    pub cache_used_percent: f64,
    pub cache_max_percent: f64,
    pub cache_free_bytes: u64,
    pub cache_total_bytes: u64,
    pub sync_in_progress: bool,
}

/// Admission control gate in front of the job scheduler and the sync
/// service. A background sampler keeps a live view of bandwidth usage
/// and cache-disk usage so `can_start_job`/`can_start_sync` never block
/// on I/O themselves.
pub struct Gatekeeper {
    config: GatekeeperConfig,
    rclone: RCloneClient,
    sample: Arc<RwLock<ResourceSample>>,
    sync_in_progress: Arc<AtomicBool>,
    sampler_handle: RwLock<Option<JoinHandle<()>>>,
}

impl Gatekeeper {
    pub fn new(config: GatekeeperConfig, rclone: RCloneClient) -> Self {
        Self {
            config,
            rclone,
            sample: Arc::new(RwLock::new(ResourceSample::default())),
            sync_in_progress: Arc::new(AtomicBool::new(false)),
            sampler_handle: RwLock::new(None),
        }
    }

    /// Spawn the background sampler. Idempotent: calling twice replaces
    /// the prior task rather than spawning a second one.
    pub async fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.sampler_loop().await;
        });
        *self.sampler_handle.write().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.sampler_handle.write().await.take() {
            handle.abort();
        }
    }

    async fn sampler_loop(self: Arc<Self>) {
        let bandwidth_interval = Duration::from_secs(self.config.bandwidth_check_interval_secs.max(1));
        let disk_interval = Duration::from_secs(self.config.disk_check_interval_secs.max(1));

        let mut bandwidth_ticker = tokio::time::interval(bandwidth_interval);
        let mut disk_ticker = tokio::time::interval(disk_interval);

        loop {
            tokio::select! {
                _ = bandwidth_ticker.tick() => self.sample_bandwidth().await,
                _ = disk_ticker.tick() => self.sample_disk(),
            }
        }
    }

    async fn sample_bandwidth(&self) {
        match self.rclone.core_stats(None).await {
            Ok(stats) => {
                let mbps = (stats.speed * 8.0) / 1_000_000.0;
                self.sample.write().await.bandwidth_usage_mbps = mbps;
            }
            Err(err) => {
                debug!(%err, "failed to sample rclone bandwidth, leaving last sample in place");
            }
        }
    }

    fn sample_disk(&self) {
        let mut sys = System::new();
        sys.refresh_disks_list();
        sys.refresh_disks();

        let cache_path = &self.config.cache_path;
        let best_match = sys
            .disks()
            .iter()
            .filter(|d| cache_path.starts_with(d.mount_point().to_string_lossy().as_ref()))
            .max_by_key(|d| d.mount_point().to_string_lossy().len());

        let Some(disk) = best_match else {
            warn!(cache_path, "no matching disk found for cache path, skipping sample");
            return;
        };

        let total = disk.total_space();
        let available = disk.available_space();
        let used_percent = if total > 0 {
            100.0 * (1.0 - (available as f64 / total as f64))
        } else {
            0.0
        };

        let used = total.saturating_sub(available);
        let sample = self.sample.clone();
        tokio::spawn(async move {
            let mut guard = sample.write().await;
            guard.cache_used_percent = used_percent;
            guard.cache_free_bytes = available;
            guard.cache_used_bytes = used;
            guard.cache_total_bytes = total;
        });
    }

    pub fn mark_sync_started(&self) {
        self.sync_in_progress.store(true, Ordering::SeqCst);
    }

    pub fn mark_sync_finished(&self) {
        self.sync_in_progress.store(false, Ordering::SeqCst);
    }

    /// Whether a job may begin now, given its file size (if known).
    /// Checks, in order: sync-in-progress block, bandwidth headroom,
    /// cache-disk headroom, and (if the file size is known and the
    /// config requires it) whether the transfer would itself exceed the
    /// cache limit.
    pub async fn can_start_job(&self, file_size_bytes: Option<u64>) -> CheckResult {
        if self.config.block_jobs_during_sync && self.sync_in_progress.load(Ordering::SeqCst) {
            return CheckResult::deny(reasons::SYNC_IN_PROGRESS);
        }

        let sample = self.sample.read().await.clone();

        if self.config.bandwidth_limit_mbps > 0.0
            && sample.bandwidth_usage_mbps >= self.config.bandwidth_limit_mbps
        {
            return CheckResult::deny(reasons::BANDWIDTH_LIMIT_REACHED);
        }

        if sample.cache_used_percent >= self.config.cache_max_percent {
            return CheckResult::deny(reasons::CACHE_DISK_USAGE_TOO_HIGH);
        }

        if self.config.require_filesize_check {
            if let Some(size) = file_size_bytes {
                if size > 0 && sample.cache_total_bytes > 0 {
                    let projected_usage = 100.0 * (sample.cache_used_bytes + size) as f64
                        / sample.cache_total_bytes as f64;
                    if projected_usage > self.config.cache_max_percent {
                        return CheckResult::deny(reasons::FILE_SIZE_EXCEEDS_CACHE);
                    }
                }
            }
        }

        CheckResult::allow()
    }

    /// Whether a sync may begin now. Syncs are single-slot; the caller
    /// (SyncService) is responsible for the queued/running check at the
    /// repository layer, this only covers resource headroom plus the
    /// in-flight flag this gatekeeper itself tracks.
    ///
    /// The cache threshold for a sync is 10 points stricter than for a
    /// regular job: a whole-library sync can pull in far more data than
    /// any single transfer, so it needs more headroom before it starts.
    pub async fn can_start_sync(&self) -> CheckResult {
        if self.sync_in_progress.load(Ordering::SeqCst) {
            return CheckResult::deny(reasons::SYNC_ALREADY_RUNNING);
        }

        let sample = self.sample.read().await.clone();

        if self.config.bandwidth_limit_mbps > 0.0
            && sample.bandwidth_usage_mbps >= self.config.bandwidth_limit_mbps
        {
            return CheckResult::deny(reasons::BANDWIDTH_LIMIT_REACHED);
        }

        let sync_cache_threshold = (self.config.cache_max_percent - 10.0).max(0.0);
        if sample.cache_used_percent >= sync_cache_threshold {
            return CheckResult::deny(reasons::INSUFFICIENT_CACHE_FOR_SYNC);
        }

        CheckResult::allow()
    }

    pub async fn resource_status(&self) -> ResourceStatus {
        let sample = self.sample.read().await.clone();
        ResourceStatus {
            bandwidth_usage_mbps: sample.bandwidth_usage_mbps,
            bandwidth_limit_mbps: self.config.bandwidth_limit_mbps,
            cache_used_percent: sample.cache_used_percent,
            cache_max_percent: self.config.cache_max_percent,
            cache_free_bytes: sample.cache_free_bytes,
            cache_total_bytes: sample.cache_total_bytes,
            sync_in_progress: self.sync_in_progress.load(Ordering::SeqCst),
        }
    }
}
