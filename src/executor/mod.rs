use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RcloneConfig;
use crate::error::{AppError, AppResult};
use crate::models::Job;
use crate::progress_monitor::ProgressMonitor;
use crate::rclone::{build_fs_pair, CopyRequest, RCloneClient};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Runs a single job to completion (or failure, or cancellation) against
/// a transfer backend. The only production implementation drives the
/// rclone daemon; tests substitute a mock to exercise the scheduler
/// without a real daemon.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> AppResult<()>;
}

pub struct RcloneExecutor {
    client: RCloneClient,
    remote_name: String,
    progress_monitor: Arc<ProgressMonitor>,
    default_tuning: crate::models::ResolvedTuning,
}

impl RcloneExecutor {
    pub fn new(config: &RcloneConfig, progress_monitor: Arc<ProgressMonitor>) -> AppResult<Self> {
        Ok(Self {
            client: RCloneClient::new(config)?,
            remote_name: config.remote_name.clone(),
            progress_monitor,
            default_tuning: crate::models::ResolvedTuning::default(),
        })
    }
}

#[async_trait]
impl Executor for RcloneExecutor {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> AppResult<()> {
        self.client.ping().await?;

        let fs_pair = build_fs_pair(&self.remote_name, &job.source_path, &job.dest_path);
        let tuning = job.tuning.merged_with(&self.default_tuning);

        let handle = self
            .client
            .start_copy(&CopyRequest {
                src_fs: fs_pair.src_fs,
                dst_fs: fs_pair.dst_fs,
                transfers: tuning.transfers,
                checkers: tuning.checkers,
                bandwidth_limit_mbps: tuning.bandwidth_limit_mbps,
                retries: tuning.retries,
                order: tuning.order,
                buffer_size_mb: tuning.buffer_size_mb,
                ignore_existing: tuning.ignore_existing,
                include_rules: fs_pair.include_rules,
            })
            .await?;

        self.progress_monitor.register(job.id, handle.jobid).await;

        let result = self.poll_until_done(handle.jobid, cancel).await;

        self.progress_monitor.unregister(job.id).await;
        result
    }
}

impl RcloneExecutor {
    async fn poll_until_done(&self, rclone_job_id: i64, cancel: CancellationToken) -> AppResult<()> {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(err) = self.client.stop_job(rclone_job_id).await {
                        warn!(%err, rclone_job_id, "failed to signal daemon job stop on cancel");
                    }
                    return Err(AppError::Cancelled);
                }
                _ = ticker.tick() => {
                    let status = match self.client.job_status(rclone_job_id).await {
                        Ok(status) => status,
                        Err(err) => {
                            warn!(%err, rclone_job_id, "transient error polling job status, retrying next tick");
                            continue;
                        }
                    };
                    if status.finished {
                        if status.success {
                            info!(rclone_job_id, "transfer completed");
                            return Ok(());
                        }
                        return Err(AppError::TransferFailed(status.error));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub TestExecutor {}

        #[async_trait]
        impl Executor for TestExecutor {
            async fn execute(&self, job: &Job, cancel: CancellationToken) -> AppResult<()>;
        }
    }

    #[tokio::test]
    async fn mock_executor_reports_success() {
        let mut mock = MockTestExecutor::new();
        mock.expect_execute().returning(|_, _| Ok(()));

        let job = Job::new("src".into(), "dst".into(), 3);
        let result = mock.execute(&job, CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn mock_executor_reports_cancellation() {
        let mut mock = MockTestExecutor::new();
        mock.expect_execute().returning(|_, _| Err(AppError::Cancelled));

        let job = Job::new("src".into(), "dst".into(), 3);
        let result = mock.execute(&job, CancellationToken::new()).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
