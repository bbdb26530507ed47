use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::RcloneConfig;
use crate::error::AppError;

/// Typed JSON client for the rclone remote-control (`rc`) HTTP API.
/// Every call is a POST against `base_url` with a JSON body, mirroring
/// rclone's own `rc` wire protocol rather than a REST resource model.
#[derive(Clone)]
pub struct RCloneClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyRequest {
    pub src_fs: String,
    pub dst_fs: String,
    pub transfers: u32,
    pub checkers: u32,
    pub bandwidth_limit_mbps: f64,
    pub retries: u32,
    pub order: String,
    pub buffer_size_mb: u32,
    pub ignore_existing: bool,
    /// Glob-style include rules scoping the copy to one top-level item
    /// within the source fs. Empty means "copy everything under src_fs".
    pub include_rules: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsyncJobHandle {
    pub jobid: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobOutput {
    #[serde(default)]
    pub bytes: u64,
    #[serde(default, rename = "totalBytes")]
    pub total_bytes: u64,
    #[serde(default)]
    pub transfers: u64,
    #[serde(default, rename = "totalTransfers")]
    pub total_transfers: u64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub errors: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RcloneJobStatus {
    pub id: i64,
    pub finished: bool,
    pub success: bool,
    pub error: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub output: JobOutput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobList {
    #[serde(default)]
    pub jobids: Vec<i64>,
}

/// One entry in `core/stats`'s `transferring` array. `group` carries the
/// `job/<id>` tag the scheduler stamps onto each job's stats group,
/// which is how a single global poll can be attributed back to the job
/// that owns it.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferStat {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "speedAvg")]
    pub speed_avg: f64,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub eta: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreStats {
    pub bytes: u64,
    #[serde(rename = "totalBytes")]
    pub total_bytes: u64,
    pub speed: f64,
    pub eta: Option<i64>,
    pub transfers: u64,
    #[serde(rename = "totalTransfers")]
    pub total_transfers: u64,
    pub errors: u64,
    #[serde(default)]
    pub transferring: Vec<TransferStat>,
}

impl RCloneClient {
    pub fn new(config: &RcloneConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::ConfigInvalid(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, AppError> {
        let mut req = self.http.post(self.url(path)).json(body);
        if let Some(user) = &self.username {
            req = req.basic_auth(user, self.password.as_ref());
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::DaemonUnreachable(format!(
                "rclone rc call {path} returned {status}: {body}"
            )));
        }

        resp.json::<R>().await.map_err(AppError::from)
    }

    /// `rc/noop` — cheapest possible reachability check.
    pub async fn ping(&self) -> Result<(), AppError> {
        let _: serde_json::Value = self.post_json("rc/noop", &json!({})).await?;
        Ok(())
    }

    /// Start an async `sync/copy` job. rclone's `_async` flag makes the
    /// rc call return immediately with a job id instead of blocking
    /// until the transfer completes. When `include_rules` is non-empty
    /// a `_filter` block is attached scoping the copy to those globs,
    /// rather than the entire `src_fs`.
    pub async fn start_copy(&self, req: &CopyRequest) -> Result<AsyncJobHandle, AppError> {
        let mut body = json!({
            "srcFs": req.src_fs,
            "dstFs": req.dst_fs,
            "_async": true,
            "_config": {
                "Transfers": req.transfers,
                "Checkers": req.checkers,
                "BwLimit": format!("{}M", req.bandwidth_limit_mbps),
                "LowLevelRetries": req.retries,
                "OrderBy": req.order,
                "BufferSize": format!("{}M", req.buffer_size_mb),
                "IgnoreExisting": req.ignore_existing,
            },
        });

        if !req.include_rules.is_empty() {
            body["_filter"] = json!({ "IncludeRule": req.include_rules });
        }

        self.post_json("sync/copy", &body).await
    }

    pub async fn job_status(&self, job_id: i64) -> Result<RcloneJobStatus, AppError> {
        self.post_json("job/status", &json!({ "jobid": job_id })).await
    }

    pub async fn stop_job(&self, job_id: i64) -> Result<(), AppError> {
        let _: serde_json::Value = self.post_json("job/stop", &json!({ "jobid": job_id })).await?;
        Ok(())
    }

    /// `job/list` — the set of job ids the daemon still knows about.
    /// Used during crash recovery to tell whether a job id persisted
    /// from before a restart is still tracked by the (also-restarted)
    /// rclone daemon.
    pub async fn list_jobs(&self) -> Result<Vec<i64>, AppError> {
        let list: JobList = self.post_json("job/list", &json!({})).await?;
        Ok(list.jobids)
    }

    /// Fetch `core/stats` for a stats group (`job/<id>`), or the global
    /// group when `group` is `None`. The progress monitor calls this
    /// with `None` once per tick and reads `transferring` rather than
    /// calling this once per job, which would be one rc round trip per
    /// job per tick.
    pub async fn core_stats(&self, group: Option<&str>) -> Result<CoreStats, AppError> {
        let body = match group {
            Some(g) => json!({ "group": g }),
            None => json!({}),
        };
        self.post_json("core/stats", &body).await
    }
}
