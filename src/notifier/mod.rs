use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::NotifierConfig;
use crate::models::{Job, SyncJob};

/// Severity of a system-wide alert, independent of any single job or
/// sync's outcome (e.g. the gatekeeper's cache disk nearing capacity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPriority {
    Info,
    Warning,
    Critical,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::Info => "info",
            AlertPriority::Warning => "warning",
            AlertPriority::Critical => "critical",
        }
    }
}

/// Best-effort outbound notifications for terminal job/sync outcomes
/// and system-level alerts. A notifier failure is always logged and
/// never propagated — notification delivery is not part of the
/// correctness contract of job execution.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_job_failed(&self, job: &Job, error: &str);
    async fn notify_job_completed(&self, job: &Job);
    async fn notify_sync_failed(&self, sync: &SyncJob, error: &str);
    async fn notify_sync_completed(&self, sync: &SyncJob);
    async fn notify_system_alert(&self, title: &str, message: &str, priority: AlertPriority);
}

/// Logs every notification instead of delivering it anywhere. Used when
/// no webhook is configured.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify_job_failed(&self, job: &Job, error: &str) {
        warn!(job_id = %job.id, error, "job failed");
    }

    async fn notify_job_completed(&self, job: &Job) {
        info!(job_id = %job.id, "job completed");
    }

    async fn notify_sync_failed(&self, sync: &SyncJob, error: &str) {
        warn!(sync_id = %sync.id, error, "sync failed");
    }

    async fn notify_sync_completed(&self, sync: &SyncJob) {
        info!(sync_id = %sync.id, "sync completed");
    }

    async fn notify_system_alert(&self, title: &str, message: &str, priority: AlertPriority) {
        warn!(title, message, ?priority, "system alert");
    }
}

/// Posts a JSON payload to a configured webhook URL. Falls back to
/// logging only if the webhook call itself fails.
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    async fn post(&self, payload: serde_json::Value) {
        if let Err(err) = self.client.post(&self.webhook_url).json(&payload).send().await {
            warn!(%err, "failed to deliver webhook notification");
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_job_failed(&self, job: &Job, error: &str) {
        self.post(serde_json::json!({
            "event": "job_failed",
            "job_id": job.id,
            "error": error,
        }))
        .await;
    }

    async fn notify_job_completed(&self, job: &Job) {
        self.post(serde_json::json!({
            "event": "job_completed",
            "job_id": job.id,
        }))
        .await;
    }

    async fn notify_sync_failed(&self, sync: &SyncJob, error: &str) {
        self.post(serde_json::json!({
            "event": "sync_failed",
            "sync_id": sync.id,
            "error": error,
        }))
        .await;
    }

    async fn notify_sync_completed(&self, sync: &SyncJob) {
        self.post(serde_json::json!({
            "event": "sync_completed",
            "sync_id": sync.id,
        }))
        .await;
    }

    async fn notify_system_alert(&self, title: &str, message: &str, priority: AlertPriority) {
        self.post(serde_json::json!({
            "event": "system_alert",
            "title": title,
            "message": message,
            "priority": priority.as_str(),
        }))
        .await;
    }
}

/// Build the configured notifier: a webhook poster when enabled with a
/// URL, otherwise a logging fallback.
pub fn build_notifier(config: &NotifierConfig) -> Box<dyn Notifier> {
    match (config.enabled, &config.webhook_url) {
        (true, Some(url)) => Box::new(WebhookNotifier::new(url.clone())),
        _ => Box::new(LoggingNotifier),
    }
}
