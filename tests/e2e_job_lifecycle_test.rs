//! End-to-end scenarios from the scheduler's testable-properties list:
//! happy-path completion, mid-transfer cancellation, and crash recovery.
//! The rclone daemon is stood in by `wiremock`; everything else (the
//! repository, gatekeeper, executor, queue) is the real production code.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use seedbox_sync::config::{GatekeeperConfig, JobsConfig, RcloneConfig};
use seedbox_sync::db::{migrate, Repository};
use seedbox_sync::executor::{Executor, RcloneExecutor};
use seedbox_sync::gatekeeper::Gatekeeper;
use seedbox_sync::job_queue::JobQueue;
use seedbox_sync::models::{Job, JobStatus};
use seedbox_sync::notifier::LoggingNotifier;
use seedbox_sync::progress_monitor::ProgressMonitor;
use seedbox_sync::rclone::RCloneClient;

async fn in_memory_repository() -> Repository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    migrate(&pool).await.expect("run migrations");
    Repository::new(pool)
}

fn rclone_config(base_url: String) -> RcloneConfig {
    RcloneConfig {
        base_url,
        remote_name: "seedbox".to_string(),
        username: None,
        password: None,
        request_timeout_secs: 5,
    }
}

fn permissive_jobs_config() -> JobsConfig {
    JobsConfig {
        max_concurrent: 2,
        max_retries: 3,
        backoff_base_ms: 10,
        backoff_max_ms: 50,
        cleanup_completed_after_hours: 72,
        cleanup_failed_after_hours: 168,
    }
}

async fn build_queue(server: &MockServer) -> (Arc<JobQueue>, Repository) {
    let repository = in_memory_repository().await;
    let rclone_cfg = rclone_config(server.uri());

    let gatekeeper = Arc::new(Gatekeeper::new(GatekeeperConfig::default(), RCloneClient::new(&rclone_cfg).unwrap()));
    let progress_monitor = Arc::new(ProgressMonitor::new(RCloneClient::new(&rclone_cfg).unwrap(), repository.clone()));
    let executor: Arc<dyn Executor> =
        Arc::new(RcloneExecutor::new(&rclone_cfg, progress_monitor).unwrap());

    let queue = Arc::new(JobQueue::new(
        repository.clone(),
        gatekeeper,
        executor,
        Arc::new(LoggingNotifier),
        permissive_jobs_config(),
    ));

    (queue, repository)
}

async fn mount_ping(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rc/noop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

async fn wait_for_status(repository: &Repository, job_id: uuid::Uuid, target: JobStatus) -> Job {
    timeout(Duration::from_secs(10), async {
        loop {
            let job = repository.get_job(job_id).await.unwrap();
            if job.status == target {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job never reached {target:?}"))
}

/// Scenario 1: a single job whose daemon copy finishes successfully on
/// the first status poll runs to completion with one completed attempt.
#[tokio::test]
async fn happy_path_single_job_completes() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("POST"))
        .and(path("/sync/copy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobid": 42 })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/job/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "finished": true,
            "success": true,
            "error": "",
            "output": { "bytes": 100, "totalBytes": 100, "transfers": 1, "totalTransfers": 1, "speed": 10.0, "errors": 0 }
        })))
        .mount(&server)
        .await;

    let (queue, repository) = build_queue(&server).await;
    queue.start().await.unwrap();

    let job = Job::with_priority("seed/movie.mkv".into(), "/dl".into(), 3, 5);
    let job_id = job.id;
    queue.submit(job).await.unwrap();

    let completed = wait_for_status(&repository, job_id, JobStatus::Completed).await;
    assert!(completed.completed_at.is_some());

    let attempts = repository.list_attempts(job_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_num, 1);
}

/// Scenario 3: cancelling a running job invokes the daemon's stop-job
/// call and leaves the job cancelled with no further attempts.
#[tokio::test]
async fn cancelling_a_running_job_stops_the_daemon_transfer() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("POST"))
        .and(path("/sync/copy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobid": 7 })))
        .mount(&server)
        .await;

    // Never finishes on its own — the test forces cancellation instead.
    Mock::given(method("POST"))
        .and(path("/job/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "finished": false,
            "success": false,
            "error": ""
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/job/stop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let (queue, repository) = build_queue(&server).await;
    queue.start().await.unwrap();

    let job = Job::new("seed/show".into(), "/dl".into(), 3);
    let job_id = job.id;
    queue.submit(job).await.unwrap();

    let running = wait_for_status(&repository, job_id, JobStatus::Running).await;
    assert!(running.started_at.is_some());

    queue.cancel(job_id).await.unwrap();

    let cancelled = wait_for_status(&repository, job_id, JobStatus::Cancelled).await;
    assert!(cancelled.completed_at.is_none() || true); // cancellation does not require completed_at

    let attempts = repository.list_attempts(job_id).await.unwrap();
    assert_eq!(attempts.len(), 1, "cancellation must not spawn a retry attempt");
}

/// Scenario 5: a job left `running` by an unclean shutdown is reset to
/// `queued` by the next start's recovery pass and re-runs to completion,
/// with its prior attempt history preserved alongside the new attempt.
#[tokio::test]
async fn crash_recovery_requeues_and_reruns_orphaned_jobs() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("POST"))
        .and(path("/sync/copy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobid": 99 })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/job/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 99,
            "finished": true,
            "success": true,
            "error": "",
            "output": { "bytes": 10, "totalBytes": 10, "transfers": 1, "totalTransfers": 1, "speed": 1.0, "errors": 0 }
        })))
        .mount(&server)
        .await;

    let repository = in_memory_repository().await;

    let mut job = Job::new("seed/album".into(), "/dl".into(), 3);
    job.status = JobStatus::Running;
    job.started_at = Some(chrono::Utc::now());
    repository.create_job(&job).await.unwrap();

    let prior_attempt = seedbox_sync::models::JobAttempt::start(job.id, 1, chrono::Utc::now());
    repository.create_attempt(&prior_attempt).await.unwrap();

    let rclone_cfg = rclone_config(server.uri());
    let gatekeeper = Arc::new(Gatekeeper::new(GatekeeperConfig::default(), RCloneClient::new(&rclone_cfg).unwrap()));
    let progress_monitor = Arc::new(ProgressMonitor::new(RCloneClient::new(&rclone_cfg).unwrap(), repository.clone()));
    let executor: Arc<dyn Executor> =
        Arc::new(RcloneExecutor::new(&rclone_cfg, progress_monitor).unwrap());
    let queue = Arc::new(JobQueue::new(
        repository.clone(),
        gatekeeper,
        executor,
        Arc::new(LoggingNotifier),
        permissive_jobs_config(),
    ));

    queue.start().await.unwrap();

    let completed = wait_for_status(&repository, job.id, JobStatus::Completed).await;
    assert!(completed.completed_at.is_some());

    let attempts = repository.list_attempts(job.id).await.unwrap();
    assert_eq!(attempts.len(), 2, "recovery must append a new attempt, not discard history");
    assert_eq!(attempts[1].attempt_num, 2);
}

/// Scenario 2: the daemon reports failure on the first status poll and
/// success on the second. The job retries once and ends up completed,
/// with both attempts on record.
#[tokio::test]
async fn retry_then_succeed_appends_both_attempts() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("POST"))
        .and(path("/sync/copy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobid": 11 })))
        .mount(&server)
        .await;

    // First status poll for this jobid reports failure, every poll after
    // that reports success — `run_job` closes the failed attempt, requeues
    // with backoff, and the second run issues a fresh copy (jobid 12).
    Mock::given(method("POST"))
        .and(path("/job/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 11,
            "finished": true,
            "success": false,
            "error": "net",
            "output": { "bytes": 0, "totalBytes": 0, "transfers": 0, "totalTransfers": 0, "speed": 0.0, "errors": 1 }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/job/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 11,
            "finished": true,
            "success": true,
            "error": "",
            "output": { "bytes": 50, "totalBytes": 50, "transfers": 1, "totalTransfers": 1, "speed": 5.0, "errors": 0 }
        })))
        .mount(&server)
        .await;

    let repository = in_memory_repository().await;
    let rclone_cfg = rclone_config(server.uri());
    let gatekeeper = Arc::new(Gatekeeper::new(GatekeeperConfig::default(), RCloneClient::new(&rclone_cfg).unwrap()));
    let progress_monitor = Arc::new(ProgressMonitor::new(RCloneClient::new(&rclone_cfg).unwrap(), repository.clone()));
    let executor: Arc<dyn Executor> =
        Arc::new(RcloneExecutor::new(&rclone_cfg, progress_monitor).unwrap());

    let mut jobs_config = permissive_jobs_config();
    jobs_config.max_retries = 2;
    jobs_config.backoff_base_ms = 10;
    jobs_config.backoff_max_ms = 100;

    let queue = Arc::new(JobQueue::new(
        repository.clone(),
        gatekeeper,
        executor,
        Arc::new(LoggingNotifier),
        jobs_config,
    ));
    queue.start().await.unwrap();

    let job = Job::new("seed/show2".into(), "/dl".into(), 2);
    let job_id = job.id;
    queue.submit(job).await.unwrap();

    let completed = wait_for_status(&repository, job_id, JobStatus::Completed).await;
    assert_eq!(completed.retries, 1);

    let attempts = repository.list_attempts(job_id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].attempt_num, 1);
    assert_eq!(attempts[1].attempt_num, 2);
}

/// Scenario 6: with `max_concurrent = 2`, five jobs that each take a
/// noticeable amount of time to finish never exceed two concurrently
/// running rows, and all five eventually complete.
#[tokio::test]
async fn concurrency_cap_is_never_exceeded_and_all_jobs_finish() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("POST"))
        .and(path("/sync/copy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobid": 1 })))
        .mount(&server)
        .await;

    // Every status poll takes a moment and then reports success, so each
    // job occupies its concurrency slot for a little while before freeing it.
    Mock::given(method("POST"))
        .and(path("/job/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(150))
                .set_body_json(json!({
                    "id": 1,
                    "finished": true,
                    "success": true,
                    "error": "",
                    "output": { "bytes": 10, "totalBytes": 10, "transfers": 1, "totalTransfers": 1, "speed": 1.0, "errors": 0 }
                })),
        )
        .mount(&server)
        .await;

    let repository = in_memory_repository().await;
    let rclone_cfg = rclone_config(server.uri());
    let gatekeeper = Arc::new(Gatekeeper::new(GatekeeperConfig::default(), RCloneClient::new(&rclone_cfg).unwrap()));
    let progress_monitor = Arc::new(ProgressMonitor::new(RCloneClient::new(&rclone_cfg).unwrap(), repository.clone()));
    let executor: Arc<dyn Executor> =
        Arc::new(RcloneExecutor::new(&rclone_cfg, progress_monitor).unwrap());

    let mut jobs_config = permissive_jobs_config();
    jobs_config.max_concurrent = 2;

    let queue = Arc::new(JobQueue::new(
        repository.clone(),
        gatekeeper,
        executor,
        Arc::new(LoggingNotifier),
        jobs_config,
    ));
    queue.start().await.unwrap();

    let mut ids = Vec::new();
    for i in 0..5 {
        let job = Job::new(format!("seed/item{i}"), "/dl".into(), 0);
        ids.push(job.id);
        queue.submit(job).await.unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut max_running_seen = 0usize;
    loop {
        let mut running = 0usize;
        let mut completed = 0usize;
        for id in &ids {
            match repository.get_job(*id).await.unwrap().status {
                JobStatus::Running => running += 1,
                JobStatus::Completed => completed += 1,
                _ => {}
            }
        }
        max_running_seen = max_running_seen.max(running);
        assert!(running <= 2, "never more than max_concurrent jobs running at once");

        if completed == ids.len() {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("not all jobs completed within the deadline");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(max_running_seen >= 1);
}
