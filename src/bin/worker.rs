use capture_verify::{
    config::AppConfig,
    db::{self, queries},
    services::{
        detector::WorkersAiDetector,
        encryption::PayloadCipher,
        queue::{DetectionJob, DetectionQueue},
        store::{PgWorkItemStore, WorkItemStore},
        worker::{settle_detection, JobDisposition},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 250;

struct Worker {
    store: PgWorkItemStore,
    queue: DetectionQueue,
    detector: WorkersAiDetector,
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting detection worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    metrics::describe_gauge!(
        "detection_queue_depth",
        "Detection jobs waiting in the queue"
    );
    metrics::describe_counter!("detection_jobs_completed", "Work items marked processed");
    metrics::describe_counter!("detection_jobs_failed", "Work items marked error");
    metrics::describe_counter!("detection_jobs_requeued", "Jobs returned to the queue");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let cipher = PayloadCipher::new(&config.encryption_key).expect("Failed to initialize encryption");
    let queue = DetectionQueue::new(&config.redis_url).expect("Failed to initialize detection queue");
    let detector = WorkersAiDetector::new(
        config.cf_account_id.as_deref().unwrap_or_default(),
        config.cf_api_token.as_deref().unwrap_or_default(),
        &config.detection_label,
        config.detection_min_score,
    )
    .expect("Failed to initialize Workers AI detector");

    match queries::count_pending(&db_pool).await {
        Ok(pending) => tracing::info!(pending, "Worker ready, starting detection loop"),
        Err(e) => tracing::warn!(error = %e, "Could not count pending work items"),
    }

    let worker = Worker {
        store: PgWorkItemStore::new(db_pool, Arc::new(cipher)),
        queue,
        detector,
    };

    loop {
        match process_next_job(&worker).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }

        match worker.queue.queue_depth().await {
            Ok(depth) => metrics::gauge!("detection_queue_depth").set(depth as f64),
            Err(e) => tracing::warn!(error = %e, "Failed to read queue depth"),
        }
    }
}

/// Process the next job from the queue.
/// Returns Ok(true) if a job was handled, Ok(false) if no job available.
async fn process_next_job(worker: &Worker) -> Result<bool, Box<dyn std::error::Error>> {
    let job = match worker.queue.dequeue().await? {
        Some(j) => j,
        None => return Ok(false),
    };

    tracing::info!(
        work_item_id = %job.work_item_id,
        payload_bytes = job.byte_len,
        "Processing detection job"
    );

    let detection = detect(worker, &job).await.map_err(|e| {
        tracing::error!(work_item_id = %job.work_item_id, error = %e, "Detection failed");
        e.to_string()
    });

    let disposition = settle_detection(&worker.store, job.work_item_id, detection).await;
    if !disposition.is_final() {
        worker.queue.enqueue(&job).await?;
    }
    worker.queue.complete(&job).await?;

    match disposition {
        JobDisposition::Completed { match_count, applied } => {
            metrics::counter!("detection_jobs_completed").increment(1);
            tracing::info!(
                work_item_id = %job.work_item_id,
                match_count,
                applied,
                "Detection complete"
            );
        }
        JobDisposition::Failed { attempts } => {
            metrics::counter!("detection_jobs_failed").increment(1);
            tracing::warn!(
                work_item_id = %job.work_item_id,
                attempts,
                "Job failed after max retries"
            );
        }
        JobDisposition::Retry { attempts } => {
            metrics::counter!("detection_jobs_requeued").increment(1);
            tracing::info!(
                work_item_id = %job.work_item_id,
                attempts = ?attempts,
                "Job re-queued for retry"
            );
        }
    }

    Ok(true)
}

/// Load the work item and count detections on its payload.
async fn detect(worker: &Worker, job: &DetectionJob) -> Result<u32, Box<dyn std::error::Error>> {
    let item = worker
        .store
        .get(job.work_item_id)
        .await?
        .ok_or_else(|| format!("work item {} not found", job.work_item_id))?;

    if item.status.is_terminal() {
        tracing::debug!(work_item_id = %item.id, status = %item.status, "Work item already terminal");
        return Ok(item.match_count.unwrap_or(0));
    }

    let start = std::time::Instant::now();
    let match_count = worker.detector.count_matches(&item.payload.bytes).await?;

    tracing::debug!(
        work_item_id = %item.id,
        detect_duration_ms = start.elapsed().as_millis() as u64,
        match_count,
        "Detector responded"
    );

    Ok(match_count)
}
