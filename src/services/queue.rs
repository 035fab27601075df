use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::work_item::CapturedImage;
use crate::services::trigger::{ProcessingTrigger, TriggerError};

const QUEUE_KEY: &str = "capture_verify:jobs";
const PROCESSING_KEY: &str = "capture_verify:processing";

/// Detection request serialized into Redis. The payload itself stays in the
/// work item row; the job only references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionJob {
    pub work_item_id: Uuid,
    pub content_type: String,
    pub byte_len: usize,
}

/// Redis-backed queue feeding the detection worker.
pub struct DetectionQueue {
    client: redis::Client,
}

impl DetectionQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Enqueue a detection job.
    pub async fn enqueue(&self, job: &DetectionJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    /// Dequeue a job, moving it onto the processing list until `complete`.
    pub async fn dequeue(&self) -> Result<Option<DetectionJob>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;

        match result {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Remove a finished job from the processing list.
    pub async fn complete(&self, job: &DetectionJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
        Ok(())
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Get the current queue depth (pending jobs).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }
}

#[async_trait]
impl ProcessingTrigger for DetectionQueue {
    async fn trigger(&self, work_item_id: Uuid, payload: &CapturedImage) -> Result<(), TriggerError> {
        let job = DetectionJob {
            work_item_id,
            content_type: payload.content_type.clone(),
            byte_len: payload.bytes.len(),
        };
        self.enqueue(&job).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
