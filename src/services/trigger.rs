use async_trait::async_trait;
use uuid::Uuid;

use crate::models::work_item::CapturedImage;
use crate::services::queue::QueueError;

/// One-way request asking the detection worker to start on a work item.
///
/// Implementations return once the request has been accepted; they never
/// wait for processing to finish.
#[async_trait]
pub trait ProcessingTrigger: Send + Sync {
    async fn trigger(&self, work_item_id: Uuid, payload: &CapturedImage) -> Result<(), TriggerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Detection queue rejected job: {0}")]
    Queue(#[from] QueueError),

    #[error("Trigger unavailable: {0}")]
    Unavailable(String),
}
