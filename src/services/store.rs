use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::queries;
use crate::models::work_item::{CapturedImage, VerificationWorkItem, WorkItemStatus};
use crate::services::encryption::{EncryptionError, PayloadCipher};

/// Persistence for verification work items.
///
/// The verification path only ever calls `create`. The remaining operations
/// belong to the detection worker, which performs the single terminal
/// transition; `mark_*` return `false` when the item was no longer pending.
#[async_trait]
pub trait WorkItemStore: Send + Sync {
    async fn create(&self, payload: &CapturedImage) -> Result<Uuid, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<VerificationWorkItem>, StoreError>;

    async fn mark_processed(&self, id: Uuid, match_count: u32) -> Result<bool, StoreError>;

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool, StoreError>;

    /// Count a processing attempt, returning the new total.
    async fn record_attempt(&self, id: Uuid) -> Result<i32, StoreError>;
}

/// Postgres-backed store; payloads are sealed before they reach the table.
pub struct PgWorkItemStore {
    pool: PgPool,
    cipher: Arc<PayloadCipher>,
}

impl PgWorkItemStore {
    pub fn new(pool: PgPool, cipher: Arc<PayloadCipher>) -> Self {
        Self { pool, cipher }
    }
}

#[async_trait]
impl WorkItemStore for PgWorkItemStore {
    async fn create(&self, payload: &CapturedImage) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let sealed = self.cipher.seal(id, &payload.bytes)?;
        queries::insert_work_item(&self.pool, id, &sealed, &payload.content_type).await?;
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<VerificationWorkItem>, StoreError> {
        let Some(row) = queries::get_work_item(&self.pool, id).await? else {
            return Ok(None);
        };

        let status = row
            .status
            .parse::<WorkItemStatus>()
            .map_err(|_| StoreError::UnknownStatus(row.status.clone()))?;
        let bytes = self.cipher.open(id, &row.payload)?;

        Ok(Some(VerificationWorkItem {
            id: row.id,
            payload: CapturedImage {
                bytes,
                content_type: row.content_type,
            },
            status,
            match_count: row.match_count.and_then(|c| u32::try_from(c).ok()),
            error: row.error,
            attempts: row.attempts,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    async fn mark_processed(&self, id: Uuid, match_count: u32) -> Result<bool, StoreError> {
        let count = i32::try_from(match_count).unwrap_or(i32::MAX);
        Ok(queries::finish_work_item(&self.pool, id, WorkItemStatus::Processed, Some(count), None).await?)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool, StoreError> {
        Ok(queries::finish_work_item(&self.pool, id, WorkItemStatus::Error, None, Some(reason)).await?)
    }

    async fn record_attempt(&self, id: Uuid) -> Result<i32, StoreError> {
        Ok(queries::increment_attempts(&self.pool, id).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Payload encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Unknown work item status: {0}")]
    UnknownStatus(String),

    #[error("Work item not found: {0}")]
    NotFound(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
