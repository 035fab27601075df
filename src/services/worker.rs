//! Settling detection results onto work items.
//!
//! The worker binary owns the queue; this module decides what happens to a
//! job once detection has run, so a store outage never strands a job on the
//! processing list.

use uuid::Uuid;

use crate::services::store::WorkItemStore;

/// Attempts before a work item is marked `error`.
pub const MAX_ATTEMPTS: i32 = 3;

/// What the queue should do with a job after settling it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDisposition {
    /// Terminal transition written (or already present); drop the job.
    Completed { match_count: u32, applied: bool },
    /// Marked `error` after exhausting attempts; drop the job.
    Failed { attempts: i32 },
    /// Put the job back on the queue.
    Retry { attempts: Option<i32> },
}

impl JobDisposition {
    pub fn is_final(&self) -> bool {
        !matches!(self, JobDisposition::Retry { .. })
    }
}

/// Record a detection result for `work_item_id`.
///
/// Store failures are logged and turn into [`JobDisposition::Retry`].
pub async fn settle_detection(
    store: &dyn WorkItemStore,
    work_item_id: Uuid,
    detection: Result<u32, String>,
) -> JobDisposition {
    let reason = match detection {
        Ok(match_count) => {
            return match store.mark_processed(work_item_id, match_count).await {
                Ok(applied) => JobDisposition::Completed {
                    match_count,
                    applied,
                },
                Err(e) => {
                    tracing::error!(
                        work_item_id = %work_item_id,
                        error = %e,
                        "Failed to record detection result, re-queueing"
                    );
                    JobDisposition::Retry { attempts: None }
                }
            };
        }
        Err(reason) => reason,
    };

    let attempts = match store.record_attempt(work_item_id).await {
        Ok(attempts) => attempts,
        Err(e) => {
            tracing::error!(work_item_id = %work_item_id, error = %e, "Failed to record attempt");
            return JobDisposition::Retry { attempts: None };
        }
    };

    if attempts < MAX_ATTEMPTS {
        return JobDisposition::Retry {
            attempts: Some(attempts),
        };
    }

    let message = format!("Detection failed after {} attempts: {}", attempts, reason);
    match store.mark_failed(work_item_id, &message).await {
        Ok(_) => JobDisposition::Failed { attempts },
        Err(e) => {
            tracing::error!(work_item_id = %work_item_id, error = %e, "Failed to mark work item failed");
            JobDisposition::Retry {
                attempts: Some(attempts),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::work_item::{CapturedImage, WorkItemStatus};
    use crate::services::memory::{MemoryBus, MemoryWorkItemStore};
    use std::sync::Arc;

    fn store() -> MemoryWorkItemStore {
        MemoryWorkItemStore::new(Arc::new(MemoryBus::new()))
    }

    #[tokio::test]
    async fn test_result_completes_job() {
        let store = store();
        let id = store.create(&CapturedImage::jpeg(vec![1])).await.unwrap();

        let disposition = settle_detection(&store, id, Ok(2)).await;

        assert_eq!(
            disposition,
            JobDisposition::Completed {
                match_count: 2,
                applied: true
            }
        );
        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, WorkItemStatus::Processed);
    }

    #[tokio::test]
    async fn test_failures_retry_until_exhausted() {
        let store = store();
        let id = store.create(&CapturedImage::jpeg(vec![1])).await.unwrap();

        for attempt in 1..MAX_ATTEMPTS {
            let disposition = settle_detection(&store, id, Err("timeout".to_string())).await;
            assert_eq!(disposition, JobDisposition::Retry { attempts: Some(attempt) });
        }

        let disposition = settle_detection(&store, id, Err("timeout".to_string())).await;
        assert_eq!(disposition, JobDisposition::Failed { attempts: MAX_ATTEMPTS });
        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, WorkItemStatus::Error);
    }

    #[tokio::test]
    async fn test_store_failure_requeues_instead_of_stranding() {
        let store = store();
        // Unknown id: every store write fails.
        let disposition = settle_detection(&store, Uuid::new_v4(), Ok(1)).await;

        assert_eq!(disposition, JobDisposition::Retry { attempts: None });
        assert!(!disposition.is_final());
    }
}
