use std::sync::Arc;

use crate::models::work_item::{CapturedImage, WorkItemHandle};
use crate::services::store::{StoreError, WorkItemStore};
use crate::services::trigger::{ProcessingTrigger, TriggerError};

/// Turns a captured image into a persisted work item and asks the detection
/// worker to begin on it.
pub struct Dispatcher {
    store: Arc<dyn WorkItemStore>,
    trigger: Arc<dyn ProcessingTrigger>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn WorkItemStore>, trigger: Arc<dyn ProcessingTrigger>) -> Self {
        Self { store, trigger }
    }

    /// Persist a pending work item, then fire the processing trigger.
    ///
    /// Exactly one row and one trigger call per successful submission. A
    /// trigger failure leaves the pending row behind; nothing will ever
    /// correlate on it.
    pub async fn submit(&self, image: &CapturedImage) -> Result<WorkItemHandle, DispatchError> {
        if image.is_empty() {
            return Err(DispatchError::EmptyPayload);
        }

        let id = match self.store.create(image).await {
            Ok(id) => id,
            Err(e) => {
                metrics::counter!("work_items_dispatch_failed_total", "stage" => "persist").increment(1);
                tracing::warn!(error = %e, "Failed to persist work item");
                return Err(DispatchError::DispatchFailed(e));
            }
        };

        if let Err(e) = self.trigger.trigger(id, image).await {
            metrics::counter!("work_items_dispatch_failed_total", "stage" => "trigger").increment(1);
            tracing::warn!(work_item_id = %id, error = %e, "Failed to trigger detection");
            return Err(DispatchError::TriggerFailed(e));
        }

        metrics::counter!("work_items_dispatched_total").increment(1);
        tracing::info!(
            work_item_id = %id,
            payload_bytes = image.bytes.len(),
            "Work item dispatched"
        );

        Ok(WorkItemHandle { id })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Refusing to dispatch an empty payload")]
    EmptyPayload,

    #[error("Failed to persist work item: {0}")]
    DispatchFailed(#[source] StoreError),

    #[error("Failed to trigger processing: {0}")]
    TriggerFailed(#[source] TriggerError),
}
