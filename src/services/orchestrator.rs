use std::sync::Arc;
use std::time::Duration;

use crate::models::outcome::{Outcome, OutcomeKind};
use crate::models::work_item::CapturedImage;
use crate::services::capture::{CaptureAdapter, CaptureError};
use crate::services::correlator::Correlator;
use crate::services::dispatcher::{DispatchError, Dispatcher};
use crate::services::store::StoreError;
use crate::services::trigger::TriggerError;

/// Capture, dispatch and correlate one verification.
pub struct VerificationOrchestrator<C> {
    capture: C,
    dispatcher: Arc<Dispatcher>,
    correlator: Arc<Correlator>,
    bound: Duration,
}

impl<C: CaptureAdapter> VerificationOrchestrator<C> {
    pub fn new(
        capture: C,
        dispatcher: Arc<Dispatcher>,
        correlator: Arc<Correlator>,
        bound: Duration,
    ) -> Self {
        Self {
            capture,
            dispatcher,
            correlator,
            bound,
        }
    }

    /// Returns the captured bytes when verification matched, `None` otherwise.
    ///
    /// Every failure collapses to `None`; callers retry from capture.
    pub async fn capture_and_verify(&self) -> Option<Vec<u8>> {
        self.capture_and_verify_detailed()
            .await
            .ok()
            .map(|image| image.bytes)
    }

    /// Same flow as [`capture_and_verify`](Self::capture_and_verify) but keeps
    /// the reason a capture was not usable.
    pub async fn capture_and_verify_detailed(&self) -> Result<CapturedImage, VerifyError> {
        let result = self.run().await;

        let label = match &result {
            Ok(_) => OutcomeKind::Matched.to_string(),
            Err(e) => e.label().to_string(),
        };
        metrics::counter!("capture_verifications_total", "outcome" => label.clone()).increment(1);

        match &result {
            Ok(image) => tracing::info!(bytes = image.bytes.len(), "Capture verified"),
            Err(e) => tracing::info!(outcome = %label, reason = %e, "Capture not usable"),
        }

        result
    }

    async fn run(&self) -> Result<CapturedImage, VerifyError> {
        let image = self.capture.capture().await?;
        if image.is_empty() {
            return Err(VerifyError::CaptureFailed(CaptureError::Empty));
        }

        let handle = self.dispatcher.submit(&image).await?;

        let outcome = self
            .correlator
            .await_outcome(handle.id, &image, self.bound)
            .await;
        tracing::debug!(work_item_id = %handle.id, outcome = %outcome.kind(), "Correlation resolved");

        match outcome {
            Outcome::Matched { payload, .. } => Ok(payload),
            Outcome::NotMatched { match_count } => Err(VerifyError::NotMatched { match_count }),
            Outcome::Errored => Err(VerifyError::Errored),
            Outcome::TimedOut => Err(VerifyError::TimedOut),
        }
    }
}

/// Why a capture was not usable. All variants are recoverable.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Capture failed: {0}")]
    CaptureFailed(#[from] CaptureError),

    #[error("Dispatch failed: {0}")]
    DispatchFailed(#[source] StoreError),

    #[error("Trigger failed: {0}")]
    TriggerFailed(#[source] TriggerError),

    #[error("Detection worker reported an error")]
    Errored,

    #[error("No acceptable match ({match_count} detections)")]
    NotMatched { match_count: u32 },

    #[error("No result within the verification window")]
    TimedOut,
}

impl VerifyError {
    pub fn label(&self) -> &'static str {
        match self {
            VerifyError::CaptureFailed(_) => "capture_failed",
            VerifyError::DispatchFailed(_) => "dispatch_failed",
            VerifyError::TriggerFailed(_) => "trigger_failed",
            VerifyError::Errored => "errored",
            VerifyError::NotMatched { .. } => "not_matched",
            VerifyError::TimedOut => "timed_out",
        }
    }
}

impl From<DispatchError> for VerifyError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::EmptyPayload => VerifyError::CaptureFailed(CaptureError::Empty),
            DispatchError::DispatchFailed(e) => VerifyError::DispatchFailed(e),
            DispatchError::TriggerFailed(e) => VerifyError::TriggerFailed(e),
        }
    }
}
