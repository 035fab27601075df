//! End-to-end verification flows over in-memory collaborators.

mod helpers;

use capture_verify::models::work_item::WorkItemStatus;
use capture_verify::services::correlator::Correlator;
use capture_verify::services::dispatcher::Dispatcher;
use capture_verify::services::memory::{MemoryBus, MemoryWorkItemStore};
use capture_verify::services::orchestrator::{VerificationOrchestrator, VerifyError};
use capture_verify::services::store::WorkItemStore;
use futures::future::join_all;
use helpers::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_match_returns_captured_bytes() {
    let h = Harness::new(WorkerBehavior::Processed {
        match_count: 1,
        after: Duration::from_millis(200),
    });
    let image = sample_image(1);

    let start = Instant::now();
    let verified = h.orchestrator(FixedCapture::ok(image.clone())).capture_and_verify().await;

    assert_eq!(verified, Some(image.bytes));
    assert!(start.elapsed() < Duration::from_millis(300));
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.worker.trigger_count(), 1);
    h.assert_subscriptions_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_no_match_returns_none() {
    let h = Harness::new(WorkerBehavior::Processed {
        match_count: 0,
        after: Duration::from_millis(200),
    });

    let verified = h.orchestrator(FixedCapture::ok(sample_image(2))).capture_and_verify().await;

    assert_eq!(verified, None);
    h.assert_subscriptions_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_silence_returns_none_at_bound() {
    let h = Harness::new(WorkerBehavior::Silent);

    let start = Instant::now();
    let verified = h.orchestrator(FixedCapture::ok(sample_image(3))).capture_and_verify().await;
    let elapsed = start.elapsed();

    assert_eq!(verified, None);
    assert!(elapsed >= BOUND, "returned early after {:?}", elapsed);
    assert!(elapsed < BOUND + Duration::from_millis(10), "returned late after {:?}", elapsed);
    assert_eq!(h.bus.unsubscribe_count(), 1);
    h.assert_subscriptions_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_capture_failure_short_circuits() {
    let h = Harness::new(WorkerBehavior::Processed {
        match_count: 1,
        after: Duration::from_millis(200),
    });
    let capture = Arc::new(FixedCapture::failing());
    let orchestrator = h.orchestrator(capture.clone());

    let start = Instant::now();
    let result = orchestrator.capture_and_verify_detailed().await;

    assert!(matches!(result, Err(VerifyError::CaptureFailed(_))));
    assert_eq!(capture.calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(h.store.is_empty());
    assert_eq!(h.worker.trigger_count(), 0);
    assert_eq!(h.bus.subscribe_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_worker_error_collapses_to_none() {
    let h = Harness::new(WorkerBehavior::Errors {
        after: Duration::from_millis(100),
    });

    let result = h
        .orchestrator(FixedCapture::ok(sample_image(4)))
        .capture_and_verify_detailed()
        .await;

    let err = result.expect_err("worker error must not verify");
    assert!(matches!(err, VerifyError::Errored));
    assert_eq!(err.label(), "errored");
    h.assert_subscriptions_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_empty_capture_never_dispatched() {
    let h = Harness::new(WorkerBehavior::Silent);
    let empty = capture_verify::models::work_item::CapturedImage::jpeg(Vec::new());

    let result = h.orchestrator(FixedCapture::ok(empty)).capture_and_verify_detailed().await;

    assert!(matches!(result, Err(VerifyError::CaptureFailed(_))));
    assert!(h.store.is_empty());
    assert_eq!(h.bus.subscribe_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_failure_opens_no_subscription() {
    let bus = Arc::new(MemoryBus::new());
    let store = Arc::new(MemoryWorkItemStore::new(bus.clone()));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(RefusingTrigger)));
    let correlator = Arc::new(Correlator::new(bus.clone(), Default::default()));
    let orchestrator =
        VerificationOrchestrator::new(FixedCapture::ok(sample_image(5)), dispatcher, correlator, BOUND);

    let result = orchestrator.capture_and_verify_detailed().await;

    assert!(matches!(result, Err(VerifyError::TriggerFailed(_))));
    assert_eq!(bus.subscribe_count(), 0);
    // The row was written before the trigger failed and stays pending.
    assert_eq!(store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_opens_no_subscription() {
    let bus = Arc::new(MemoryBus::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(UnreachableStore),
        Arc::new(RefusingTrigger),
    ));
    let correlator = Arc::new(Correlator::new(bus.clone(), Default::default()));
    let capture = FixedCapture::ok(sample_image(6));
    let orchestrator = VerificationOrchestrator::new(capture, dispatcher, correlator, BOUND);

    let result = orchestrator.capture_and_verify_detailed().await;

    assert!(matches!(result, Err(VerifyError::DispatchFailed(_))));
    assert_eq!(bus.subscribe_count(), 0);
    assert_eq!(result.err().map(|e| e.label()), Some("dispatch_failed"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_captures_are_independent() {
    let h = Harness::new(WorkerBehavior::Processed {
        match_count: 1,
        after: Duration::from_millis(200),
    });
    let first = sample_image(7);
    let second = sample_image(8);

    let orchestrators = [
        h.orchestrator(FixedCapture::ok(first.clone())),
        h.orchestrator(FixedCapture::ok(second.clone())),
    ];
    let results = join_all(orchestrators.iter().map(|o| o.capture_and_verify())).await;

    assert_eq!(results, vec![Some(first.bytes), Some(second.bytes)]);

    let triggered = h.worker.triggered.lock().unwrap().clone();
    assert_eq!(triggered.len(), 2);
    assert_ne!(triggered[0], triggered[1]);
    assert_eq!(h.bus.subscribe_count(), 2);
    h.assert_subscriptions_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_work_item_reaches_terminal_state_once() {
    let h = Harness::new(WorkerBehavior::Processed {
        match_count: 1,
        after: Duration::from_millis(200),
    });
    let capture = FixedCapture::ok(sample_image(9));
    let orchestrator = h.orchestrator(capture);

    assert!(orchestrator.capture_and_verify().await.is_some());

    let id = h.worker.triggered.lock().unwrap()[0];
    let item = h.store.get(id).await.expect("store").expect("item");
    assert_eq!(item.status, WorkItemStatus::Processed);
    assert!(!h.store.mark_failed(id, "retry").await.expect("store"));
}

#[tokio::test(start_paused = true)]
async fn test_capture_invoked_once_per_verification() {
    let h = Harness::new(WorkerBehavior::Silent);
    let capture = Arc::new(FixedCapture::ok(sample_image(10)));
    let orchestrator = h.orchestrator(capture.clone());

    assert_eq!(orchestrator.capture_and_verify().await, None);
    assert_eq!(orchestrator.capture_and_verify().await, None);

    assert_eq!(capture.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.bus.subscribe_count(), 2);
    h.assert_subscriptions_balanced();
    assert_eq!(h.store.len(), 2);
}
