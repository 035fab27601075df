//! Test collaborators for verification flows

#![allow(dead_code)]

use async_trait::async_trait;
use capture_verify::models::outcome::MatchPolicy;
use capture_verify::models::work_item::CapturedImage;
use capture_verify::services::bus::{BusError, NotificationBus, RowFilter, Subscription, SubscriptionHandle};
use capture_verify::services::capture::{CaptureAdapter, CaptureError};
use capture_verify::services::correlator::Correlator;
use capture_verify::services::dispatcher::Dispatcher;
use capture_verify::services::memory::{MemoryBus, MemoryWorkItemStore};
use capture_verify::services::orchestrator::VerificationOrchestrator;
use capture_verify::services::store::{StoreError, WorkItemStore};
use capture_verify::services::trigger::{ProcessingTrigger, TriggerError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const BOUND: Duration = Duration::from_millis(5000);

pub fn sample_image(tag: u8) -> CapturedImage {
    CapturedImage::jpeg(vec![0xFF, 0xD8, tag, tag, 0xFF, 0xD9])
}

/// What the simulated detection worker does once triggered.
#[derive(Debug, Clone, Copy)]
pub enum WorkerBehavior {
    Processed { match_count: u32, after: Duration },
    Errors { after: Duration },
    Silent,
}

/// Trigger that plays the detection worker against the in-memory store.
pub struct SimulatedWorker {
    store: Arc<MemoryWorkItemStore>,
    behavior: WorkerBehavior,
    pub triggered: Mutex<Vec<Uuid>>,
}

impl SimulatedWorker {
    pub fn new(store: Arc<MemoryWorkItemStore>, behavior: WorkerBehavior) -> Self {
        Self {
            store,
            behavior,
            triggered: Mutex::new(Vec::new()),
        }
    }

    pub fn trigger_count(&self) -> usize {
        self.triggered.lock().unwrap().len()
    }
}

#[async_trait]
impl ProcessingTrigger for SimulatedWorker {
    async fn trigger(&self, work_item_id: Uuid, _payload: &CapturedImage) -> Result<(), TriggerError> {
        self.triggered.lock().unwrap().push(work_item_id);

        let store = self.store.clone();
        match self.behavior {
            WorkerBehavior::Processed { match_count, after } => {
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    store.mark_processed(work_item_id, match_count).await.unwrap();
                });
            }
            WorkerBehavior::Errors { after } => {
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    store.mark_failed(work_item_id, "detector crashed").await.unwrap();
                });
            }
            WorkerBehavior::Silent => {}
        }
        Ok(())
    }
}

pub struct RefusingTrigger;

#[async_trait]
impl ProcessingTrigger for RefusingTrigger {
    async fn trigger(&self, _work_item_id: Uuid, _payload: &CapturedImage) -> Result<(), TriggerError> {
        Err(TriggerError::Unavailable("queue offline".to_string()))
    }
}

/// Store whose writes always fail.
pub struct UnreachableStore;

#[async_trait]
impl WorkItemStore for UnreachableStore {
    async fn create(&self, _payload: &CapturedImage) -> Result<Uuid, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _id: Uuid) -> Result<Option<capture_verify::models::work_item::VerificationWorkItem>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn mark_processed(&self, _id: Uuid, _match_count: u32) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn mark_failed(&self, _id: Uuid, _reason: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn record_attempt(&self, _id: Uuid) -> Result<i32, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// Bus whose subscriptions take `delay` to establish, like a listener
/// waiting on a busy connection pool.
pub struct SlowBus {
    pub inner: Arc<MemoryBus>,
    delay: Duration,
}

impl SlowBus {
    pub fn new(inner: Arc<MemoryBus>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl NotificationBus for SlowBus {
    async fn subscribe(&self, topic: &str, filter: RowFilter) -> Result<Subscription, BusError> {
        tokio::time::sleep(self.delay).await;
        self.inner.subscribe(topic, filter).await
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.inner.unsubscribe(handle);
    }
}

/// Capture adapter returning a fixed result and counting calls.
pub struct FixedCapture {
    result: Result<CapturedImage, ()>,
    pub calls: AtomicUsize,
}

impl FixedCapture {
    pub fn ok(image: CapturedImage) -> Self {
        Self {
            result: Ok(image),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err(()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CaptureAdapter for FixedCapture {
    async fn capture(&self) -> Result<CapturedImage, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .clone()
            .map_err(|_| CaptureError::Sensor("sensor disconnected".to_string()))
    }
}

/// In-memory wiring of the whole verification pipeline.
pub struct Harness {
    pub bus: Arc<MemoryBus>,
    pub store: Arc<MemoryWorkItemStore>,
    pub worker: Arc<SimulatedWorker>,
    pub dispatcher: Arc<Dispatcher>,
    pub correlator: Arc<Correlator>,
}

impl Harness {
    pub fn new(behavior: WorkerBehavior) -> Self {
        Self::with_policy(behavior, MatchPolicy::default())
    }

    pub fn with_policy(behavior: WorkerBehavior, policy: MatchPolicy) -> Self {
        let bus = Arc::new(MemoryBus::new());
        let store = Arc::new(MemoryWorkItemStore::new(bus.clone()));
        let worker = Arc::new(SimulatedWorker::new(store.clone(), behavior));
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), worker.clone()));
        let correlator = Arc::new(Correlator::new(bus.clone(), policy));

        Self {
            bus,
            store,
            worker,
            dispatcher,
            correlator,
        }
    }

    pub fn orchestrator<C: CaptureAdapter>(&self, capture: C) -> VerificationOrchestrator<C> {
        VerificationOrchestrator::new(capture, self.dispatcher.clone(), self.correlator.clone(), BOUND)
    }

    /// Every subscription opened so far has been released exactly once.
    pub fn assert_subscriptions_balanced(&self) {
        assert_eq!(self.bus.subscribe_count(), self.bus.unsubscribe_count());
        assert_eq!(self.bus.active_subscriptions(), 0);
    }
}
