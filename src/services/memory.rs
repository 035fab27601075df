//! In-process collaborators for tests and local development.
//!
//! `MemoryBus` counts every subscribe and unsubscribe call so callers can
//! check that each subscription is released exactly once.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::work_item::{
    CapturedImage, VerificationWorkItem, WorkItemChange, WorkItemStatus,
};
use crate::services::bus::{
    BusError, ChangeEvent, NotificationBus, RowFilter, Subscription, SubscriptionHandle,
    WORK_ITEM_TOPIC,
};
use crate::services::store::{StoreError, WorkItemStore};

const EVENT_BUFFER: usize = 16;

struct Registration {
    topic: String,
    filter: RowFilter,
    tx: mpsc::Sender<ChangeEvent>,
}

#[derive(Default)]
pub struct MemoryBus {
    next_id: AtomicU64,
    registrations: Mutex<HashMap<u64, Registration>>,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    refuse_subscriptions: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a change to every matching subscriber. Returns how many received it.
    pub fn publish(&self, topic: &str, change: WorkItemChange) -> usize {
        let registrations = self.lock();
        registrations
            .values()
            .filter(|r| r.topic == topic && r.filter.matches(&change))
            .filter(|r| r.tx.try_send(Ok(change.clone())).is_ok())
            .count()
    }

    /// Push a listener failure to every subscriber on `topic`.
    pub fn inject_error(&self, topic: &str, reason: &str) -> usize {
        let registrations = self.lock();
        registrations
            .values()
            .filter(|r| r.topic == topic)
            .filter(|r| {
                r.tx
                    .try_send(Err(BusError::Unavailable(reason.to_string())))
                    .is_ok()
            })
            .count()
    }

    /// Make subsequent `subscribe` calls fail.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.refuse_subscriptions.store(refuse, Ordering::SeqCst);
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl NotificationBus for MemoryBus {
    async fn subscribe(&self, topic: &str, filter: RowFilter) -> Result<Subscription, BusError> {
        if self.refuse_subscriptions.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("subscriptions refused".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.lock().insert(
            id,
            Registration {
                topic: topic.to_string(),
                filter,
                tx,
            },
        );
        self.subscribes.fetch_add(1, Ordering::SeqCst);

        Ok(Subscription {
            handle: SubscriptionHandle {
                id,
                topic: topic.to_string(),
            },
            events: rx,
        })
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.lock().remove(&handle.id);
    }
}

/// Work item store kept in a map. Terminal transitions are published to the
/// attached bus, the way the Postgres trigger notifies listeners.
pub struct MemoryWorkItemStore {
    items: Mutex<HashMap<Uuid, VerificationWorkItem>>,
    bus: Arc<MemoryBus>,
}

impl MemoryWorkItemStore {
    pub fn new(bus: Arc<MemoryBus>) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            bus,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, VerificationWorkItem>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(
        &self,
        id: Uuid,
        status: WorkItemStatus,
        match_count: Option<u32>,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let change = {
            let mut items = self.lock();
            let item = items.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            if item.status.is_terminal() {
                return Ok(false);
            }
            item.status = status;
            item.match_count = match_count;
            item.error = error.map(str::to_string);
            item.updated_at = Utc::now();
            WorkItemChange {
                id,
                status,
                match_count,
            }
        };

        self.bus.publish(WORK_ITEM_TOPIC, change);
        Ok(true)
    }
}

#[async_trait]
impl WorkItemStore for MemoryWorkItemStore {
    async fn create(&self, payload: &CapturedImage) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.lock().insert(
            id,
            VerificationWorkItem {
                id,
                payload: payload.clone(),
                status: WorkItemStatus::Pending,
                match_count: None,
                error: None,
                attempts: 0,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<VerificationWorkItem>, StoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn mark_processed(&self, id: Uuid, match_count: u32) -> Result<bool, StoreError> {
        self.finish(id, WorkItemStatus::Processed, Some(match_count), None)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool, StoreError> {
        self.finish(id, WorkItemStatus::Error, None, Some(reason))
    }

    async fn record_attempt(&self, id: Uuid) -> Result<i32, StoreError> {
        let mut items = self.lock();
        let item = items.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        item.attempts += 1;
        Ok(item.attempts)
    }
}
