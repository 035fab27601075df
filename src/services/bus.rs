use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::work_item::WorkItemChange;

/// Channel the work item table publishes its status changes on.
pub const WORK_ITEM_TOPIC: &str = "verification_work_items";

/// Events buffered per subscription before the forwarder waits.
const EVENT_BUFFER: usize = 16;

/// Predicate applied to every change on a topic before delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilter {
    IdEquals(Uuid),
}

impl RowFilter {
    pub fn matches(&self, change: &WorkItemChange) -> bool {
        match self {
            RowFilter::IdEquals(id) => change.id == *id,
        }
    }
}

/// Identifies one registration on a bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: u64,
    pub topic: String,
}

pub type ChangeEvent = Result<WorkItemChange, BusError>;

/// A live registration: its handle plus the stream of filtered events.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// Publish/subscribe facility for work item changes.
///
/// `unsubscribe` is synchronous so it can run from `Drop`.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn subscribe(&self, topic: &str, filter: RowFilter) -> Result<Subscription, BusError>;

    fn unsubscribe(&self, handle: &SubscriptionHandle);
}

/// Postgres LISTEN/NOTIFY backed bus.
///
/// Every subscription owns a dedicated listener connection driven by a
/// forwarding task; unsubscribing aborts the task, which drops the
/// connection and with it the LISTEN registration.
pub struct PgNotificationBus {
    pool: PgPool,
    next_id: AtomicU64,
    forwarders: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl PgNotificationBus {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            next_id: AtomicU64::new(1),
            forwarders: Mutex::new(HashMap::new()),
        }
    }

    /// Number of forwarding tasks still registered.
    pub fn active_subscriptions(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.forwarders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a forwarder with the registry already locked, so a task is
    /// never running without an entry that `unsubscribe` can abort.
    fn register<F>(&self, spawn: F) -> u64
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut forwarders = self.registry();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        forwarders.insert(id, spawn());
        id
    }
}

#[async_trait]
impl NotificationBus for PgNotificationBus {
    async fn subscribe(&self, topic: &str, filter: RowFilter) -> Result<Subscription, BusError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(BusError::Database)?;
        listener.listen(topic).await.map_err(BusError::Database)?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let id = self.register(|| tokio::spawn(forward_notifications(listener, filter, tx)));

        tracing::debug!(subscription_id = id, topic, "Subscribed to work item changes");

        Ok(Subscription {
            handle: SubscriptionHandle {
                id,
                topic: topic.to_string(),
            },
            events: rx,
        })
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let task = self.registry().remove(&handle.id);

        if let Some(task) = task {
            task.abort();
            tracing::debug!(subscription_id = handle.id, topic = %handle.topic, "Unsubscribed");
        }
    }
}

async fn forward_notifications(
    mut listener: PgListener,
    filter: RowFilter,
    tx: mpsc::Sender<ChangeEvent>,
) {
    loop {
        let notification = match listener.recv().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Notification listener failed");
                let _ = tx.send(Err(BusError::Database(e))).await;
                return;
            }
        };

        let change: WorkItemChange = match serde_json::from_str(notification.payload()) {
            Ok(change) => change,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    channel = notification.channel(),
                    "Skipping malformed change notification"
                );
                continue;
            }
        };

        if !filter.matches(&change) {
            continue;
        }

        if tx.send(Ok(change)).await.is_err() {
            // Receiver gone; nobody is waiting on this subscription anymore.
            return;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Database listener error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bus unavailable: {0}")]
    Unavailable(String),
}
