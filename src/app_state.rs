use sqlx::PgPool;
use std::sync::Arc;

use crate::config::VerificationSettings;
use crate::services::{
    bus::NotificationBus, correlator::Correlator, dispatcher::Dispatcher, queue::DetectionQueue,
    store::WorkItemStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<DetectionQueue>,
    pub dispatcher: Arc<Dispatcher>,
    pub correlator: Arc<Correlator>,
    pub settings: Arc<VerificationSettings>,
}

impl AppState {
    /// Wire the verification pipeline. The queue doubles as the processing trigger.
    pub fn new(
        db: PgPool,
        store: Arc<dyn WorkItemStore>,
        bus: Arc<dyn NotificationBus>,
        queue: DetectionQueue,
        settings: VerificationSettings,
    ) -> Self {
        let queue = Arc::new(queue);
        let dispatcher = Dispatcher::new(store, queue.clone());
        let correlator = Correlator::new(bus, settings.match_policy());

        Self {
            db,
            queue,
            dispatcher: Arc::new(dispatcher),
            correlator: Arc::new(correlator),
            settings: Arc::new(settings),
        }
    }
}
