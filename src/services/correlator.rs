//! Correlates a dispatched work item with its terminal notification.
//!
//! A wait races two signals: the bus delivering the item's terminal state
//! and a timer. The first one resolves the wait and the subscription is
//! released before the outcome is returned. [`Correlation`] holds the
//! explicit guard: it only resolves once and only releases once, and it
//! releases on drop so a cancelled wait cannot leak its subscription.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::outcome::{MatchPolicy, Outcome, OutcomeKind};
use crate::models::work_item::CapturedImage;
use crate::services::bus::{NotificationBus, RowFilter, SubscriptionHandle, WORK_ITEM_TOPIC};

/// Guard state of a single correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationState {
    Unresolved,
    Resolved(OutcomeKind),
    Closed,
}

/// Owns one subscription and the resolve-once/release-once guard around it.
pub struct Correlation {
    bus: Arc<dyn NotificationBus>,
    handle: SubscriptionHandle,
    work_item_id: Uuid,
    state: CorrelationState,
}

impl Correlation {
    pub fn new(bus: Arc<dyn NotificationBus>, handle: SubscriptionHandle, work_item_id: Uuid) -> Self {
        Self {
            bus,
            handle,
            work_item_id,
            state: CorrelationState::Unresolved,
        }
    }

    pub fn state(&self) -> CorrelationState {
        self.state
    }

    /// Record the winning signal. Later signals are ignored and return `false`.
    pub fn resolve(&mut self, kind: OutcomeKind) -> bool {
        match self.state {
            CorrelationState::Unresolved => {
                self.state = CorrelationState::Resolved(kind);
                true
            }
            CorrelationState::Resolved(winner) => {
                tracing::debug!(
                    work_item_id = %self.work_item_id,
                    winner = %winner,
                    ignored = %kind,
                    "Ignoring signal after resolution"
                );
                false
            }
            CorrelationState::Closed => false,
        }
    }

    /// Release the subscription. Only the first call reaches the bus.
    pub fn close(&mut self) -> bool {
        if self.state == CorrelationState::Closed {
            return false;
        }
        if self.state == CorrelationState::Unresolved {
            tracing::debug!(work_item_id = %self.work_item_id, "Closing unresolved correlation");
        }
        self.bus.unsubscribe(&self.handle);
        self.state = CorrelationState::Closed;
        true
    }
}

impl Drop for Correlation {
    fn drop(&mut self) {
        self.close();
    }
}

/// Waits for the outcome of one dispatched work item.
pub struct Correlator {
    bus: Arc<dyn NotificationBus>,
    policy: MatchPolicy,
}

impl Correlator {
    pub fn new(bus: Arc<dyn NotificationBus>, policy: MatchPolicy) -> Self {
        Self { bus, policy }
    }

    /// Subscribe to `work_item_id` and race its terminal change against `bound`.
    ///
    /// The bound covers subscription setup as well: a subscribe that has not
    /// completed by the deadline resolves [`Outcome::TimedOut`] with nothing
    /// to release.
    ///
    /// Always yields exactly one outcome. A failed subscription, a listener
    /// error or a closed event stream resolve as [`Outcome::Errored`]; changes
    /// that are not yet terminal are skipped.
    pub async fn await_outcome(
        &self,
        work_item_id: Uuid,
        payload: &CapturedImage,
        bound: Duration,
    ) -> Outcome {
        let started = Instant::now();
        let deadline = started + bound;

        let subscribe = self
            .bus
            .subscribe(WORK_ITEM_TOPIC, RowFilter::IdEquals(work_item_id));
        let subscription = match tokio::time::timeout_at(deadline, subscribe).await {
            Ok(Ok(subscription)) => subscription,
            Ok(Err(e)) => {
                tracing::warn!(work_item_id = %work_item_id, error = %e, "Failed to subscribe");
                return Outcome::Errored;
            }
            Err(_) => {
                tracing::warn!(
                    work_item_id = %work_item_id,
                    bound_ms = bound.as_millis() as u64,
                    "Subscription not established within bound"
                );
                metrics::histogram!("correlation_wait_seconds").record(started.elapsed().as_secs_f64());
                return Outcome::TimedOut;
            }
        };

        let mut events = subscription.events;
        let mut correlation = Correlation::new(self.bus.clone(), subscription.handle, work_item_id);

        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        let (kind, match_count) = loop {
            tokio::select! {
                // Deliveries that are already queued win over a timer that
                // expires in the same instant.
                biased;

                event = events.recv() => {
                    let verdict = match event {
                        Some(Ok(change)) => match self.policy.classify(&change) {
                            Some(verdict) => verdict,
                            None => continue,
                        },
                        Some(Err(e)) => {
                            tracing::warn!(work_item_id = %work_item_id, error = %e, "Listener error");
                            (OutcomeKind::Errored, 0)
                        }
                        None => {
                            tracing::warn!(work_item_id = %work_item_id, "Event stream closed");
                            (OutcomeKind::Errored, 0)
                        }
                    };
                    if correlation.resolve(verdict.0) {
                        break verdict;
                    }
                }
                () = &mut timer => {
                    if correlation.resolve(OutcomeKind::TimedOut) {
                        break (OutcomeKind::TimedOut, 0);
                    }
                }
            }
        };

        correlation.close();
        drop(events);

        let elapsed = started.elapsed();
        metrics::histogram!("correlation_wait_seconds").record(elapsed.as_secs_f64());
        tracing::info!(
            work_item_id = %work_item_id,
            outcome = %kind,
            match_count,
            elapsed_ms = elapsed.as_millis() as u64,
            "Correlation resolved"
        );

        match kind {
            OutcomeKind::Matched => Outcome::Matched {
                payload: payload.clone(),
                match_count,
            },
            OutcomeKind::NotMatched => Outcome::NotMatched { match_count },
            OutcomeKind::Errored => Outcome::Errored,
            OutcomeKind::TimedOut => Outcome::TimedOut,
        }
    }
}
