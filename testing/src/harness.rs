//! Fully wired engines over in-memory stores.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use crate::faults::FlakyStore;
use crate::mocks::{FixedClock, test_clock};
use crate::sinks::RecordingSink;
use seatkeeper_core::notification::NotificationSink;
use seatkeeper_core::types::{Event, EventId, Money, NewEvent, UserId};
use seatkeeper_runtime::retry::RetryPolicy;
use seatkeeper_runtime::{
    ConsistencyAudit, EngineEnvironment, EventAudit, EventCatalog, Notifier, ReconciliationEngine,
    RegistrationEngine,
};
use std::sync::Arc;
use std::time::Duration;

/// Retry policy with millisecond delays and no jitter
#[must_use]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .jitter(false)
        .build()
}

/// Engines, stores, and a recording sink wired together.
///
/// Must be created inside a Tokio runtime (the notifier spawns a task).
///
/// # Example
///
/// ```ignore
/// let h = TestHarness::new();
/// let event = h.free_event(Some(1), false).await;
/// h.registrations.register(event.id, UserId::new()).await?;
/// h.assert_consistent(event.id).await;
/// ```
pub struct TestHarness {
    /// Backing store with fault injection
    pub store: FlakyStore,
    /// Captures notifications when no other sink was supplied
    pub sink: RecordingSink,
    /// Fixed time source
    pub clock: FixedClock,
    /// Event publishing
    pub catalog: EventCatalog,
    /// Registration engine
    pub registrations: RegistrationEngine,
    /// Payment reconciliation engine
    pub payments: ReconciliationEngine,
    /// Read-only audit
    pub audit: ConsistencyAudit,
    notifier: Notifier,
}

impl TestHarness {
    /// Harness with a [`RecordingSink`]
    #[must_use]
    pub fn new() -> Self {
        let sink = RecordingSink::new();
        Self::build(sink.clone(), Arc::new(sink))
    }

    /// Harness delivering to `sink` instead of the recording sink
    #[must_use]
    pub fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        Self::build(RecordingSink::new(), sink)
    }

    fn build(recording: RecordingSink, sink: Arc<dyn NotificationSink>) -> Self {
        let store = FlakyStore::default();
        let clock = test_clock();
        let (notifier, _dispatcher) = Notifier::spawn(sink);
        let shared = Arc::new(store.clone());

        let env = EngineEnvironment::new(
            Arc::new(clock.clone()),
            shared.clone(),
            shared.clone(),
            shared.clone(),
            notifier.clone(),
        )
        .with_retry_policy(fast_retry());

        Self {
            catalog: EventCatalog::new(env.clone()),
            registrations: RegistrationEngine::new(env.clone()),
            payments: ReconciliationEngine::new(env),
            audit: ConsistencyAudit::new(shared.clone(), shared.clone(), shared)
                .with_retry_policy(fast_retry()),
            store,
            sink: recording,
            clock,
            notifier,
        }
    }

    /// Publish a free event with a fresh organizer
    pub async fn free_event(&self, capacity: Option<u32>, require_approval: bool) -> Event {
        self.publish(capacity, require_approval, Money::ZERO).await
    }

    /// Publish a paid event with a fresh organizer
    pub async fn paid_event(&self, capacity: Option<u32>, price: u64) -> Event {
        self.publish(capacity, false, Money::from_minor(price)).await
    }

    async fn publish(&self, capacity: Option<u32>, require_approval: bool, price: Money) -> Event {
        self.catalog
            .publish(NewEvent {
                organizer_id: UserId::new(),
                title: "Rust Seoul meetup".to_string(),
                capacity,
                require_approval,
                ticket_price: price,
            })
            .await
            .unwrap()
    }

    /// Current counter value
    #[must_use]
    pub fn attendee_count(&self, event_id: EventId) -> u32 {
        self.store.inner().attendee_count(event_id).unwrap()
    }

    /// Wait until queued notifications reached the sink
    pub async fn flush(&self) {
        self.notifier.flush().await;
    }

    /// Audit one event and panic with details if it drifted
    pub async fn assert_consistent(&self, event_id: EventId) -> EventAudit {
        let audit = self.audit.audit_event(event_id).await.unwrap();
        assert!(
            audit.is_consistent(),
            "counter drift: attendee_count={} expected={} capacity={:?}",
            audit.attendee_count,
            audit.expected_count(),
            audit.capacity
        );
        audit
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
