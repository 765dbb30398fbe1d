//! Injected dependencies shared by the engines.

use crate::notifier::Notifier;
use crate::retry::RetryPolicy;
use seatkeeper_core::environment::Clock;
use seatkeeper_core::event_store::EventStore;
use seatkeeper_core::payment_ledger::PaymentLedger;
use seatkeeper_core::registration_ledger::RegistrationLedger;
use std::sync::Arc;

/// Everything an engine needs from the outside world.
///
/// Cheap to clone; all collaborators are shared behind `Arc`.
#[derive(Clone)]
pub struct EngineEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Events and the seat counter
    pub events: Arc<dyn EventStore>,
    /// Registration rows
    pub registrations: Arc<dyn RegistrationLedger>,
    /// Payment rows
    pub payments: Arc<dyn PaymentLedger>,
    /// Notification queue
    pub notifier: Notifier,
    /// Backoff for transient store failures
    pub retry: RetryPolicy,
}

impl EngineEnvironment {
    /// Assemble an environment with the default retry policy.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventStore>,
        registrations: Arc<dyn RegistrationLedger>,
        payments: Arc<dyn PaymentLedger>,
        notifier: Notifier,
    ) -> Self {
        Self {
            clock,
            events,
            registrations,
            payments,
            notifier,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl std::fmt::Debug for EngineEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEnvironment")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
