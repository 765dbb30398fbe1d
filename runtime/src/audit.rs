//! Read-only consistency audit.
//!
//! Recomputes each event's seat count from the source rows and compares it
//! with the cached `attendee_count`:
//!
//! ```text
//! attendee_count == confirmed attendee rows + Σ quantity(completed, allocated payments)
//! attendee_count <= capacity
//! ```
//!
//! The reads are not taken in one snapshot, so an event with requests in
//! flight can show transient drift. Run it at quiescence, or re-audit a
//! drifting event before acting on it. The audit never writes.

use crate::health::{HealthCheck, HealthReport};
use crate::retry::{RetryPolicy, retry_transient};
use chrono::{DateTime, Utc};
use seatkeeper_core::error::{EngineError, EngineResult};
use seatkeeper_core::event_store::EventStore;
use seatkeeper_core::payment_ledger::PaymentLedger;
use seatkeeper_core::registration_ledger::RegistrationLedger;
use seatkeeper_core::types::{EventId, Payment};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Audit result for one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventAudit {
    /// Audited event
    pub event_id: EventId,
    /// Seat limit
    pub capacity: Option<u32>,
    /// Cached counter
    pub attendee_count: u32,
    /// Confirmed rows whose role takes a seat
    pub seated_registrations: u32,
    /// Seats held by completed, allocated payments
    pub allocated_payment_seats: u32,
}

impl EventAudit {
    /// Seat count derived from the source rows
    #[must_use]
    pub const fn expected_count(&self) -> u32 {
        self.seated_registrations
            .saturating_add(self.allocated_payment_seats)
    }

    /// `attendee_count - expected_count`; positive means the counter is high
    #[must_use]
    pub fn drift(&self) -> i64 {
        i64::from(self.attendee_count) - i64::from(self.expected_count())
    }

    /// Whether the counter respects the capacity limit
    #[must_use]
    pub fn within_capacity(&self) -> bool {
        self.capacity
            .is_none_or(|capacity| self.attendee_count <= capacity)
    }

    /// No drift and within capacity
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.drift() == 0 && self.within_capacity()
    }
}

/// Full audit output.
#[derive(Clone, Debug, Serialize)]
pub struct AuditReport {
    /// Per-event results
    pub events: Vec<EventAudit>,
    /// Completed payments awaiting an operator decision
    pub overbooked: Vec<Payment>,
    /// When the audit ran
    pub generated_at: DateTime<Utc>,
}

impl AuditReport {
    /// Events whose counter disagrees with the source rows
    pub fn inconsistent(&self) -> impl Iterator<Item = &EventAudit> {
        self.events.iter().filter(|audit| !audit.is_consistent())
    }

    /// Summarize as a health report: drift is unhealthy, pending overbooked
    /// payments are degraded.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let mut checks: Vec<HealthCheck> = self
            .inconsistent()
            .map(|audit| {
                HealthCheck::unhealthy(
                    format!("event {}", audit.event_id),
                    format!(
                        "attendee_count {} but rows account for {}",
                        audit.attendee_count,
                        audit.expected_count()
                    ),
                )
                .with_metadata("drift", audit.drift())
                .with_metadata("within_capacity", audit.within_capacity())
            })
            .collect();

        if self.overbooked.is_empty() {
            checks.push(
                HealthCheck::healthy("overbooked payments")
                    .with_metadata("events_audited", self.events.len()),
            );
        } else {
            checks.push(
                HealthCheck::degraded(
                    "overbooked payments",
                    format!("{} payment(s) await an operator decision", self.overbooked.len()),
                )
                .with_metadata("events_audited", self.events.len()),
            );
        }

        HealthReport::new(checks, self.generated_at)
    }
}

/// Recomputes seat counts from source rows.
#[derive(Clone)]
pub struct ConsistencyAudit {
    events: Arc<dyn EventStore>,
    registrations: Arc<dyn RegistrationLedger>,
    payments: Arc<dyn PaymentLedger>,
    retry: RetryPolicy,
}

impl ConsistencyAudit {
    /// Create an audit over the three stores.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        registrations: Arc<dyn RegistrationLedger>,
        payments: Arc<dyn PaymentLedger>,
    ) -> Self {
        Self {
            events,
            registrations,
            payments,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy used for store reads.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Audit one event.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown event
    /// - `StoreUnavailable`: persistence unreachable after retries
    pub async fn audit_event(&self, event_id: EventId) -> EngineResult<EventAudit> {
        let event = retry_transient(&self.retry, "get_event", || self.events.get_event(event_id))
            .await?;
        let (seated_registrations, allocated_payment_seats) = futures::try_join!(
            retry_transient(&self.retry, "count_seated", || {
                self.registrations.count_seated(event_id)
            }),
            retry_transient(&self.retry, "allocated_seats", || {
                self.payments.allocated_seats(event_id)
            }),
        )?;

        Ok(EventAudit {
            event_id,
            capacity: event.capacity,
            attendee_count: event.attendee_count,
            seated_registrations,
            allocated_payment_seats,
        })
    }

    /// Audit every event and collect overbooked payments.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: persistence unreachable after retries
    pub async fn run(&self, now: DateTime<Utc>) -> EngineResult<AuditReport> {
        let started = Instant::now();
        let ids = retry_transient(&self.retry, "list_event_ids", || self.events.list_event_ids())
            .await?;

        let mut events = Vec::with_capacity(ids.len());
        for event_id in ids {
            let audit = match self.audit_event(event_id).await {
                Ok(audit) => audit,
                // Deleted since the id listing
                Err(EngineError::NotFound(_)) => continue,
                Err(error) => return Err(error),
            };
            if !audit.is_consistent() {
                tracing::error!(
                    %event_id,
                    attendee_count = audit.attendee_count,
                    expected = audit.expected_count(),
                    capacity = ?audit.capacity,
                    "Seat counter drift detected"
                );
                metrics::counter!("seatkeeper.audit.drift").increment(1);
            }
            events.push(audit);
        }

        let overbooked = retry_transient(&self.retry, "list_overbooked", || {
            self.payments.list_overbooked()
        })
        .await?;
        if !overbooked.is_empty() {
            tracing::warn!(count = overbooked.len(), "Overbooked payments awaiting resolution");
        }

        tracing::info!(events = events.len(), "Consistency audit finished");
        metrics::counter!("seatkeeper.audit.runs").increment(1);
        metrics::histogram!("seatkeeper.audit.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(AuditReport {
            events,
            overbooked,
            generated_at: now,
        })
    }
}

impl std::fmt::Debug for ConsistencyAudit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyAudit")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
