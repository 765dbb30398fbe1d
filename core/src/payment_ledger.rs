//! Payment ledger trait.
//!
//! Written only by the reconciliation engine. The settlement write is the
//! idempotence guard: the status compare-and-set and the seat increment it
//! triggers commit together or not at all, so two concurrent deliveries of the
//! same webhook can never both move seats.

use crate::event_store::{Reservation, StoreFuture};
use crate::types::{EventId, Payment, PaymentStatus};
use chrono::{DateTime, Utc};

/// Result of an atomic settlement write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settled {
    /// The payment after the write
    pub payment: Payment,
    /// Seat reservation attempted as part of the write, if the payment moved
    /// into COMPLETED (or was re-allocated)
    pub seats: Option<Reservation>,
}

/// A status change requested by the reconciliation engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementWrite {
    /// Gateway reference of the payment
    pub reference: String,
    /// Status the row must currently have
    pub expected: PaymentStatus,
    /// Status to write
    pub next: PaymentStatus,
    /// Gateway transaction id to record
    pub external_tx_id: Option<String>,
}

/// Durable payment rows.
pub trait PaymentLedger: Send + Sync {
    /// Insert a PENDING payment.
    ///
    /// # Errors
    ///
    /// - `Conflict`: the external reference is already used
    /// - `NotFound`: the event does not exist
    /// - `Unavailable`: store unreachable
    fn insert_payment(&self, payment: Payment) -> StoreFuture<'_, Payment>;

    /// Load a payment by gateway reference.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown reference
    /// - `Unavailable`: store unreachable
    fn find_by_reference(&self, reference: &str) -> StoreFuture<'_, Payment>;

    /// Compare-and-set the status; a move into COMPLETED also performs the
    /// conditional seat increment by `quantity` in the same unit of work and
    /// records the allocation as `Allocated` or `Overbooked`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown reference
    /// - `UnexpectedPaymentStatus`: the row is not in `write.expected`
    /// - `Unavailable`: store unreachable; nothing was changed
    fn settle(&self, write: SettlementWrite, now: DateTime<Utc>) -> StoreFuture<'_, Settled>;

    /// Retry the seat increment for an `Overbooked` payment. Moves it to
    /// `Allocated` when the seats now fit; otherwise leaves it flagged.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown reference
    /// - `Conflict`: the payment is not flagged as overbooked
    /// - `Unavailable`: store unreachable
    fn reallocate(&self, reference: &str, now: DateTime<Utc>) -> StoreFuture<'_, Settled>;

    /// Record that an `Overbooked` payment will not be seated (`Released`).
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown reference
    /// - `Conflict`: the payment is not flagged as overbooked
    /// - `Unavailable`: store unreachable
    fn release_overbooked(&self, reference: &str, now: DateTime<Utc>) -> StoreFuture<'_, Payment>;

    /// Payments for an event (oldest first).
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn list_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<Payment>>;

    /// Completed payments awaiting an operator decision (oldest first).
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn list_overbooked(&self) -> StoreFuture<'_, Vec<Payment>>;

    /// Sum of quantities of COMPLETED, `Allocated` payments for an event.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn allocated_seats(&self, event_id: EventId) -> StoreFuture<'_, u32>;
}
