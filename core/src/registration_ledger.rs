//! Registration ledger trait.
//!
//! Holds at most one row per `(event_id, user_id)`. Every status change is a
//! compare-and-set on the current status so concurrent duplicate requests and
//! organizer decisions serialize on the row itself.

use crate::event_store::StoreFuture;
use crate::types::{EventId, Registration, RegistrationStatus, UserId};
use chrono::{DateTime, Utc};

/// Durable registration rows.
pub trait RegistrationLedger: Send + Sync {
    /// Load the row for `(event_id, user_id)`, if any.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn find(&self, event_id: EventId, user_id: UserId) -> StoreFuture<'_, Option<Registration>>;

    /// Insert a new row.
    ///
    /// # Errors
    ///
    /// - `Conflict`: a row already exists for the pair
    /// - `Unavailable`: store unreachable
    fn insert(&self, registration: Registration) -> StoreFuture<'_, Registration>;

    /// Move the row from `expected` to `next` in one compare-and-set.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no row for the pair
    /// - `UnexpectedRegistrationStatus`: the row is not in `expected`
    /// - `Unavailable`: store unreachable
    fn transition(
        &self,
        event_id: EventId,
        user_id: UserId,
        expected: RegistrationStatus,
        next: RegistrationStatus,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Registration>;

    /// Remove a CONFIRMED row and, when its role holds a seat, release that
    /// seat on the event counter within the same unit of work.
    ///
    /// Returns the removed row.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no row for the pair, or the event is gone
    /// - `UnexpectedRegistrationStatus`: the row is not CONFIRMED
    /// - `Unavailable`: store unreachable; nothing was changed
    fn withdraw_confirmed(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Registration>;

    /// List rows for an event, optionally filtered by status (oldest first).
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn list(
        &self,
        event_id: EventId,
        status: Option<RegistrationStatus>,
    ) -> StoreFuture<'_, Vec<Registration>>;

    /// Count CONFIRMED rows whose role occupies a seat.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn count_seated(&self, event_id: EventId) -> StoreFuture<'_, u32>;
}
