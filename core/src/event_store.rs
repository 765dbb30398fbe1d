//! Event store trait: durable events plus the atomic seat-counter primitive.
//!
//! # Design
//!
//! `attendee_count` is the single shared mutable resource in the system. It may
//! only grow through [`EventStore::try_reserve_seats`], which implementations
//! must apply as ONE conditional update:
//!
//! ```text
//! count += n   iff   capacity IS NULL OR count + n <= capacity
//! ```
//!
//! evaluated and written indivisibly (a guarded `UPDATE ... WHERE` in SQL, a
//! single critical section in memory). Read-then-write is not acceptable.
//!
//! # Implementations
//!
//! - `PostgresStore` (in `seatkeeper-postgres`): production
//! - `InMemoryStore` (in `seatkeeper-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` so the engines can hold
//! `Arc<dyn EventStore>`.

use crate::error::StoreResult;
use crate::types::{Event, EventId, EventUpdate, NewEvent};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store methods
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Outcome of a conditional seat reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reservation {
    /// Counter incremented; carries the new count
    Reserved {
        /// `attendee_count` after the increment
        attendee_count: u32,
    },
    /// Counter untouched because the seats do not fit
    CapacityExceeded {
        /// The event's capacity at the moment of the check
        capacity: Option<u32>,
        /// `attendee_count` at the moment of the check
        attendee_count: u32,
    },
}

impl Reservation {
    /// Whether the seats were taken
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self, Self::Reserved { .. })
    }
}

/// Durable event records and the seat counter.
pub trait EventStore: Send + Sync {
    /// Publish a new event with `attendee_count = 0`.
    ///
    /// # Errors
    ///
    /// - `Invalid`: capacity of zero
    /// - `Unavailable`: store unreachable
    fn create_event(&self, event: NewEvent, now: DateTime<Utc>) -> StoreFuture<'_, Event>;

    /// Load an event.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such event
    /// - `Unavailable`: store unreachable
    fn get_event(&self, id: EventId) -> StoreFuture<'_, Event>;

    /// Apply organizer edits. Never touches `attendee_count`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such event
    /// - `Invalid`: new capacity of zero, or below the current `attendee_count`
    /// - `Unavailable`: store unreachable
    fn update_event(
        &self,
        id: EventId,
        update: EventUpdate,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Event>;

    /// List all event ids (oldest first). Used by the consistency audit.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: store unreachable
    fn list_event_ids(&self) -> StoreFuture<'_, Vec<EventId>>;

    /// Atomically grow `attendee_count` by `n` if the seats fit.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such event
    /// - `Unavailable`: store unreachable (retryable)
    fn try_reserve_seats(&self, id: EventId, n: u32) -> StoreFuture<'_, Reservation>;

    /// Atomically shrink `attendee_count` by `n`, floored at zero.
    ///
    /// Returns the new count.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such event
    /// - `Unavailable`: store unreachable (retryable)
    fn release_seats(&self, id: EventId, n: u32) -> StoreFuture<'_, u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_reports_outcome() {
        assert!(Reservation::Reserved { attendee_count: 1 }.is_reserved());
        assert!(
            !Reservation::CapacityExceeded {
                capacity: Some(1),
                attendee_count: 1
            }
            .is_reserved()
        );
    }
}
