//! Fault injection around [`InMemoryStore`].
//!
//! [`FlakyStore`] forwards to an in-memory store but can be told to fail the
//! next calls of a named operation, either before anything happens
//! ([`Fault::Unavailable`]) or after the write committed
//! ([`Fault::LoseResponse`], the "timeout after commit" case).
//! [`Fault::Missing`] stands in for a row deleted by another request.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use crate::memory::InMemoryStore;
use chrono::{DateTime, Utc};
use seatkeeper_core::error::StoreError;
use seatkeeper_core::event_store::{EventStore, Reservation, StoreFuture};
use seatkeeper_core::payment_ledger::{PaymentLedger, Settled, SettlementWrite};
use seatkeeper_core::registration_ledger::RegistrationLedger;
use seatkeeper_core::types::{
    Event, EventId, EventUpdate, NewEvent, Payment, Registration, RegistrationStatus, UserId,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// How an injected failure behaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Fail with `Unavailable` without touching the store
    Unavailable,
    /// Apply the call, then report `Unavailable` anyway
    LoseResponse,
    /// Fail with `NotFound` without touching the store
    Missing,
}

/// Store wrapper that injects transient failures per operation name.
///
/// Operation names match the trait method names (`"try_reserve_seats"`,
/// `"settle"`, ...).
#[derive(Clone, Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    faults: Arc<Mutex<HashMap<&'static str, VecDeque<Fault>>>>,
    calls: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl FlakyStore {
    /// Wrap an in-memory store
    #[must_use]
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// The wrapped store
    #[must_use]
    pub const fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Fail the next `times` calls of `operation` before they run
    pub fn fail_next(&self, operation: &'static str, times: usize) {
        self.push(operation, Fault::Unavailable, times);
    }

    /// Let the next `times` calls of `operation` commit, then report failure
    pub fn lose_next_response(&self, operation: &'static str, times: usize) {
        self.push(operation, Fault::LoseResponse, times);
    }

    /// Report the next `times` calls of `operation` as `NotFound`
    pub fn report_missing(&self, operation: &'static str, times: usize) {
        self.push(operation, Fault::Missing, times);
    }

    /// How many times `operation` was called, faults included
    #[must_use]
    pub fn calls(&self, operation: &'static str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    fn push(&self, operation: &'static str, fault: Fault, times: usize) {
        let mut faults = self.faults.lock().unwrap();
        let queue = faults.entry(operation).or_default();
        queue.extend(std::iter::repeat_n(fault, times));
    }

    fn take(&self, operation: &'static str) -> Option<Fault> {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;
        self.faults
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
    }

    fn wrap<'a, T: Send + 'a>(
        &'a self,
        operation: &'static str,
        call: StoreFuture<'a, T>,
    ) -> StoreFuture<'a, T> {
        let fault = self.take(operation);
        Box::pin(async move {
            match fault {
                None => call.await,
                Some(Fault::Unavailable) => Err(StoreError::Unavailable(format!(
                    "injected fault in {operation}"
                ))),
                Some(Fault::LoseResponse) => {
                    let _ = call.await;
                    Err(StoreError::Unavailable(format!(
                        "injected lost response in {operation}"
                    )))
                }
                Some(Fault::Missing) => Err(StoreError::NotFound(format!(
                    "injected missing row in {operation}"
                ))),
            }
        })
    }
}

impl EventStore for FlakyStore {
    fn create_event(&self, event: NewEvent, now: DateTime<Utc>) -> StoreFuture<'_, Event> {
        self.wrap("create_event", self.inner.create_event(event, now))
    }

    fn get_event(&self, id: EventId) -> StoreFuture<'_, Event> {
        self.wrap("get_event", self.inner.get_event(id))
    }

    fn update_event(
        &self,
        id: EventId,
        update: EventUpdate,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Event> {
        self.wrap("update_event", self.inner.update_event(id, update, now))
    }

    fn list_event_ids(&self) -> StoreFuture<'_, Vec<EventId>> {
        self.wrap("list_event_ids", self.inner.list_event_ids())
    }

    fn try_reserve_seats(&self, id: EventId, n: u32) -> StoreFuture<'_, Reservation> {
        self.wrap("try_reserve_seats", self.inner.try_reserve_seats(id, n))
    }

    fn release_seats(&self, id: EventId, n: u32) -> StoreFuture<'_, u32> {
        self.wrap("release_seats", self.inner.release_seats(id, n))
    }
}

impl RegistrationLedger for FlakyStore {
    fn find(&self, event_id: EventId, user_id: UserId) -> StoreFuture<'_, Option<Registration>> {
        self.wrap("find", self.inner.find(event_id, user_id))
    }

    fn insert(&self, registration: Registration) -> StoreFuture<'_, Registration> {
        self.wrap("insert", self.inner.insert(registration))
    }

    fn transition(
        &self,
        event_id: EventId,
        user_id: UserId,
        expected: RegistrationStatus,
        next: RegistrationStatus,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Registration> {
        self.wrap(
            "transition",
            self.inner
                .transition(event_id, user_id, expected, next, now),
        )
    }

    fn withdraw_confirmed(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Registration> {
        self.wrap(
            "withdraw_confirmed",
            self.inner.withdraw_confirmed(event_id, user_id),
        )
    }

    fn list(
        &self,
        event_id: EventId,
        status: Option<RegistrationStatus>,
    ) -> StoreFuture<'_, Vec<Registration>> {
        self.wrap("list", self.inner.list(event_id, status))
    }

    fn count_seated(&self, event_id: EventId) -> StoreFuture<'_, u32> {
        self.wrap("count_seated", self.inner.count_seated(event_id))
    }
}

impl PaymentLedger for FlakyStore {
    fn insert_payment(&self, payment: Payment) -> StoreFuture<'_, Payment> {
        self.wrap("insert_payment", self.inner.insert_payment(payment))
    }

    fn find_by_reference(&self, reference: &str) -> StoreFuture<'_, Payment> {
        self.wrap("find_by_reference", self.inner.find_by_reference(reference))
    }

    fn settle(&self, write: SettlementWrite, now: DateTime<Utc>) -> StoreFuture<'_, Settled> {
        self.wrap("settle", self.inner.settle(write, now))
    }

    fn reallocate(&self, reference: &str, now: DateTime<Utc>) -> StoreFuture<'_, Settled> {
        self.wrap("reallocate", self.inner.reallocate(reference, now))
    }

    fn release_overbooked(&self, reference: &str, now: DateTime<Utc>) -> StoreFuture<'_, Payment> {
        self.wrap(
            "release_overbooked",
            self.inner.release_overbooked(reference, now),
        )
    }

    fn list_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<Payment>> {
        self.wrap("list_for_event", self.inner.list_for_event(event_id))
    }

    fn list_overbooked(&self) -> StoreFuture<'_, Vec<Payment>> {
        self.wrap("list_overbooked", self.inner.list_overbooked())
    }

    fn allocated_seats(&self, event_id: EventId) -> StoreFuture<'_, u32> {
        self.wrap("allocated_seats", self.inner.allocated_seats(event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatkeeper_core::types::Money;

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let store = FlakyStore::default();
        let event = store
            .create_event(
                NewEvent {
                    organizer_id: UserId::new(),
                    title: "Meetup".into(),
                    capacity: Some(5),
                    require_approval: false,
                    ticket_price: Money::ZERO,
                },
                Utc::now(),
            )
            .await
            .unwrap();

        store.fail_next("try_reserve_seats", 1);
        store.lose_next_response("try_reserve_seats", 1);

        assert!(store.try_reserve_seats(event.id, 1).await.is_err());
        assert_eq!(store.inner().attendee_count(event.id), Some(0));

        assert!(store.try_reserve_seats(event.id, 1).await.is_err());
        assert_eq!(store.inner().attendee_count(event.id), Some(1));

        assert!(store.try_reserve_seats(event.id, 1).await.is_ok());
        assert_eq!(store.calls("try_reserve_seats"), 3);
    }
}
