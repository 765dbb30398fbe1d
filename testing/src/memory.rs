//! In-memory store for fast, deterministic tests.
//!
//! [`InMemoryStore`] implements all three store traits over ONE lock, so every
//! conditional update (seat reservation, settlement, withdrawal) runs inside a
//! single critical section. The lock is never held across an `.await`.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use chrono::{DateTime, Utc};
use seatkeeper_core::error::{StoreError, StoreResult};
use seatkeeper_core::event_store::{EventStore, Reservation, StoreFuture};
use seatkeeper_core::payment_ledger::{PaymentLedger, Settled, SettlementWrite};
use seatkeeper_core::registration_ledger::RegistrationLedger;
use seatkeeper_core::types::{
    Event, EventId, EventUpdate, NewEvent, Payment, PaymentStatus, Registration,
    RegistrationStatus, SeatAllocation, UserId, fits_capacity,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct State {
    events: HashMap<EventId, Event>,
    event_order: Vec<EventId>,
    registrations: HashMap<(EventId, UserId), Registration>,
    payments: HashMap<String, Payment>,
    payment_order: Vec<String>,
}

impl State {
    fn event_mut(&mut self, id: EventId) -> StoreResult<&mut Event> {
        self.events
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("event {id}")))
    }

    /// The conditional increment: evaluated and applied under the same lock.
    fn reserve(&mut self, id: EventId, n: u32) -> StoreResult<Reservation> {
        let event = self.event_mut(id)?;
        if fits_capacity(event.capacity, event.attendee_count, n) {
            event.attendee_count += n;
            Ok(Reservation::Reserved {
                attendee_count: event.attendee_count,
            })
        } else {
            Ok(Reservation::CapacityExceeded {
                capacity: event.capacity,
                attendee_count: event.attendee_count,
            })
        }
    }

    fn payment_mut(&mut self, reference: &str) -> StoreResult<&mut Payment> {
        self.payments
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(format!("payment {reference}")))
    }
}

/// In-memory implementation of [`EventStore`], [`RegistrationLedger`], and
/// [`PaymentLedger`].
///
/// Clones share state.
///
/// # Example
///
/// ```
/// use seatkeeper_testing::InMemoryStore;
/// use seatkeeper_core::event_store::{EventStore, Reservation};
/// use seatkeeper_core::types::{Money, NewEvent, UserId};
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), seatkeeper_core::StoreError> {
/// let store = InMemoryStore::new();
/// let event = store
///     .create_event(
///         NewEvent {
///             organizer_id: UserId::new(),
///             title: "Workshop".into(),
///             capacity: Some(1),
///             require_approval: false,
///             ticket_price: Money::ZERO,
///         },
///         Utc::now(),
///     )
///     .await?;
///
/// assert!(store.try_reserve_seats(event.id, 1).await?.is_reserved());
/// assert!(!store.try_reserve_seats(event.id, 1).await?.is_reserved());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed event, bypassing validation (for fixtures)
    pub fn seed_event(&self, event: Event) {
        let mut state = self.state.write().unwrap();
        if state.events.insert(event.id, event.clone()).is_none() {
            state.event_order.push(event.id);
        }
    }

    /// Delete an event and everything that references it
    pub fn delete_event(&self, id: EventId) {
        let mut state = self.state.write().unwrap();
        state.events.remove(&id);
        state.event_order.retain(|e| *e != id);
        state.registrations.retain(|(event_id, _), _| *event_id != id);
        let gone: Vec<String> = state
            .payments
            .iter()
            .filter(|(_, p)| p.event_id == id)
            .map(|(r, _)| r.clone())
            .collect();
        for reference in &gone {
            state.payments.remove(reference);
        }
        state.payment_order.retain(|r| !gone.contains(r));
    }

    /// Overwrite the cached counter, simulating drift
    pub fn force_attendee_count(&self, id: EventId, count: u32) {
        if let Some(event) = self.state.write().unwrap().events.get_mut(&id) {
            event.attendee_count = count;
        }
    }

    /// Current counter value, if the event exists
    #[must_use]
    pub fn attendee_count(&self, id: EventId) -> Option<u32> {
        self.state
            .read()
            .unwrap()
            .events
            .get(&id)
            .map(|e| e.attendee_count)
    }

    /// Number of registration rows for an event, in any status
    #[must_use]
    pub fn registration_rows(&self, id: EventId) -> usize {
        self.state
            .read()
            .unwrap()
            .registrations
            .keys()
            .filter(|(event_id, _)| *event_id == id)
            .count()
    }
}

impl EventStore for InMemoryStore {
    fn create_event(&self, new: NewEvent, now: DateTime<Utc>) -> StoreFuture<'_, Event> {
        Box::pin(async move {
            if new.capacity == Some(0) {
                return Err(StoreError::Invalid("capacity must be positive".into()));
            }
            let event = Event {
                id: EventId::new(),
                organizer_id: new.organizer_id,
                title: new.title,
                capacity: new.capacity,
                attendee_count: 0,
                require_approval: new.require_approval,
                ticket_price: new.ticket_price,
                created_at: now,
                updated_at: now,
            };
            self.seed_event(event.clone());
            Ok(event)
        })
    }

    fn get_event(&self, id: EventId) -> StoreFuture<'_, Event> {
        Box::pin(async move {
            self.state
                .read()
                .unwrap()
                .events
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("event {id}")))
        })
    }

    fn update_event(
        &self,
        id: EventId,
        update: EventUpdate,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Event> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let event = state.event_mut(id)?;

            if let Some(capacity) = update.capacity {
                match capacity {
                    Some(0) => {
                        return Err(StoreError::Invalid("capacity must be positive".into()));
                    }
                    Some(c) if c < event.attendee_count => {
                        return Err(StoreError::Invalid(format!(
                            "capacity {c} is below the {} seats already taken",
                            event.attendee_count
                        )));
                    }
                    _ => event.capacity = capacity,
                }
            }
            if let Some(title) = update.title {
                event.title = title;
            }
            if let Some(require_approval) = update.require_approval {
                event.require_approval = require_approval;
            }
            if let Some(price) = update.ticket_price {
                event.ticket_price = price;
            }
            event.updated_at = now;
            Ok(event.clone())
        })
    }

    fn list_event_ids(&self) -> StoreFuture<'_, Vec<EventId>> {
        Box::pin(async move { Ok(self.state.read().unwrap().event_order.clone()) })
    }

    fn try_reserve_seats(&self, id: EventId, n: u32) -> StoreFuture<'_, Reservation> {
        Box::pin(async move { self.state.write().unwrap().reserve(id, n) })
    }

    fn release_seats(&self, id: EventId, n: u32) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let event = state.event_mut(id)?;
            event.attendee_count = event.attendee_count.saturating_sub(n);
            Ok(event.attendee_count)
        })
    }
}

impl RegistrationLedger for InMemoryStore {
    fn find(&self, event_id: EventId, user_id: UserId) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .registrations
                .get(&(event_id, user_id))
                .cloned())
        })
    }

    fn insert(&self, registration: Registration) -> StoreFuture<'_, Registration> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if !state.events.contains_key(&registration.event_id) {
                return Err(StoreError::NotFound(format!(
                    "event {}",
                    registration.event_id
                )));
            }
            let key = (registration.event_id, registration.user_id);
            if state.registrations.contains_key(&key) {
                return Err(StoreError::Conflict(format!(
                    "registration of user {} for event {} exists",
                    registration.user_id, registration.event_id
                )));
            }
            state.registrations.insert(key, registration.clone());
            Ok(registration)
        })
    }

    fn transition(
        &self,
        event_id: EventId,
        user_id: UserId,
        expected: RegistrationStatus,
        next: RegistrationStatus,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Registration> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let row = state
                .registrations
                .get_mut(&(event_id, user_id))
                .ok_or_else(|| StoreError::NotFound(format!("registration of user {user_id}")))?;
            if row.status != expected {
                return Err(StoreError::UnexpectedRegistrationStatus {
                    expected,
                    actual: row.status,
                });
            }
            row.status = next;
            row.updated_at = now;
            Ok(row.clone())
        })
    }

    fn withdraw_confirmed(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Registration> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let key = (event_id, user_id);
            let row = state
                .registrations
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(format!("registration of user {user_id}")))?;
            if row.status != RegistrationStatus::Confirmed {
                return Err(StoreError::UnexpectedRegistrationStatus {
                    expected: RegistrationStatus::Confirmed,
                    actual: row.status,
                });
            }
            let holds_seat = row.role.occupies_seat();

            let event = state.event_mut(event_id)?;
            if holds_seat {
                event.attendee_count = event.attendee_count.saturating_sub(1);
            }
            state
                .registrations
                .remove(&key)
                .ok_or_else(|| StoreError::NotFound(format!("registration of user {user_id}")))
        })
    }

    fn list(
        &self,
        event_id: EventId,
        status: Option<RegistrationStatus>,
    ) -> StoreFuture<'_, Vec<Registration>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let mut rows: Vec<Registration> = state
                .registrations
                .values()
                .filter(|r| r.event_id == event_id)
                .filter(|r| status.is_none_or(|s| r.status == s))
                .cloned()
                .collect();
            rows.sort_by_key(|r| (r.registered_at, *r.id.as_uuid()));
            Ok(rows)
        })
    }

    fn count_seated(&self, event_id: EventId) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let count = state
                .registrations
                .values()
                .filter(|r| r.event_id == event_id && r.holds_seat())
                .count();
            Ok(u32::try_from(count).unwrap_or(u32::MAX))
        })
    }
}

impl PaymentLedger for InMemoryStore {
    fn insert_payment(&self, payment: Payment) -> StoreFuture<'_, Payment> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if !state.events.contains_key(&payment.event_id) {
                return Err(StoreError::NotFound(format!("event {}", payment.event_id)));
            }
            if state.payments.contains_key(&payment.external_reference_id) {
                return Err(StoreError::Conflict(format!(
                    "payment reference {} exists",
                    payment.external_reference_id
                )));
            }
            state.payment_order.push(payment.external_reference_id.clone());
            state
                .payments
                .insert(payment.external_reference_id.clone(), payment.clone());
            Ok(payment)
        })
    }

    fn find_by_reference(&self, reference: &str) -> StoreFuture<'_, Payment> {
        let reference = reference.to_string();
        Box::pin(async move {
            self.state
                .read()
                .unwrap()
                .payments
                .get(&reference)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("payment {reference}")))
        })
    }

    fn settle(&self, write: SettlementWrite, now: DateTime<Utc>) -> StoreFuture<'_, Settled> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let payment = state.payment_mut(&write.reference)?;
            if payment.status != write.expected {
                return Err(StoreError::UnexpectedPaymentStatus {
                    expected: write.expected,
                    actual: payment.status,
                });
            }
            let (event_id, quantity) = (payment.event_id, payment.quantity);

            let seats = if write.next == PaymentStatus::Completed {
                Some(state.reserve(event_id, quantity)?)
            } else {
                None
            };

            let payment = state.payment_mut(&write.reference)?;
            payment.status = write.next;
            if let Some(reservation) = seats {
                payment.seat_allocation = if reservation.is_reserved() {
                    SeatAllocation::Allocated
                } else {
                    SeatAllocation::Overbooked
                };
            }
            if write.external_tx_id.is_some() {
                payment.external_tx_id = write.external_tx_id;
            }
            payment.updated_at = now;

            Ok(Settled {
                payment: payment.clone(),
                seats,
            })
        })
    }

    fn reallocate(&self, reference: &str, now: DateTime<Utc>) -> StoreFuture<'_, Settled> {
        let reference = reference.to_string();
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let payment = state.payment_mut(&reference)?;
            if payment.seat_allocation != SeatAllocation::Overbooked {
                return Err(StoreError::Conflict(format!(
                    "payment {reference} is {}",
                    payment.seat_allocation.as_str()
                )));
            }
            let (event_id, quantity) = (payment.event_id, payment.quantity);

            let reservation = state.reserve(event_id, quantity)?;
            let payment = state.payment_mut(&reference)?;
            if reservation.is_reserved() {
                payment.seat_allocation = SeatAllocation::Allocated;
                payment.updated_at = now;
            }

            Ok(Settled {
                payment: payment.clone(),
                seats: Some(reservation),
            })
        })
    }

    fn release_overbooked(&self, reference: &str, now: DateTime<Utc>) -> StoreFuture<'_, Payment> {
        let reference = reference.to_string();
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let payment = state.payment_mut(&reference)?;
            if payment.seat_allocation != SeatAllocation::Overbooked {
                return Err(StoreError::Conflict(format!(
                    "payment {reference} is {}",
                    payment.seat_allocation.as_str()
                )));
            }
            payment.seat_allocation = SeatAllocation::Released;
            payment.updated_at = now;
            Ok(payment.clone())
        })
    }

    fn list_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<Payment>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state
                .payment_order
                .iter()
                .filter_map(|r| state.payments.get(r))
                .filter(|p| p.event_id == event_id)
                .cloned()
                .collect())
        })
    }

    fn list_overbooked(&self) -> StoreFuture<'_, Vec<Payment>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state
                .payment_order
                .iter()
                .filter_map(|r| state.payments.get(r))
                .filter(|p| {
                    p.status == PaymentStatus::Completed
                        && p.seat_allocation == SeatAllocation::Overbooked
                })
                .cloned()
                .collect())
        })
    }

    fn allocated_seats(&self, event_id: EventId) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state
                .payments
                .values()
                .filter(|p| p.event_id == event_id)
                .map(Payment::allocated_seats)
                .fold(0u32, u32::saturating_add))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatkeeper_core::types::{Money, Role};

    fn new_event(capacity: Option<u32>) -> NewEvent {
        NewEvent {
            organizer_id: UserId::new(),
            title: "Meetup".into(),
            capacity,
            require_approval: false,
            ticket_price: Money::ZERO,
        }
    }

    #[tokio::test]
    async fn reservation_stops_at_capacity() {
        let store = InMemoryStore::new();
        let event = store.create_event(new_event(Some(2)), Utc::now()).await.unwrap();

        assert!(store.try_reserve_seats(event.id, 2).await.unwrap().is_reserved());
        assert_eq!(
            store.try_reserve_seats(event.id, 1).await.unwrap(),
            Reservation::CapacityExceeded {
                capacity: Some(2),
                attendee_count: 2
            }
        );
        assert_eq!(store.release_seats(event.id, 5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn capacity_cannot_drop_below_count() {
        let store = InMemoryStore::new();
        let event = store.create_event(new_event(Some(5)), Utc::now()).await.unwrap();
        store.try_reserve_seats(event.id, 3).await.unwrap();

        let lowered = store
            .update_event(
                event.id,
                EventUpdate {
                    capacity: Some(Some(2)),
                    ..EventUpdate::default()
                },
                Utc::now(),
            )
            .await;
        assert!(matches!(lowered, Err(StoreError::Invalid(_))));

        let unlimited = store
            .update_event(
                event.id,
                EventUpdate {
                    capacity: Some(None),
                    ..EventUpdate::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(unlimited.capacity, None);
    }

    #[tokio::test]
    async fn withdraw_releases_seat_with_row() {
        let store = InMemoryStore::new();
        let event = store.create_event(new_event(Some(1)), Utc::now()).await.unwrap();
        let user = UserId::new();
        store.try_reserve_seats(event.id, 1).await.unwrap();
        store
            .insert(Registration::new(
                event.id,
                user,
                Role::Attendee,
                RegistrationStatus::Confirmed,
                Utc::now(),
            ))
            .await
            .unwrap();

        store.withdraw_confirmed(event.id, user).await.unwrap();
        assert_eq!(store.attendee_count(event.id), Some(0));
        assert_eq!(store.registration_rows(event.id), 0);
        assert!(matches!(
            store.withdraw_confirmed(event.id, user).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn settle_is_compare_and_set() {
        let store = InMemoryStore::new();
        let event = store.create_event(new_event(Some(3)), Utc::now()).await.unwrap();
        let payment = Payment::new(
            event.id,
            UserId::new(),
            2,
            Money::from_minor(2_000),
            "skp_test".into(),
            Utc::now(),
        );
        store.insert_payment(payment).await.unwrap();

        let write = SettlementWrite {
            reference: "skp_test".into(),
            expected: PaymentStatus::Pending,
            next: PaymentStatus::Completed,
            external_tx_id: Some("tx_1".into()),
        };
        let settled = store.settle(write.clone(), Utc::now()).await.unwrap();
        assert_eq!(settled.payment.seat_allocation, SeatAllocation::Allocated);
        assert_eq!(store.attendee_count(event.id), Some(2));

        assert!(matches!(
            store.settle(write, Utc::now()).await,
            Err(StoreError::UnexpectedPaymentStatus {
                actual: PaymentStatus::Completed,
                ..
            })
        ));
        assert_eq!(store.attendee_count(event.id), Some(2));
        assert_eq!(store.allocated_seats(event.id).await.unwrap(), 2);
    }
}
