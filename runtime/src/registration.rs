//! Registration engine.
//!
//! Decides admission for free events, drives the PENDING → CONFIRMED/REJECTED
//! lifecycle, and keeps `attendee_count` honest:
//!
//! ```text
//! register ──► admit() ──► try_reserve_seats(1) ──► insert / CAS row ──► notify
//!                              │                        │
//!                              └─ CapacityExceeded      └─ lost race: release_seats(1)
//!                                 → EventFull              → AlreadyRegistered
//! ```
//!
//! A seat is always reserved BEFORE the row that holds it is written. When the
//! row write fails the seat is handed back, so the counter can only ever be
//! transiently high, never above capacity.

use crate::environment::EngineEnvironment;
use crate::retry::retry_transient;
use seatkeeper_core::admission::{Admission, admit};
use seatkeeper_core::error::{EngineError, EngineResult, StoreError};
use seatkeeper_core::event_store::Reservation;
use seatkeeper_core::notification::{Notification, NotificationKind};
use seatkeeper_core::types::{
    Event, EventId, Registration, RegistrationId, RegistrationStatus, Role, UserId,
};

/// Handles `register`, `unregister`, `approve`, `reject`, and staff rows.
#[derive(Clone, Debug)]
pub struct RegistrationEngine {
    env: EngineEnvironment,
}

impl RegistrationEngine {
    /// Create an engine over the given environment.
    #[must_use]
    pub const fn new(env: EngineEnvironment) -> Self {
        Self { env }
    }

    /// Register `user_id` as an attendee of a free event.
    ///
    /// Returns the resulting row (CONFIRMED, or PENDING when the event needs
    /// approval). A REJECTED row is reused in place.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown event
    /// - `PaymentRequired`: the event sells tickets
    /// - `AlreadyRegistered`: the user holds a pending or confirmed row, or
    ///   lost a race with a concurrent registration
    /// - `EventFull`: no seat left at the atomic check
    /// - `StoreUnavailable`: persistence unreachable after retries
    #[tracing::instrument(skip_all, fields(%event_id, %user_id))]
    pub async fn register(&self, event_id: EventId, user_id: UserId) -> EngineResult<Registration> {
        let event = self.load_event(event_id).await?;
        let existing = retry_transient(&self.env.retry, "find_registration", || {
            self.env.registrations.find(event_id, user_id)
        })
        .await?;

        let admission = admit(&event, existing.as_ref()).inspect_err(|error| {
            metrics::counter!("seatkeeper.registrations.refused", "reason" => error.code())
                .increment(1);
        })?;

        if admission.needs_seat() {
            self.reserve_one(&event).await?;
        }

        let now = self.env.clock.now();
        let target = admission.target();
        let written = match admission {
            Admission::Fresh { .. } => {
                let row = Registration::new(event_id, user_id, Role::Attendee, target, now);
                let row_id = row.id;
                (row_id, self.env.registrations.insert(row).await)
            }
            Admission::Reactivate { .. } => {
                let row_id = existing.as_ref().map(|row| row.id).unwrap_or_default();
                let result = self
                    .env
                    .registrations
                    .transition(event_id, user_id, RegistrationStatus::Rejected, target, now)
                    .await;
                (row_id, result)
            }
        };

        let registration = match written {
            (_, Ok(row)) => row,
            (row_id, Err(StoreError::Unavailable(reason))) => {
                match self.verify_write(event_id, user_id, row_id, target).await {
                    WriteCheck::Applied(row) => row,
                    WriteCheck::NotApplied => {
                        if admission.needs_seat() {
                            self.compensate(event_id, "register").await;
                        }
                        return Err(EngineError::StoreUnavailable(reason));
                    }
                    WriteCheck::Unknown => return Err(EngineError::StoreUnavailable(reason)),
                }
            }
            (_, Err(error)) => {
                if admission.needs_seat() {
                    self.compensate(event_id, "register").await;
                }
                return Err(match error {
                    StoreError::Conflict(_) | StoreError::UnexpectedRegistrationStatus { .. } => {
                        tracing::info!("Registration lost a race with a concurrent request");
                        EngineError::AlreadyRegistered { event_id, user_id }
                    }
                    other => other.into(),
                });
            }
        };

        match registration.status {
            RegistrationStatus::Confirmed => {
                tracing::info!("Registration confirmed");
                metrics::counter!("seatkeeper.registrations.confirmed").increment(1);
                self.env.notifier.notify(Notification::new(
                    user_id,
                    NotificationKind::RegistrationConfirmed,
                    event_id,
                    format!("You are registered for {}", event.title),
                ));
            }
            RegistrationStatus::Pending => {
                tracing::info!("Registration awaiting approval");
                metrics::counter!("seatkeeper.registrations.pending").increment(1);
                self.env.notifier.notify(Notification::new(
                    user_id,
                    NotificationKind::RegistrationPending,
                    event_id,
                    format!("Your registration for {} awaits approval", event.title),
                ));
                self.env.notifier.notify(Notification::new(
                    event.organizer_id,
                    NotificationKind::ApprovalRequested,
                    event_id,
                    format!("A new registration for {} needs your decision", event.title),
                ));
            }
            RegistrationStatus::Rejected => {}
        }

        Ok(registration)
    }

    /// Approve a PENDING registration, reserving its seat.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown event, or no PENDING row for the user
    /// - `Forbidden`: `actor_id` is not the organizer
    /// - `EventFull`: no seat left; the row stays PENDING
    /// - `StoreUnavailable`: persistence unreachable after retries
    #[tracing::instrument(skip_all, fields(%event_id, %user_id, %actor_id))]
    pub async fn approve(
        &self,
        event_id: EventId,
        user_id: UserId,
        actor_id: UserId,
    ) -> EngineResult<Registration> {
        let event = self.load_event(event_id).await?;
        authorize(&event, actor_id, "approve registrations")?;

        let pending = self.pending_row(event_id, user_id).await?;
        let needs_seat = pending.role.occupies_seat();
        if needs_seat {
            self.reserve_one(&event).await?;
        }

        let now = self.env.clock.now();
        let approved = match self
            .env
            .registrations
            .transition(
                event_id,
                user_id,
                RegistrationStatus::Pending,
                RegistrationStatus::Confirmed,
                now,
            )
            .await
        {
            Ok(row) => row,
            Err(StoreError::Unavailable(reason)) => {
                match self
                    .verify_write(event_id, user_id, pending.id, RegistrationStatus::Confirmed)
                    .await
                {
                    WriteCheck::Applied(row) => row,
                    WriteCheck::NotApplied => {
                        if needs_seat {
                            self.compensate(event_id, "approve").await;
                        }
                        return Err(EngineError::StoreUnavailable(reason));
                    }
                    WriteCheck::Unknown => return Err(EngineError::StoreUnavailable(reason)),
                }
            }
            Err(error) => {
                if needs_seat {
                    self.compensate(event_id, "approve").await;
                }
                return Err(not_pending(error, user_id));
            }
        };

        tracing::info!("Registration approved");
        metrics::counter!("seatkeeper.registrations.approved").increment(1);
        self.env.notifier.notify(Notification::new(
            user_id,
            NotificationKind::RegistrationApproved,
            event_id,
            format!("Your registration for {} was approved", event.title),
        ));

        Ok(approved)
    }

    /// Reject a PENDING registration. No seat changes hands.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown event, or no PENDING row for the user
    /// - `Forbidden`: `actor_id` is not the organizer
    /// - `StoreUnavailable`: persistence unreachable
    #[tracing::instrument(skip_all, fields(%event_id, %user_id, %actor_id))]
    pub async fn reject(
        &self,
        event_id: EventId,
        user_id: UserId,
        actor_id: UserId,
    ) -> EngineResult<Registration> {
        let event = self.load_event(event_id).await?;
        authorize(&event, actor_id, "reject registrations")?;

        let now = self.env.clock.now();
        let rejected = self
            .env
            .registrations
            .transition(
                event_id,
                user_id,
                RegistrationStatus::Pending,
                RegistrationStatus::Rejected,
                now,
            )
            .await
            .map_err(|error| not_pending(error, user_id))?;

        tracing::info!("Registration rejected");
        metrics::counter!("seatkeeper.registrations.rejected").increment(1);
        self.env.notifier.notify(Notification::new(
            user_id,
            NotificationKind::RegistrationRejected,
            event_id,
            format!("Your registration for {} was declined", event.title),
        ));

        Ok(rejected)
    }

    /// Withdraw a CONFIRMED registration and free its seat.
    ///
    /// Returns the removed row. PENDING and REJECTED rows cannot be withdrawn.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown event, no row, or the row is not CONFIRMED
    /// - `StoreUnavailable`: persistence unreachable after retries
    #[tracing::instrument(skip_all, fields(%event_id, %user_id))]
    pub async fn unregister(&self, event_id: EventId, user_id: UserId) -> EngineResult<Registration> {
        let event = self.load_event(event_id).await?;

        let removed = retry_transient(&self.env.retry, "withdraw_confirmed", || {
            self.env.registrations.withdraw_confirmed(event_id, user_id)
        })
        .await
        .map_err(|error| match error {
            StoreError::UnexpectedRegistrationStatus { .. } | StoreError::NotFound(_) => {
                EngineError::NotFound(format!("confirmed registration of user {user_id}"))
            }
            other => other.into(),
        })?;

        tracing::info!(role = removed.role.as_str(), "Registration withdrawn");
        metrics::counter!("seatkeeper.registrations.withdrawn").increment(1);
        if removed.role.occupies_seat() {
            metrics::counter!("seatkeeper.seats.released").increment(1);
        }
        self.env.notifier.notify(Notification::new(
            user_id,
            NotificationKind::RegistrationCancelled,
            event_id,
            format!("Your registration for {} was cancelled", event.title),
        ));

        Ok(removed)
    }

    /// Add a speaker, co-organizer, or manager. Staff rows are CONFIRMED
    /// immediately and never take a seat.
    ///
    /// # Errors
    ///
    /// - `InvalidInput`: `role` is `Attendee`
    /// - `NotFound`: unknown event
    /// - `Forbidden`: `actor_id` is not the organizer
    /// - `AlreadyRegistered`: the user already has a row for the event
    /// - `StoreUnavailable`: persistence unreachable
    #[tracing::instrument(skip_all, fields(%event_id, %user_id, role = role.as_str()))]
    pub async fn add_staff(
        &self,
        event_id: EventId,
        user_id: UserId,
        role: Role,
        actor_id: UserId,
    ) -> EngineResult<Registration> {
        if role.occupies_seat() {
            return Err(EngineError::InvalidInput(
                "attendees register themselves; staff roles only".to_string(),
            ));
        }

        let event = self.load_event(event_id).await?;
        authorize(&event, actor_id, "add staff")?;

        let row = Registration::new(
            event_id,
            user_id,
            role,
            RegistrationStatus::Confirmed,
            self.env.clock.now(),
        );
        let inserted = self
            .env
            .registrations
            .insert(row)
            .await
            .map_err(|error| match error {
                StoreError::Conflict(_) => EngineError::AlreadyRegistered { event_id, user_id },
                other => other.into(),
            })?;

        tracing::info!("Staff member added");
        metrics::counter!("seatkeeper.registrations.staff_added").increment(1);
        Ok(inserted)
    }

    /// The user's row for an event.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no row
    /// - `StoreUnavailable`: persistence unreachable after retries
    pub async fn registration(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> EngineResult<Registration> {
        retry_transient(&self.env.retry, "find_registration", || {
            self.env.registrations.find(event_id, user_id)
        })
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("registration of user {user_id}")))
    }

    /// Rows for an event, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown event
    /// - `StoreUnavailable`: persistence unreachable after retries
    pub async fn registrations(
        &self,
        event_id: EventId,
        status: Option<RegistrationStatus>,
    ) -> EngineResult<Vec<Registration>> {
        self.load_event(event_id).await?;
        let rows = retry_transient(&self.env.retry, "list_registrations", || {
            self.env.registrations.list(event_id, status)
        })
        .await?;
        Ok(rows)
    }

    async fn load_event(&self, event_id: EventId) -> EngineResult<Event> {
        let event = retry_transient(&self.env.retry, "get_event", || {
            self.env.events.get_event(event_id)
        })
        .await?;
        Ok(event)
    }

    async fn pending_row(&self, event_id: EventId, user_id: UserId) -> EngineResult<Registration> {
        let row = retry_transient(&self.env.retry, "find_registration", || {
            self.env.registrations.find(event_id, user_id)
        })
        .await?;

        row.filter(|row| row.status == RegistrationStatus::Pending)
            .ok_or_else(|| EngineError::NotFound(format!("pending registration of user {user_id}")))
    }

    async fn reserve_one(&self, event: &Event) -> EngineResult<()> {
        let reservation = retry_transient(&self.env.retry, "try_reserve_seats", || {
            self.env.events.try_reserve_seats(event.id, 1)
        })
        .await?;

        match reservation {
            Reservation::Reserved { attendee_count } => {
                tracing::debug!(attendee_count, "Seat reserved");
                metrics::counter!("seatkeeper.seats.reserved").increment(1);
                Ok(())
            }
            Reservation::CapacityExceeded {
                capacity,
                attendee_count,
            } => {
                tracing::info!(?capacity, attendee_count, "Event full");
                metrics::counter!("seatkeeper.registrations.refused", "reason" => "EVENT_FULL")
                    .increment(1);
                Err(EngineError::EventFull { event_id: event.id })
            }
        }
    }

    /// After a row write reported `Unavailable`, find out whether it committed.
    async fn verify_write(
        &self,
        event_id: EventId,
        user_id: UserId,
        row_id: RegistrationId,
        target: RegistrationStatus,
    ) -> WriteCheck {
        match retry_transient(&self.env.retry, "find_registration", || {
            self.env.registrations.find(event_id, user_id)
        })
        .await
        {
            Ok(Some(row)) if row.id == row_id && row.status == target => {
                tracing::info!("Row write committed despite the store error");
                WriteCheck::Applied(row)
            }
            Ok(_) => WriteCheck::NotApplied,
            Err(error) => {
                tracing::warn!(
                    %error,
                    "Outcome of row write unknown; keeping the reserved seat"
                );
                WriteCheck::Unknown
            }
        }
    }

    /// Hand back a seat reserved for a row write that did not happen.
    async fn compensate(&self, event_id: EventId, operation: &'static str) {
        match retry_transient(&self.env.retry, "release_seats", || {
            self.env.events.release_seats(event_id, 1)
        })
        .await
        {
            Ok(attendee_count) => {
                tracing::info!(
                    operation,
                    attendee_count,
                    "Reserved seat released after failed write"
                );
                metrics::counter!("seatkeeper.seats.compensated").increment(1);
            }
            // The event and its counter are gone; nothing to hand back.
            Err(StoreError::NotFound(_)) => {
                tracing::info!(operation, "Event deleted before the seat could be released");
            }
            Err(error) => {
                tracing::error!(
                    operation,
                    %error,
                    "Could not release reserved seat; counter drift until the next audit"
                );
                metrics::counter!("seatkeeper.seats.leaked").increment(1);
            }
        }
    }
}

/// Whether a row write that reported `Unavailable` actually landed.
enum WriteCheck {
    Applied(Registration),
    NotApplied,
    /// The store is still unreachable. The seat stays reserved; a counter
    /// that is too high never oversells and the audit reports it.
    Unknown,
}

fn authorize(event: &Event, actor_id: UserId, action: &str) -> EngineResult<()> {
    if event.is_organizer(actor_id) {
        Ok(())
    } else {
        Err(EngineError::Forbidden(format!(
            "only the organizer of event {} may {action}",
            event.id
        )))
    }
}

fn not_pending(error: StoreError, user_id: UserId) -> EngineError {
    match error {
        StoreError::UnexpectedRegistrationStatus { .. } | StoreError::NotFound(_) => {
            EngineError::NotFound(format!("pending registration of user {user_id}"))
        }
        other => other.into(),
    }
}
