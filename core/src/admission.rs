//! Pure admission rule for `register`.
//!
//! Given the event policy and the user's existing row, decide what the
//! engine should attempt. Capacity is NOT checked here; that happens at the
//! atomic reservation.

use crate::error::EngineError;
use crate::types::{Event, Registration, RegistrationStatus, Role};

/// What a registration attempt should do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// No row yet: insert one with `target`
    Fresh {
        /// Status the new row will have
        target: RegistrationStatus,
    },
    /// A REJECTED row exists: move it to `target` in place
    Reactivate {
        /// Status the row will move to
        target: RegistrationStatus,
    },
}

impl Admission {
    /// Status the row ends up in
    #[must_use]
    pub const fn target(&self) -> RegistrationStatus {
        match self {
            Self::Fresh { target } | Self::Reactivate { target } => *target,
        }
    }

    /// Whether a seat must be reserved before the row is written
    #[must_use]
    pub const fn needs_seat(&self) -> bool {
        matches!(self.target(), RegistrationStatus::Confirmed)
    }
}

/// Status a new attendee registration receives under the event's policy.
#[must_use]
pub const fn target_status(event: &Event) -> RegistrationStatus {
    if event.require_approval {
        RegistrationStatus::Pending
    } else {
        RegistrationStatus::Confirmed
    }
}

/// Decide how to handle `register` for an attendee.
///
/// # Errors
///
/// - `PaymentRequired`: the event sells tickets
/// - `AlreadyRegistered`: an active (pending or confirmed) row exists
pub fn admit(event: &Event, existing: Option<&Registration>) -> Result<Admission, EngineError> {
    if event.is_paid() {
        return Err(EngineError::PaymentRequired { event_id: event.id });
    }

    let target = target_status(event);
    match existing {
        None => Ok(Admission::Fresh { target }),
        Some(row) if row.status.is_active() => Err(EngineError::AlreadyRegistered {
            event_id: row.event_id,
            user_id: row.user_id,
        }),
        Some(row) if row.role == Role::Attendee => Ok(Admission::Reactivate { target }),
        Some(row) => Err(EngineError::AlreadyRegistered {
            event_id: row.event_id,
            user_id: row.user_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventId, Money, UserId};
    use chrono::Utc;

    fn event(require_approval: bool, price: u64) -> Event {
        let now = Utc::now();
        Event {
            id: EventId::new(),
            organizer_id: UserId::new(),
            title: "Rust meetup".to_string(),
            capacity: Some(10),
            attendee_count: 0,
            require_approval,
            ticket_price: Money::from_minor(price),
            created_at: now,
            updated_at: now,
        }
    }

    fn row(event: &Event, status: RegistrationStatus) -> Registration {
        Registration::new(event.id, UserId::new(), Role::Attendee, status, Utc::now())
    }

    #[test]
    fn fresh_registration_follows_policy() {
        let open = event(false, 0);
        assert_eq!(
            admit(&open, None),
            Ok(Admission::Fresh {
                target: RegistrationStatus::Confirmed
            })
        );

        let gated = event(true, 0);
        let admission = admit(&gated, None);
        assert_eq!(
            admission,
            Ok(Admission::Fresh {
                target: RegistrationStatus::Pending
            })
        );
        assert!(!admission.map(|a| a.needs_seat()).unwrap_or(true));
    }

    #[test]
    fn active_rows_block_registration() {
        let open = event(false, 0);
        for status in [RegistrationStatus::Pending, RegistrationStatus::Confirmed] {
            let existing = row(&open, status);
            assert!(matches!(
                admit(&open, Some(&existing)),
                Err(EngineError::AlreadyRegistered { .. })
            ));
        }
    }

    #[test]
    fn rejected_row_is_reactivated() {
        let gated = event(true, 0);
        let existing = row(&gated, RegistrationStatus::Rejected);
        assert_eq!(
            admit(&gated, Some(&existing)),
            Ok(Admission::Reactivate {
                target: RegistrationStatus::Pending
            })
        );
    }

    #[test]
    fn paid_events_require_checkout() {
        let paid = event(false, 50_000);
        assert!(matches!(
            admit(&paid, None),
            Err(EngineError::PaymentRequired { .. })
        ));
    }
}
