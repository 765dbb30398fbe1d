//! Domain types for the registration and capacity engine.
//!
//! Identifiers, the `Money` value object, and the three persisted records:
//! [`Event`], [`Registration`], and [`Payment`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing `Uuid`
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner `Uuid`
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Unique identifier for an event
    EventId
);
uuid_identifier!(
    /// Unique identifier for a user (issued by the external identity provider)
    UserId
);
uuid_identifier!(
    /// Unique identifier for a registration row
    RegistrationId
);
uuid_identifier!(
    /// Unique identifier for a payment row
    PaymentId
);

// ============================================================================
// Money
// ============================================================================

/// An amount in the currency's minor unit.
///
/// Stored as an integer to avoid floating-point drift. A zero ticket price
/// marks a free event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount (free)
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(units: u64) -> Self {
        Self(units)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Multiplies by a seat quantity, returning `None` on overflow
    #[must_use]
    pub fn checked_multiply(self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(u64::from(quantity)).map(Self)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Event
// ============================================================================

/// An organizer-published event with its capacity policy and cached counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Immutable identifier
    pub id: EventId,
    /// The user allowed to approve, reject, and edit
    pub organizer_id: UserId,
    /// Display title
    pub title: String,
    /// Seat limit; `None` means unlimited
    pub capacity: Option<u32>,
    /// Seats currently occupied (confirmed attendees plus allocated paid seats)
    pub attendee_count: u32,
    /// Whether registrations wait for organizer approval
    pub require_approval: bool,
    /// Price per seat; zero means free
    pub ticket_price: Money,
    /// When the event was created
    pub created_at: DateTime<Utc>,
    /// When the event was last modified
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Whether seats must be bought through the payment flow
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        !self.ticket_price.is_zero()
    }

    /// Whether `actor` may manage registrations for this event
    #[must_use]
    pub fn is_organizer(&self, actor: UserId) -> bool {
        self.organizer_id == actor
    }

    /// Remaining seats, `None` when unlimited
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.capacity
            .map(|capacity| capacity.saturating_sub(self.attendee_count))
    }

    /// Whether `n` more seats fit under the current capacity
    #[must_use]
    pub fn fits(&self, n: u32) -> bool {
        fits_capacity(self.capacity, self.attendee_count, n)
    }
}

/// The conditional-increment rule shared by every store implementation.
///
/// `count + n <= capacity`, computed without overflow; unlimited always fits.
#[must_use]
pub fn fits_capacity(capacity: Option<u32>, count: u32, n: u32) -> bool {
    match capacity {
        None => count.checked_add(n).is_some(),
        Some(capacity) => count.checked_add(n).is_some_and(|next| next <= capacity),
    }
}

/// Fields supplied by an organizer when publishing an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Publishing organizer
    pub organizer_id: UserId,
    /// Display title
    pub title: String,
    /// Seat limit; `None` means unlimited
    pub capacity: Option<u32>,
    /// Whether registrations need approval
    pub require_approval: bool,
    /// Price per seat
    pub ticket_price: Money,
}

/// Organizer edits to an existing event. `None` leaves a field unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUpdate {
    /// New title
    pub title: Option<String>,
    /// New capacity (`Some(None)` removes the limit)
    pub capacity: Option<Option<u32>>,
    /// New approval policy
    pub require_approval: Option<bool>,
    /// New ticket price
    pub ticket_price: Option<Money>,
}

// ============================================================================
// Registration
// ============================================================================

/// Participation role. Only [`Role::Attendee`] occupies a seat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Regular participant, counted against capacity
    Attendee,
    /// Invited speaker
    Speaker,
    /// Co-organizer
    Organizer,
    /// Staff manager
    Manager,
}

impl Role {
    /// Whether a confirmed row with this role holds a seat
    #[must_use]
    pub const fn occupies_seat(self) -> bool {
        matches!(self, Self::Attendee)
    }

    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attendee => "ATTENDEE",
            Self::Speaker => "SPEAKER",
            Self::Organizer => "ORGANIZER",
            Self::Manager => "MANAGER",
        }
    }

    /// Parses the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ATTENDEE" => Some(Self::Attendee),
            "SPEAKER" => Some(Self::Speaker),
            "ORGANIZER" => Some(Self::Organizer),
            "MANAGER" => Some(Self::Manager),
            _ => None,
        }
    }
}

/// Registration lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    /// Waiting for organizer approval; holds no seat
    Pending,
    /// Admitted
    Confirmed,
    /// Declined by the organizer; the row is kept for re-registration
    Rejected,
}

impl RegistrationStatus {
    /// Whether the row blocks a new registration for the same user
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Rejected => "REJECTED",
        }
    }

    /// Parses the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "CONFIRMED" => Some(Self::Confirmed),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's participation in one event. At most one row per `(event_id, user_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Row identifier
    pub id: RegistrationId,
    /// Event registered for
    pub event_id: EventId,
    /// Registered user
    pub user_id: UserId,
    /// Participation role
    pub role: Role,
    /// Current status
    pub status: RegistrationStatus,
    /// First registration attempt
    pub registered_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    /// Creates a new row for a first registration attempt
    #[must_use]
    pub fn new(
        event_id: EventId,
        user_id: UserId,
        role: Role,
        status: RegistrationStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RegistrationId::new(),
            event_id,
            user_id,
            role,
            status,
            registered_at: now,
            updated_at: now,
        }
    }

    /// Whether this row currently holds a seat
    #[must_use]
    pub fn holds_seat(&self) -> bool {
        self.role.occupies_seat() && self.status == RegistrationStatus::Confirmed
    }
}

// ============================================================================
// Payment
// ============================================================================

/// Internal settlement tri-state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Checkout started, not settled
    Pending,
    /// Money has moved
    Completed,
    /// Gateway reported failure or cancellation
    Failed,
}

impl PaymentStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parses the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a payment's seats are counted in the event's `attendee_count`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatAllocation {
    /// No seats taken yet (payment not completed)
    Unallocated,
    /// Seats counted in `attendee_count`
    Allocated,
    /// Completed after the event filled up; awaiting an operator decision
    Overbooked,
    /// Operator chose not to seat this payment (refund handled out of band)
    Released,
}

impl SeatAllocation {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unallocated => "UNALLOCATED",
            Self::Allocated => "ALLOCATED",
            Self::Overbooked => "OVERBOOKED",
            Self::Released => "RELEASED",
        }
    }

    /// Parses the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNALLOCATED" => Some(Self::Unallocated),
            "ALLOCATED" => Some(Self::Allocated),
            "OVERBOOKED" => Some(Self::Overbooked),
            "RELEASED" => Some(Self::Released),
            _ => None,
        }
    }
}

/// A ticket purchase tracked against the payment gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Row identifier
    pub id: PaymentId,
    /// Event the seats are for
    pub event_id: EventId,
    /// Purchasing user
    pub user_id: UserId,
    /// Seats purchased
    pub quantity: u32,
    /// Total charged
    pub amount: Money,
    /// Settlement status
    pub status: PaymentStatus,
    /// Correlates with the gateway's record; unique
    pub external_reference_id: String,
    /// Gateway transaction id, kept for audit once reported
    pub external_tx_id: Option<String>,
    /// Seat accounting state
    pub seat_allocation: SeatAllocation,
    /// When checkout started
    pub created_at: DateTime<Utc>,
    /// Last settlement change
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment
    #[must_use]
    pub fn new(
        event_id: EventId,
        user_id: UserId,
        quantity: u32,
        amount: Money,
        external_reference_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            event_id,
            user_id,
            quantity,
            amount,
            status: PaymentStatus::Pending,
            external_reference_id,
            external_tx_id: None,
            seat_allocation: SeatAllocation::Unallocated,
            created_at: now,
            updated_at: now,
        }
    }

    /// Seats this payment contributes to `attendee_count`
    #[must_use]
    pub const fn allocated_seats(&self) -> u32 {
        match (self.status, self.seat_allocation) {
            (PaymentStatus::Completed, SeatAllocation::Allocated) => self.quantity,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_multiplies_by_quantity_until_overflow() {
        assert_eq!(
            Money::from_minor(2_500).checked_multiply(4),
            Some(Money::from_minor(10_000))
        );
        assert_eq!(Money::from_minor(7).checked_multiply(0), Some(Money::ZERO));
        assert_eq!(Money::from_minor(u64::MAX).checked_multiply(2), None);
    }

    #[test]
    fn capacity_rule_handles_unlimited_and_bounds() {
        assert!(fits_capacity(None, 10_000, 5));
        assert!(fits_capacity(Some(2), 1, 1));
        assert!(!fits_capacity(Some(2), 2, 1));
        assert!(!fits_capacity(Some(3), 2, 2));
        assert!(!fits_capacity(None, u32::MAX, 1));
    }

    #[test]
    fn only_confirmed_attendees_hold_seats() {
        let now = Utc::now();
        let event_id = EventId::new();
        let mut row = Registration::new(
            event_id,
            UserId::new(),
            Role::Attendee,
            RegistrationStatus::Pending,
            now,
        );
        assert!(!row.holds_seat());

        row.status = RegistrationStatus::Confirmed;
        assert!(row.holds_seat());

        row.role = Role::Speaker;
        assert!(!row.holds_seat());
    }

    #[test]
    fn status_strings_parse_back() {
        for status in [
            RegistrationStatus::Pending,
            RegistrationStatus::Confirmed,
            RegistrationStatus::Rejected,
        ] {
            assert_eq!(RegistrationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(Role::parse("HOST"), None);
        assert_eq!(SeatAllocation::parse("overbooked"), None);
    }

    #[test]
    fn only_allocated_completed_payments_count() {
        let mut payment = Payment::new(
            EventId::new(),
            UserId::new(),
            2,
            Money::from_minor(100_000),
            "ref".to_string(),
            Utc::now(),
        );
        assert_eq!(payment.allocated_seats(), 0);

        payment.status = PaymentStatus::Completed;
        payment.seat_allocation = SeatAllocation::Overbooked;
        assert_eq!(payment.allocated_seats(), 0);

        payment.seat_allocation = SeatAllocation::Allocated;
        assert_eq!(payment.allocated_seats(), 2);
    }

    proptest::proptest! {
        #[test]
        fn capacity_rule_never_admits_past_capacity(
            capacity in 1u32..500,
            count in 0u32..500,
            n in 1u32..20,
        ) {
            if fits_capacity(Some(capacity), count, n) {
                proptest::prop_assert!(count + n <= capacity);
            } else {
                proptest::prop_assert!(count + n > capacity);
            }
        }
    }

    #[test]
    fn statuses_serialize_screaming_case() {
        let json = serde_json::to_string(&RegistrationStatus::Confirmed).unwrap_or_default();
        assert_eq!(json, "\"CONFIRMED\"");
    }
}
