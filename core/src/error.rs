//! Error taxonomy.
//!
//! Stores speak [`StoreError`]; the engines translate it into [`EngineError`],
//! the only error type callers see.

use crate::types::{EventId, PaymentStatus, RegistrationStatus, UserId};
use thiserror::Error;

/// Errors returned by the persistence traits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness constraint or compare-and-set precondition failed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A registration row was not in the expected status.
    #[error("registration is {actual}, expected {expected}")]
    UnexpectedRegistrationStatus {
        /// Status the caller required
        expected: RegistrationStatus,
        /// Status found in the store
        actual: RegistrationStatus,
    },

    /// A payment row was not in the expected status.
    #[error("payment is {actual}, expected {expected}")]
    UnexpectedPaymentStatus {
        /// Status the caller required
        expected: PaymentStatus,
        /// Status found in the store
        actual: PaymentStatus,
    },

    /// A write would violate a store-level invariant (e.g. capacity below count).
    #[error("invalid write: {0}")]
    Invalid(String),

    /// The backing store is temporarily unreachable. Retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted value could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The backend rejected the operation for a non-transient reason.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether the failure is transient and worth retrying
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors surfaced by the registration and reconciliation engines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Event, registration, or payment absent.
    #[error("{0} not found")]
    NotFound(String),

    /// The actor is not allowed to perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The user already holds a pending or confirmed registration.
    #[error("user {user_id} is already registered for event {event_id}")]
    AlreadyRegistered {
        /// Event
        event_id: EventId,
        /// User
        user_id: UserId,
    },

    /// Capacity was exhausted at the atomic check.
    #[error("event {event_id} is full")]
    EventFull {
        /// Event
        event_id: EventId,
    },

    /// A payment settled after the event filled up; needs an operator decision.
    #[error("payment {reference} settled but event {event_id} has no room for {quantity} seats")]
    OverbookedSettlement {
        /// Gateway reference of the flagged payment
        reference: String,
        /// Event
        event_id: EventId,
        /// Seats that could not be allocated
        quantity: u32,
    },

    /// Seats for a paid event must be bought through checkout.
    #[error("event {event_id} requires payment")]
    PaymentRequired {
        /// Event
        event_id: EventId,
    },

    /// The request is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persistence was unreachable after bounded retries.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Persistence returned something the engine cannot interpret.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this is an ordinary business outcome rather than a server fault.
    ///
    /// Callers render expected outcomes without alarm.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        !matches!(self, Self::StoreUnavailable(_) | Self::Internal(_))
    }

    /// Stable machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::AlreadyRegistered { .. } => "ALREADY_REGISTERED",
            Self::EventFull { .. } => "EVENT_FULL",
            Self::OverbookedSettlement { .. } => "OVERBOOKED_SETTLEMENT",
            Self::PaymentRequired { .. } => "PAYMENT_REQUIRED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
            StoreError::Invalid(reason) => Self::InvalidInput(reason),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
