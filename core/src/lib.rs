//! # Seatkeeper Core
//!
//! Domain types and persistence seams for the registration and capacity
//! consistency engine.
//!
//! ## Core Concepts
//!
//! - **Event**: capacity policy plus the cached `attendee_count`
//! - **Registration**: one row per `(event, user)`, PENDING/CONFIRMED/REJECTED
//! - **Payment**: a purchase reconciled from gateway callbacks
//! - **Stores**: [`EventStore`], [`RegistrationLedger`], [`PaymentLedger`]
//! - **Notification sink**: fire-and-forget outbound messages
//!
//! ## Architecture Principles
//!
//! - Functional core ([`admission`], [`settlement`]), imperative shell
//!   (engines in `seatkeeper-runtime`)
//! - Every growth of `attendee_count` goes through one atomic conditional
//!   update owned by the store
//! - Dependencies injected as trait objects
//!
//! ## Example
//!
//! ```
//! use seatkeeper_core::admission::{admit, Admission};
//! use seatkeeper_core::types::{Event, EventId, Money, RegistrationStatus, UserId};
//! use chrono::Utc;
//!
//! let now = Utc::now();
//! let event = Event {
//!     id: EventId::new(),
//!     organizer_id: UserId::new(),
//!     title: "Rust meetup".into(),
//!     capacity: Some(2),
//!     attendee_count: 0,
//!     require_approval: false,
//!     ticket_price: Money::ZERO,
//!     created_at: now,
//!     updated_at: now,
//! };
//!
//! assert_eq!(
//!     admit(&event, None),
//!     Ok(Admission::Fresh { target: RegistrationStatus::Confirmed })
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod environment;
pub mod error;
pub mod event_store;
pub mod notification;
pub mod payment_ledger;
pub mod registration_ledger;
pub mod settlement;
pub mod types;

pub use chrono::{DateTime, Utc};
pub use environment::{Clock, SystemClock};
pub use error::{EngineError, EngineResult, StoreError, StoreResult};
pub use event_store::{EventStore, Reservation, StoreFuture};
pub use notification::{Notification, NotificationError, NotificationKind, NotificationSink};
pub use payment_ledger::{PaymentLedger, Settled, SettlementWrite};
pub use registration_ledger::RegistrationLedger;
pub use types::*;
