//! Notification sink: the fire-and-forget outbound collaborator.
//!
//! Nothing a sink returns is load-bearing. Engines enqueue notifications after
//! their writes commit and never wait on delivery.

use crate::types::{EventId, UserId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// What happened, from the recipient's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Registration admitted immediately
    RegistrationConfirmed,
    /// Registration waiting for approval
    RegistrationPending,
    /// Organizer approved a pending registration
    RegistrationApproved,
    /// Organizer rejected a pending registration
    RegistrationRejected,
    /// User withdrew a confirmed registration
    RegistrationCancelled,
    /// Organizer: a new registration needs a decision
    ApprovalRequested,
    /// Payment settled and seats allocated
    PaymentCompleted,
    /// Payment failed or was cancelled
    PaymentFailed,
    /// Payment settled but the event was already full
    SettlementOverbooked,
}

impl NotificationKind {
    /// Stable label for logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RegistrationConfirmed => "registration_confirmed",
            Self::RegistrationPending => "registration_pending",
            Self::RegistrationApproved => "registration_approved",
            Self::RegistrationRejected => "registration_rejected",
            Self::RegistrationCancelled => "registration_cancelled",
            Self::ApprovalRequested => "approval_requested",
            Self::PaymentCompleted => "payment_completed",
            Self::PaymentFailed => "payment_failed",
            Self::SettlementOverbooked => "settlement_overbooked",
        }
    }
}

/// One outbound message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient
    pub user_id: UserId,
    /// Kind of message
    pub kind: NotificationKind,
    /// Event it concerns
    pub event_id: EventId,
    /// Human-readable text
    pub text: String,
}

impl Notification {
    /// Creates a notification
    #[must_use]
    pub fn new(
        user_id: UserId,
        kind: NotificationKind,
        event_id: EventId,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            event_id,
            text: text.into(),
        }
    }
}

/// Delivery failure. Logged by the dispatcher, never propagated to engine callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The sink could not be reached
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
    /// The sink refused the message
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Receives notifications.
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification.
    ///
    /// # Errors
    ///
    /// Any [`NotificationError`]; callers only log it.
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>>;
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardSink;

impl NotificationSink for DiscardSink {
    fn notify(
        &self,
        _notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
