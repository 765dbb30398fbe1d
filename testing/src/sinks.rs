//! Notification sinks for tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use seatkeeper_core::notification::{
    Notification, NotificationError, NotificationKind, NotificationSink,
};
use seatkeeper_core::types::UserId;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Captures every notification it receives.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far, in delivery order
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }

    /// Kinds received so far, in delivery order
    #[must_use]
    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.kind)
            .collect()
    }

    /// Kinds received by one user
    #[must_use]
    pub fn kinds_for(&self, user_id: UserId) -> Vec<NotificationKind> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.kind)
            .collect()
    }

    /// Forget everything received
    pub fn clear(&self) {
        self.received.lock().unwrap().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
        Box::pin(async move {
            self.received.lock().unwrap().push(notification);
            Ok(())
        })
    }
}

/// Refuses every notification, counting the attempts.
#[derive(Clone, Debug, Default)]
pub struct FailingSink {
    attempts: Arc<AtomicUsize>,
}

impl FailingSink {
    /// Create a sink that always fails
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries attempted so far
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NotificationSink for FailingSink {
    fn notify(
        &self,
        _notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(NotificationError::Unavailable("sink is down".to_string()))
        })
    }
}
