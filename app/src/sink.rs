//! Notification sink that writes to the log.
//!
//! Stands in for an outbound channel (email, push) until one is configured.
//! Each delivery is one structured `info!` event carrying the JSON payload.

use seatkeeper_core::notification::{Notification, NotificationError, NotificationSink};
use std::future::Future;
use std::pin::Pin;

/// Logs every notification as JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    /// JSON payload for one notification
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError::Rejected`] if the notification cannot be encoded.
    pub fn payload(notification: &Notification) -> Result<String, NotificationError> {
        serde_json::to_string(notification).map_err(|e| NotificationError::Rejected(e.to_string()))
    }
}

impl NotificationSink for TracingSink {
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
        Box::pin(async move {
            let payload = Self::payload(&notification)?;
            tracing::info!(
                user_id = %notification.user_id,
                kind = notification.kind.as_str(),
                %payload,
                "Notification"
            );
            Ok(())
        })
    }
}
