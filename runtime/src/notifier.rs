//! Fire-and-forget notification dispatch.
//!
//! Engines hand notifications to a [`Notifier`], which enqueues them on a
//! bounded channel and returns immediately. A background task drains the
//! queue into the [`NotificationSink`]. Sink failures, timeouts, and a full
//! queue are logged and counted; none of them reach the engine caller, and
//! no store lock is ever held while a notification is delivered.

use seatkeeper_core::notification::{Notification, NotificationSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Default queue depth
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default per-delivery timeout
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Deliver(Notification),
    Flush(oneshot::Sender<()>),
}

/// Handle used by the engines to enqueue notifications.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deliver(notification) => f.debug_tuple("Deliver").field(notification).finish(),
            Self::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl Notifier {
    /// Start the dispatcher task with default settings.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn spawn(sink: Arc<dyn NotificationSink>) -> (Self, JoinHandle<()>) {
        Self::spawn_with(sink, DEFAULT_QUEUE_CAPACITY, DEFAULT_DELIVERY_TIMEOUT)
    }

    /// Start the dispatcher task with an explicit queue depth and delivery timeout.
    ///
    /// The task ends once every `Notifier` clone has been dropped and the
    /// queue is drained.
    #[must_use]
    pub fn spawn_with(
        sink: Arc<dyn NotificationSink>,
        queue_capacity: usize,
        delivery_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = tokio::spawn(dispatch(sink, rx, delivery_timeout));
        (Self { tx }, handle)
    }

    /// Enqueue a notification without waiting.
    pub fn notify(&self, notification: Notification) {
        let kind = notification.kind.as_str();
        match self.tx.try_send(Command::Deliver(notification)) {
            Ok(()) => {
                metrics::counter!("seatkeeper.notifications.enqueued", "kind" => kind)
                    .increment(1);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(kind, "Notification queue full, dropping notification");
                metrics::counter!("seatkeeper.notifications.dropped", "kind" => kind)
                    .increment(1);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(kind, "Notification dispatcher stopped, dropping notification");
                metrics::counter!("seatkeeper.notifications.dropped", "kind" => kind)
                    .increment(1);
            }
        }
    }

    /// Wait until everything enqueued before this call has been handed to the sink.
    ///
    /// Returns immediately if the dispatcher has stopped.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn dispatch(
    sink: Arc<dyn NotificationSink>,
    mut rx: mpsc::Receiver<Command>,
    delivery_timeout: Duration,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Deliver(notification) => {
                deliver(sink.as_ref(), notification, delivery_timeout).await;
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Notification dispatcher stopped");
}

async fn deliver(sink: &dyn NotificationSink, notification: Notification, timeout: Duration) {
    let kind = notification.kind.as_str();
    let user_id = notification.user_id;
    let event_id = notification.event_id;

    match tokio::time::timeout(timeout, sink.notify(notification)).await {
        Ok(Ok(())) => {
            metrics::counter!("seatkeeper.notifications.delivered", "kind" => kind).increment(1);
        }
        Ok(Err(error)) => {
            tracing::warn!(kind, %user_id, %event_id, %error, "Notification delivery failed");
            metrics::counter!("seatkeeper.notifications.failed", "kind" => kind).increment(1);
        }
        Err(_) => {
            tracing::warn!(kind, %user_id, %event_id, "Notification delivery timed out");
            metrics::counter!("seatkeeper.notifications.failed", "kind" => kind).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatkeeper_core::notification::{NotificationError, NotificationKind};
    use seatkeeper_core::types::{EventId, UserId};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<NotificationKind>>);

    impl NotificationSink for Collect {
        fn notify(
            &self,
            notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
            Box::pin(async move {
                if let Ok(mut seen) = self.0.lock() {
                    seen.push(notification.kind);
                }
                Ok(())
            })
        }
    }

    struct Hang;

    impl NotificationSink for Hang {
        fn notify(
            &self,
            _notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
            Box::pin(std::future::pending())
        }
    }

    fn sample(kind: NotificationKind) -> Notification {
        Notification::new(UserId::new(), kind, EventId::new(), "hello")
    }

    #[tokio::test]
    async fn delivers_in_order_before_flush_returns() {
        let sink = Arc::new(Collect::default());
        let (notifier, _task) = Notifier::spawn(sink.clone());

        notifier.notify(sample(NotificationKind::RegistrationPending));
        notifier.notify(sample(NotificationKind::RegistrationApproved));
        notifier.flush().await;

        let seen = sink.0.lock().map(|v| v.clone()).unwrap_or_default();
        assert_eq!(
            seen,
            vec![
                NotificationKind::RegistrationPending,
                NotificationKind::RegistrationApproved
            ]
        );
    }

    #[tokio::test]
    async fn hanging_sink_times_out_without_blocking_callers() {
        let (notifier, _task) =
            Notifier::spawn_with(Arc::new(Hang), 4, Duration::from_millis(10));

        notifier.notify(sample(NotificationKind::PaymentCompleted));
        notifier.flush().await;
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (notifier, _task) = Notifier::spawn_with(Arc::new(Hang), 1, Duration::from_secs(60));

        for _ in 0..10 {
            notifier.notify(sample(NotificationKind::RegistrationConfirmed));
        }
    }
}
