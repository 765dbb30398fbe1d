//! Prometheus metrics for the engines, the notification dispatcher, and the audit.
//!
//! Engines record through the `metrics` facade; nothing is exported until a
//! [`MetricsServer`] installs the Prometheus recorder.
//!
//! # Example
//!
//! ```rust,no_run
//! use seatkeeper_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and spawn the HTTP listener.
    ///
    /// Must be called inside a Tokio runtime. If a recorder is already
    /// installed (e.g. a second server in tests) this logs a warning and
    /// leaves the existing recorder in place.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        let addr = self.addr;
        tokio::spawn(async move {
            if exporter.await.is_err() {
                // `ExporterError` implements neither `Debug` nor `Display` in this version.
                tracing::error!(%addr, "Metrics listener stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Registrations
    describe_counter!(
        "seatkeeper.registrations.confirmed",
        "Registrations admitted straight to CONFIRMED"
    );
    describe_counter!(
        "seatkeeper.registrations.pending",
        "Registrations waiting for organizer approval"
    );
    describe_counter!(
        "seatkeeper.registrations.approved",
        "PENDING registrations approved"
    );
    describe_counter!(
        "seatkeeper.registrations.rejected",
        "PENDING registrations rejected"
    );
    describe_counter!(
        "seatkeeper.registrations.withdrawn",
        "CONFIRMED registrations withdrawn by the user"
    );
    describe_counter!(
        "seatkeeper.registrations.refused",
        "Registration attempts refused, labelled by reason"
    );
    describe_counter!(
        "seatkeeper.registrations.staff_added",
        "Staff rows added by organizers"
    );

    // Seats
    describe_counter!("seatkeeper.seats.reserved", "Seats taken on the counter");
    describe_counter!("seatkeeper.seats.released", "Seats freed by withdrawals");
    describe_counter!(
        "seatkeeper.seats.compensated",
        "Seats handed back after a lost row write"
    );
    describe_counter!(
        "seatkeeper.seats.leaked",
        "Seats that could not be handed back; the audit will show drift"
    );

    // Settlements
    describe_counter!("seatkeeper.payments.initiated", "Checkouts started");
    describe_counter!(
        "seatkeeper.settlements.completed",
        "Payments completed with seats allocated"
    );
    describe_counter!("seatkeeper.settlements.failed", "Payments failed");
    describe_counter!(
        "seatkeeper.settlements.overbooked",
        "Payments completed after the event filled up"
    );
    describe_counter!(
        "seatkeeper.settlements.ignored",
        "Gateway deliveries that changed nothing, labelled by reason"
    );
    describe_counter!(
        "seatkeeper.settlements.unknown_status",
        "Gateway deliveries with unknown status vocabulary"
    );
    describe_counter!(
        "seatkeeper.settlements.reallocated",
        "Overbooked payments seated by an operator"
    );
    describe_counter!(
        "seatkeeper.settlements.released",
        "Overbooked payments released for refund"
    );

    // Notifications
    describe_counter!("seatkeeper.notifications.enqueued", "Notifications queued");
    describe_counter!(
        "seatkeeper.notifications.delivered",
        "Notifications accepted by the sink"
    );
    describe_counter!(
        "seatkeeper.notifications.failed",
        "Notifications the sink rejected or timed out on"
    );
    describe_counter!(
        "seatkeeper.notifications.dropped",
        "Notifications dropped because the queue was full or closed"
    );

    // Retry
    describe_counter!("seatkeeper.retry.attempts", "Store calls retried");
    describe_counter!(
        "seatkeeper.retry.recovered",
        "Store calls that succeeded after retrying"
    );
    describe_counter!(
        "seatkeeper.retry.exhausted",
        "Store calls that failed after max retries"
    );

    // Audit
    describe_counter!("seatkeeper.audit.runs", "Consistency audits completed");
    describe_counter!("seatkeeper.audit.drift", "Events found with counter drift");
    describe_histogram!(
        "seatkeeper.audit.duration_seconds",
        "Time taken to audit all events"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        metrics::counter!("seatkeeper.registrations.confirmed").increment(1);

        // If another test installed the recorder first, handle is None.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("seatkeeper_registrations_confirmed"));
        }
    }
}
