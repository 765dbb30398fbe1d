//! Seatkeeper consistency audit
//!
//! Recomputes every event's seat count from registration and payment rows,
//! compares it with the stored `attendee_count`, and lists overbooked
//! payments awaiting an operator decision. Never writes.
//!
//! Prints a JSON report to stdout. Exits 1 when any event drifted.
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/seatkeeper cargo run --bin seatkeeper-audit
//! ```

use anyhow::Context;
use chrono::Utc;
use seatkeeper::Config;
use seatkeeper::bootstrap;
use seatkeeper_runtime::AuditReport;
use seatkeeper_runtime::health::HealthReport;
use seatkeeper_runtime::metrics::MetricsServer;
use serde::Serialize;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Serialize)]
struct Output<'a> {
    health: &'a HealthReport,
    report: &'a AuditReport,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let config = Config::from_env().context("loading configuration")?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| EnvFilter::new("seatkeeper=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut metrics = MetricsServer::new(config.metrics_addr()?);
    metrics.start().context("starting metrics exporter")?;

    let store = bootstrap::connect(&config)
        .await
        .context("connecting to postgres")?;
    let audit = bootstrap::audit(&store, &config);

    let report = audit.run(Utc::now()).await.context("running audit")?;
    let health = report.health();
    println!(
        "{}",
        serde_json::to_string_pretty(&Output {
            health: &health,
            report: &report,
        })?
    );

    let drifted = report.inconsistent().count();
    if !report.overbooked.is_empty() {
        tracing::warn!(
            count = report.overbooked.len(),
            "Overbooked payments await an operator decision"
        );
    }
    if drifted > 0 {
        tracing::error!(
            drifted,
            audited = report.events.len(),
            "Seat counters disagree with source rows"
        );
        return Ok(ExitCode::FAILURE);
    }

    tracing::info!(audited = report.events.len(), "All seat counters consistent");
    Ok(ExitCode::SUCCESS)
}
