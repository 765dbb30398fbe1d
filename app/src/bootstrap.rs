//! Wiring: pool, migrations, notifier, and engines.

use crate::config::{Config, ConfigError};
use seatkeeper_core::environment::SystemClock;
use seatkeeper_core::notification::NotificationSink;
use seatkeeper_postgres::{PostgresError, PostgresStore};
use seatkeeper_runtime::metrics::MetricsError;
use seatkeeper_runtime::{
    ConsistencyAudit, EngineEnvironment, EventCatalog, Notifier, ReconciliationEngine,
    RegistrationEngine,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// How long shutdown waits for queued notifications
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Errors from starting the application.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Database connection or migration failed
    #[error(transparent)]
    Postgres(#[from] PostgresError),

    /// Metrics exporter could not start
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Open the connection pool described by `config`.
///
/// # Errors
///
/// Returns [`BootstrapError::Postgres`] if the database is unreachable.
pub async fn connect(config: &Config) -> Result<PostgresStore, BootstrapError> {
    Ok(PostgresStore::connect_with(
        &config.database.url,
        config.database.max_connections,
        config.acquire_timeout(),
    )
    .await?)
}

/// Read-only audit over `store`, with the configured retry policy.
#[must_use]
pub fn audit(store: &PostgresStore, config: &Config) -> ConsistencyAudit {
    let shared = Arc::new(store.clone());
    ConsistencyAudit::new(shared.clone(), shared.clone(), shared)
        .with_retry_policy(config.retry_policy())
}

/// The engines wired over one Postgres store.
pub struct Seatkeeper {
    /// Backing store
    pub store: PostgresStore,
    /// Event publishing and edits
    pub catalog: EventCatalog,
    /// Registration lifecycle
    pub registrations: RegistrationEngine,
    /// Checkout and gateway callbacks
    pub payments: ReconciliationEngine,
    /// Read-only consistency audit
    pub audit: ConsistencyAudit,
    notifier: Notifier,
    dispatcher: JoinHandle<()>,
}

impl Seatkeeper {
    /// Connect, apply migrations, and wire the engines.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if the database is unreachable or a
    /// migration fails.
    pub async fn start(
        config: &Config,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, BootstrapError> {
        let store = connect(config).await?;
        store.migrate().await?;
        Ok(Self::wire(store, config, sink))
    }

    /// Wire the engines over an existing store.
    ///
    /// Must be called inside a Tokio runtime (the notifier spawns a task).
    #[must_use]
    pub fn wire(store: PostgresStore, config: &Config, sink: Arc<dyn NotificationSink>) -> Self {
        let (notifier, dispatcher) = Notifier::spawn_with(
            sink,
            config.notifications.queue_capacity,
            config.delivery_timeout(),
        );
        let shared = Arc::new(store.clone());
        let env = EngineEnvironment::new(
            Arc::new(SystemClock),
            shared.clone(),
            shared.clone(),
            shared,
            notifier.clone(),
        )
        .with_retry_policy(config.retry_policy());

        tracing::info!(
            max_connections = config.database.max_connections,
            queue_capacity = config.notifications.queue_capacity,
            "Seatkeeper wired"
        );

        Self {
            catalog: EventCatalog::new(env.clone()),
            registrations: RegistrationEngine::new(env.clone()),
            payments: ReconciliationEngine::new(env),
            audit: audit(&store, config),
            store,
            notifier,
            dispatcher,
        }
    }

    /// Drain queued notifications and stop the dispatcher.
    pub async fn shutdown(self) {
        let Self {
            store,
            catalog,
            registrations,
            payments,
            audit,
            notifier,
            dispatcher,
        } = self;

        if tokio::time::timeout(SHUTDOWN_GRACE, notifier.flush())
            .await
            .is_err()
        {
            tracing::warn!("Notification queue did not drain before shutdown");
        }

        // The dispatcher exits once every sender is gone.
        drop((catalog, registrations, payments, audit, notifier));
        if tokio::time::timeout(SHUTDOWN_GRACE, dispatcher).await.is_err() {
            tracing::warn!("Notification dispatcher did not stop in time");
        }
        store.pool().close().await;
        tracing::info!("Seatkeeper stopped");
    }
}
