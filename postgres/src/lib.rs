//! `PostgreSQL` stores for Seatkeeper.
//!
//! [`PostgresStore`] implements all three persistence traits from
//! `seatkeeper-core` over one connection pool:
//!
//! - [`EventStore`](seatkeeper_core::event_store::EventStore): events and the
//!   seat counter, grown only by a guarded `UPDATE ... WHERE`
//! - [`RegistrationLedger`](seatkeeper_core::registration_ledger::RegistrationLedger):
//!   status compare-and-set on `(event_id, user_id)`
//! - [`PaymentLedger`](seatkeeper_core::payment_ledger::PaymentLedger):
//!   settlement and seat increment in one transaction
//!
//! Connection-level failures surface as `StoreError::Unavailable` so the
//! engines can retry them.
//!
//! # Example
//!
//! ```no_run
//! use seatkeeper_postgres::PostgresStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::connect("postgres://localhost/seatkeeper", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod events;
mod payments;
mod registrations;
mod rows;

pub use error::PostgresError;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// How long to wait for a pooled connection before reporting the store unavailable
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// `PostgreSQL`-backed event, registration, and payment store.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with a bounded pool and the default acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Connect`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PostgresError> {
        Self::connect_with(database_url, max_connections, ACQUIRE_TIMEOUT).await
    }

    /// Connect with an explicit acquire timeout.
    ///
    /// A request that waits longer than `acquire_timeout` for a connection
    /// fails as `StoreError::Unavailable`.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Connect`] if the database is unreachable.
    pub async fn connect_with(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, PostgresError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "Connected to postgres");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Migrate`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), PostgresError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Schema migrations applied");
        Ok(())
    }

    /// Round-trip a trivial query, bounded by `timeout`.
    ///
    /// Returns `false` on error or timeout.
    pub async fn ping(&self, timeout: Duration) -> bool {
        let probe = sqlx::query("SELECT 1").execute(&self.pool);
        matches!(tokio::time::timeout(timeout, probe).await, Ok(Ok(_)))
    }
}
