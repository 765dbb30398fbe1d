//! # Seatkeeper Runtime
//!
//! The imperative shell around `seatkeeper-core`: engines that read the
//! stores, consult the pure admission and settlement rules, perform the
//! atomic seat-counter writes, and hand notifications to a background
//! dispatcher.
//!
//! ## Core Components
//!
//! - [`RegistrationEngine`]: register, approve, reject, unregister, staff rows
//! - [`ReconciliationEngine`]: checkout and idempotent gateway callbacks
//! - [`EventCatalog`]: organizer publishing and policy edits
//! - [`Notifier`]: fire-and-forget notification queue
//! - [`ConsistencyAudit`]: read-only counter verification
//!
//! ## Example
//!
//! ```ignore
//! use seatkeeper_runtime::{EngineEnvironment, Notifier, RegistrationEngine};
//!
//! let (notifier, _dispatcher) = Notifier::spawn(sink);
//! let env = EngineEnvironment::new(clock, events, registrations, payments, notifier);
//! let engine = RegistrationEngine::new(env);
//!
//! let row = engine.register(event_id, user_id).await?;
//! ```

/// Read-only consistency audit
pub mod audit;

/// Organizer event publishing
pub mod catalog;

/// Injected dependencies
pub mod environment;

/// Health reporting
pub mod health;

/// Prometheus metrics for observability
pub mod metrics;

/// Fire-and-forget notification dispatch
pub mod notifier;

/// Payment reconciliation engine
pub mod reconciliation;

/// Registration engine
pub mod registration;

/// Retry logic with exponential backoff
pub mod retry;

pub use audit::{AuditReport, ConsistencyAudit, EventAudit};
pub use catalog::EventCatalog;
pub use environment::EngineEnvironment;
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use notifier::Notifier;
pub use reconciliation::{ReconciliationEngine, SettlementOutcome};
pub use registration::RegistrationEngine;
pub use retry::RetryPolicy;
