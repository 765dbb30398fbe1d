//! # Seatkeeper
//!
//! Application wiring for the registration and capacity engine: environment
//! configuration, Postgres-backed engines, and a log-backed notification sink.
//!
//! ## Example
//!
//! ```no_run
//! use seatkeeper::{Config, Seatkeeper, TracingSink};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let app = Seatkeeper::start(&config, Arc::new(TracingSink)).await?;
//! // ... serve requests through app.registrations / app.payments ...
//! app.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod config;
pub mod sink;

pub use bootstrap::{BootstrapError, Seatkeeper};
pub use config::{Config, ConfigError};
pub use sink::TracingSink;
