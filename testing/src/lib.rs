//! # Seatkeeper Testing
//!
//! Test doubles and helpers for the registration engine.
//!
//! This crate provides:
//! - [`InMemoryStore`]: all three store traits behind one lock
//! - [`FlakyStore`]: fault injection for transient store failures
//! - [`RecordingSink`] / [`FailingSink`]: notification doubles
//! - [`FixedClock`]: deterministic time
//! - [`TestHarness`]: engines wired over the doubles
//!
//! ## Example
//!
//! ```ignore
//! use seatkeeper_testing::TestHarness;
//!
//! #[tokio::test]
//! async fn last_seat() {
//!     let h = TestHarness::new();
//!     let event = h.free_event(Some(1), false).await;
//!
//!     h.registrations.register(event.id, UserId::new()).await.unwrap();
//!     assert!(h.registrations.register(event.id, UserId::new()).await.is_err());
//!     h.assert_consistent(event.id).await;
//! }
//! ```

use chrono::{DateTime, Utc};
use seatkeeper_core::environment::Clock;

pub mod faults;
pub mod harness;
pub mod memory;
pub mod sinks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatkeeper_testing::mocks::FixedClock;
    /// use seatkeeper_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use faults::{Fault, FlakyStore};
pub use harness::{TestHarness, fast_retry};
pub use memory::InMemoryStore;
pub use mocks::{FixedClock, test_clock};
pub use sinks::{FailingSink, RecordingSink};
