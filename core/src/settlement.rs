//! Settlement vocabulary and the payment transition rule.
//!
//! Gateways deliver callbacks at-least-once and in any order. [`decide`] is
//! the pure rule that folds one delivery into the current status; the ledger
//! then applies the chosen transition as a compare-and-set.

use crate::types::PaymentStatus;

/// Map a gateway status string onto the internal tri-state.
///
/// Matching is case-insensitive. Returns `None` for vocabulary we do not know,
/// which the engine reports instead of guessing.
#[must_use]
pub fn map_external_status(external: &str) -> Option<PaymentStatus> {
    match external.trim().to_ascii_uppercase().as_str() {
        "DONE" | "COMPLETED" | "PAID" | "SUCCEEDED" | "SUCCESS" | "CAPTURED" => {
            Some(PaymentStatus::Completed)
        }
        "CANCELED" | "CANCELLED" | "ABORTED" | "EXPIRED" | "FAILED" | "DECLINED" => {
            Some(PaymentStatus::Failed)
        }
        "READY" | "IN_PROGRESS" | "WAITING_FOR_DEPOSIT" | "PENDING" | "PROCESSING"
        | "REQUIRES_ACTION" => Some(PaymentStatus::Pending),
        _ => None,
    }
}

/// Why a delivery changes nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The payment is already COMPLETED; nothing may follow
    AlreadyCompleted,
    /// Same status delivered again
    Duplicate,
    /// A PENDING report arrived after the payment had already FAILED
    Stale,
}

impl IgnoreReason {
    /// Stable label for logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyCompleted => "already_completed",
            Self::Duplicate => "duplicate",
            Self::Stale => "stale",
        }
    }
}

/// What to do with one delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettlementDecision {
    /// Compare-and-set `current -> next`
    Apply {
        /// Status to write
        next: PaymentStatus,
    },
    /// No-op
    Ignore(IgnoreReason),
}

/// Fold an incoming status into the current one.
///
/// COMPLETED is terminal. FAILED can still become COMPLETED (a late success
/// after a timeout report) but never falls back to PENDING.
#[must_use]
pub const fn decide(current: PaymentStatus, incoming: PaymentStatus) -> SettlementDecision {
    use PaymentStatus::{Completed, Failed, Pending};

    match (current, incoming) {
        (Completed, _) => SettlementDecision::Ignore(IgnoreReason::AlreadyCompleted),
        (Pending, Pending) | (Failed, Failed) => {
            SettlementDecision::Ignore(IgnoreReason::Duplicate)
        }
        (Failed, Pending) => SettlementDecision::Ignore(IgnoreReason::Stale),
        (Pending | Failed, next) => SettlementDecision::Apply { next },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_gateway_vocabulary() {
        assert_eq!(map_external_status("DONE"), Some(PaymentStatus::Completed));
        assert_eq!(map_external_status("succeeded"), Some(PaymentStatus::Completed));
        assert_eq!(map_external_status(" Canceled "), Some(PaymentStatus::Failed));
        assert_eq!(
            map_external_status("WAITING_FOR_DEPOSIT"),
            Some(PaymentStatus::Pending)
        );
        assert_eq!(map_external_status("PARTIAL_CANCELED"), None);
        assert_eq!(map_external_status(""), None);
    }

    #[test]
    fn completed_is_terminal() {
        for incoming in [
            PaymentStatus::Pending,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
        ] {
            assert_eq!(
                decide(PaymentStatus::Completed, incoming),
                SettlementDecision::Ignore(IgnoreReason::AlreadyCompleted)
            );
        }
    }

    #[test]
    fn pending_moves_forward() {
        assert_eq!(
            decide(PaymentStatus::Pending, PaymentStatus::Completed),
            SettlementDecision::Apply {
                next: PaymentStatus::Completed
            }
        );
        assert_eq!(
            decide(PaymentStatus::Pending, PaymentStatus::Failed),
            SettlementDecision::Apply {
                next: PaymentStatus::Failed
            }
        );
    }

    #[test]
    fn failed_accepts_late_success_but_not_pending() {
        assert_eq!(
            decide(PaymentStatus::Failed, PaymentStatus::Completed),
            SettlementDecision::Apply {
                next: PaymentStatus::Completed
            }
        );
        assert_eq!(
            decide(PaymentStatus::Failed, PaymentStatus::Pending),
            SettlementDecision::Ignore(IgnoreReason::Stale)
        );
    }
}
