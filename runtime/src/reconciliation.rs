//! Payment reconciliation engine.
//!
//! Folds at-least-once, unordered gateway callbacks into the payment ledger.
//! Each delivery is decided by [`decide`] against the row's current status
//! and then written with one atomic compare-and-set. Only the write that
//! moves a payment INTO `Completed` reserves seats, so a duplicated webhook
//! can never move the counter twice.
//!
//! When the event filled up between checkout and settlement the money has
//! still moved: the payment stays `Completed`, its allocation is flagged
//! `Overbooked`, and an operator resolves it through
//! [`ReconciliationEngine::retry_overbooked`] or
//! [`ReconciliationEngine::release_overbooked`].

use crate::environment::EngineEnvironment;
use crate::retry::retry_transient;
use seatkeeper_core::error::{EngineError, EngineResult, StoreError};
use seatkeeper_core::event_store::Reservation;
use seatkeeper_core::notification::{Notification, NotificationKind};
use seatkeeper_core::payment_ledger::{Settled, SettlementWrite};
use seatkeeper_core::settlement::{IgnoreReason, SettlementDecision, decide, map_external_status};
use seatkeeper_core::types::{EventId, Money, Payment, PaymentStatus, SeatAllocation, UserId};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Compare-and-set attempts per delivery before giving up on a hot row.
const MAX_SETTLE_ATTEMPTS: usize = 4;

/// Prefix of generated gateway reference ids
pub const REFERENCE_PREFIX: &str = "skp_";

/// Result of folding one gateway callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The status changed; a move into `Completed` also allocated the seats.
    Applied {
        /// Payment after the write
        payment: Payment,
    },
    /// The payment completed but its seats did not fit. Flagged for an operator.
    Overbooked {
        /// Payment after the write (`Completed`, allocation `Overbooked`)
        payment: Payment,
    },
    /// Nothing changed.
    Ignored {
        /// Payment as stored
        payment: Payment,
        /// Why the delivery was a no-op
        reason: IgnoreReason,
    },
}

impl SettlementOutcome {
    /// The payment the outcome refers to
    #[must_use]
    pub const fn payment(&self) -> &Payment {
        match self {
            Self::Applied { payment }
            | Self::Overbooked { payment }
            | Self::Ignored { payment, .. } => payment,
        }
    }

    /// Whether the settlement needs an operator decision
    #[must_use]
    pub const fn is_overbooked(&self) -> bool {
        matches!(self, Self::Overbooked { .. })
    }

    /// Treat an overbooked settlement as an error.
    ///
    /// # Errors
    ///
    /// `OverbookedSettlement` for [`SettlementOutcome::Overbooked`].
    pub fn into_result(self) -> EngineResult<Payment> {
        match self {
            Self::Overbooked { payment } => Err(overbooked(&payment)),
            Self::Applied { payment } | Self::Ignored { payment, .. } => Ok(payment),
        }
    }
}

/// Handles checkout creation, gateway callbacks, and overbooked settlements.
#[derive(Clone, Debug)]
pub struct ReconciliationEngine {
    env: EngineEnvironment,
}

impl ReconciliationEngine {
    /// Create an engine over the given environment.
    #[must_use]
    pub const fn new(env: EngineEnvironment) -> Self {
        Self { env }
    }

    /// Start a checkout: record a PENDING payment and return its reference id.
    ///
    /// No seat is reserved until the gateway reports completion.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown event
    /// - `InvalidInput`: free event, zero quantity, or `amount` is not
    ///   `ticket_price × quantity`
    /// - `StoreUnavailable`: persistence unreachable
    #[tracing::instrument(skip_all, fields(%event_id, %user_id, quantity))]
    pub async fn initiate_purchase(
        &self,
        event_id: EventId,
        user_id: UserId,
        quantity: u32,
        amount: Money,
    ) -> EngineResult<String> {
        if quantity == 0 {
            return Err(EngineError::InvalidInput(
                "quantity must be at least 1".to_string(),
            ));
        }

        let event = retry_transient(&self.env.retry, "get_event", || {
            self.env.events.get_event(event_id)
        })
        .await?;

        if !event.is_paid() {
            return Err(EngineError::InvalidInput(format!(
                "event {event_id} is free; register instead"
            )));
        }
        let expected = event.ticket_price.checked_multiply(quantity).ok_or_else(|| {
            EngineError::InvalidInput(format!("{quantity} seats overflow the amount"))
        })?;
        if amount != expected {
            return Err(EngineError::InvalidInput(format!(
                "amount {amount} does not match {quantity} × {}",
                event.ticket_price
            )));
        }

        let reference = new_reference();
        let payment = Payment::new(
            event_id,
            user_id,
            quantity,
            amount,
            reference.clone(),
            self.env.clock.now(),
        );
        self.env.payments.insert_payment(payment).await?;

        tracing::info!(%reference, %amount, "Checkout started");
        metrics::counter!("seatkeeper.payments.initiated").increment(1);
        Ok(reference)
    }

    /// Fold one gateway callback into the ledger.
    ///
    /// Safe to call any number of times with the same arguments.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown reference
    /// - `InvalidInput`: unknown gateway status vocabulary
    /// - `StoreUnavailable`: persistence unreachable after retries
    /// - `Internal`: the row kept changing under concurrent deliveries
    #[tracing::instrument(skip_all, fields(%reference, external_status))]
    pub async fn apply_settlement(
        &self,
        reference: &str,
        external_status: &str,
        external_tx_id: Option<String>,
    ) -> EngineResult<SettlementOutcome> {
        let mut payment = self.find(reference).await?;
        let incoming = map_external_status(external_status).ok_or_else(|| {
            metrics::counter!("seatkeeper.settlements.unknown_status").increment(1);
            EngineError::InvalidInput(format!("unknown gateway status {external_status:?}"))
        })?;

        for _ in 0..MAX_SETTLE_ATTEMPTS {
            let next = match decide(payment.status, incoming) {
                SettlementDecision::Ignore(reason) => {
                    tracing::info!(
                        reason = reason.as_str(),
                        status = %payment.status,
                        "Settlement ignored"
                    );
                    metrics::counter!("seatkeeper.settlements.ignored", "reason" => reason.as_str())
                        .increment(1);
                    return Ok(SettlementOutcome::Ignored { payment, reason });
                }
                SettlementDecision::Apply { next } => next,
            };

            let write = SettlementWrite {
                reference: reference.to_string(),
                expected: payment.status,
                next,
                external_tx_id: external_tx_id.clone(),
            };
            let now = self.env.clock.now();
            let ambiguous = AtomicBool::new(false);
            let settled = retry_transient(&self.env.retry, "settle_payment", || {
                let attempt = self.env.payments.settle(write.clone(), now);
                let ambiguous = &ambiguous;
                async move {
                    let result = attempt.await;
                    if matches!(result, Err(StoreError::Unavailable(_))) {
                        ambiguous.store(true, Ordering::Relaxed);
                    }
                    result
                }
            })
            .await;

            match settled {
                Ok(settled) => return Ok(self.settled(settled).await),
                Err(StoreError::UnexpectedPaymentStatus { actual, .. }) => {
                    payment = self.find(reference).await?;
                    if ambiguous.load(Ordering::Relaxed)
                        && is_own_write(&payment, next, external_tx_id.as_deref())
                    {
                        tracing::info!("Settlement committed despite the store error");
                        let settled = self.recover_settled(payment).await?;
                        return Ok(self.settled(settled).await);
                    }
                    tracing::debug!(%actual, "Payment changed concurrently, re-deciding");
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(EngineError::Internal(format!(
            "payment {reference} kept changing during settlement"
        )))
    }

    /// Completed payments whose seats could not be allocated.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: persistence unreachable after retries
    pub async fn overbooked_settlements(&self) -> EngineResult<Vec<Payment>> {
        let payments = retry_transient(&self.env.retry, "list_overbooked", || {
            self.env.payments.list_overbooked()
        })
        .await?;
        Ok(payments)
    }

    /// Try again to seat an overbooked payment, e.g. after cancellations or a
    /// capacity increase.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown reference
    /// - `InvalidInput`: the payment is not flagged as overbooked
    /// - `OverbookedSettlement`: the seats still do not fit
    /// - `StoreUnavailable`: persistence unreachable after retries
    #[tracing::instrument(skip_all, fields(%reference))]
    pub async fn retry_overbooked(&self, reference: &str) -> EngineResult<Payment> {
        let now = self.env.clock.now();
        let settled = retry_transient(&self.env.retry, "reallocate_payment", || {
            self.env.payments.reallocate(reference, now)
        })
        .await
        .map_err(|error| not_overbooked(error, reference))?;

        match settled.seats {
            Some(Reservation::Reserved { attendee_count }) => {
                tracing::info!(attendee_count, "Overbooked payment seated");
                metrics::counter!("seatkeeper.settlements.reallocated").increment(1);
                metrics::counter!("seatkeeper.seats.reserved")
                    .increment(u64::from(settled.payment.quantity));
                self.notify_completed(&settled.payment);
                Ok(settled.payment)
            }
            _ => {
                tracing::warn!("Overbooked payment still does not fit");
                Err(overbooked(&settled.payment))
            }
        }
    }

    /// Record that an overbooked payment will not be seated. The refund
    /// itself happens outside this system.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown reference
    /// - `InvalidInput`: the payment is not flagged as overbooked
    /// - `StoreUnavailable`: persistence unreachable after retries
    #[tracing::instrument(skip_all, fields(%reference))]
    pub async fn release_overbooked(&self, reference: &str) -> EngineResult<Payment> {
        let now = self.env.clock.now();
        let released = retry_transient(&self.env.retry, "release_overbooked", || {
            self.env.payments.release_overbooked(reference, now)
        })
        .await
        .map_err(|error| not_overbooked(error, reference))?;

        tracing::info!(quantity = released.quantity, "Overbooked payment released for refund");
        metrics::counter!("seatkeeper.settlements.released").increment(1);
        Ok(released)
    }

    /// Load a payment by reference.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown reference
    /// - `StoreUnavailable`: persistence unreachable after retries
    pub async fn payment(&self, reference: &str) -> EngineResult<Payment> {
        self.find(reference).await
    }

    async fn find(&self, reference: &str) -> EngineResult<Payment> {
        let payment = retry_transient(&self.env.retry, "find_payment", || {
            self.env.payments.find_by_reference(reference)
        })
        .await?;
        Ok(payment)
    }

    /// Rebuild the result of a settlement write whose response was lost.
    async fn recover_settled(&self, payment: Payment) -> EngineResult<Settled> {
        if payment.status != PaymentStatus::Completed {
            return Ok(Settled {
                payment,
                seats: None,
            });
        }

        let event = retry_transient(&self.env.retry, "get_event", || {
            self.env.events.get_event(payment.event_id)
        })
        .await?;
        let seats = match payment.seat_allocation {
            SeatAllocation::Overbooked => Some(Reservation::CapacityExceeded {
                capacity: event.capacity,
                attendee_count: event.attendee_count,
            }),
            _ => Some(Reservation::Reserved {
                attendee_count: event.attendee_count,
            }),
        };
        Ok(Settled { payment, seats })
    }

    async fn settled(&self, settled: Settled) -> SettlementOutcome {
        let Settled { payment, seats } = settled;

        match (payment.status, seats) {
            (PaymentStatus::Completed, Some(Reservation::Reserved { attendee_count })) => {
                tracing::info!(
                    quantity = payment.quantity,
                    attendee_count,
                    "Payment completed, seats allocated"
                );
                metrics::counter!("seatkeeper.settlements.completed").increment(1);
                metrics::counter!("seatkeeper.seats.reserved")
                    .increment(u64::from(payment.quantity));
                self.notify_completed(&payment);
                SettlementOutcome::Applied { payment }
            }
            (
                PaymentStatus::Completed,
                Some(Reservation::CapacityExceeded {
                    capacity,
                    attendee_count,
                }),
            ) => {
                tracing::error!(
                    quantity = payment.quantity,
                    ?capacity,
                    attendee_count,
                    "Payment completed but event is full; flagged as overbooked"
                );
                metrics::counter!("seatkeeper.settlements.overbooked").increment(1);
                self.notify_overbooked(&payment).await;
                SettlementOutcome::Overbooked { payment }
            }
            (PaymentStatus::Failed, _) => {
                tracing::info!("Payment failed");
                metrics::counter!("seatkeeper.settlements.failed").increment(1);
                self.env.notifier.notify(Notification::new(
                    payment.user_id,
                    NotificationKind::PaymentFailed,
                    payment.event_id,
                    format!("Payment {} did not go through", payment.external_reference_id),
                ));
                SettlementOutcome::Applied { payment }
            }
            (status, _) => {
                tracing::info!(%status, "Payment status updated");
                SettlementOutcome::Applied { payment }
            }
        }
    }

    fn notify_completed(&self, payment: &Payment) {
        self.env.notifier.notify(Notification::new(
            payment.user_id,
            NotificationKind::PaymentCompleted,
            payment.event_id,
            format!(
                "Payment {} completed; {} seat(s) confirmed",
                payment.external_reference_id, payment.quantity
            ),
        ));
    }

    async fn notify_overbooked(&self, payment: &Payment) {
        self.env.notifier.notify(Notification::new(
            payment.user_id,
            NotificationKind::SettlementOverbooked,
            payment.event_id,
            format!(
                "Payment {} was received but the event is full; the organizer will follow up",
                payment.external_reference_id
            ),
        ));

        match self.env.events.get_event(payment.event_id).await {
            Ok(event) => self.env.notifier.notify(Notification::new(
                event.organizer_id,
                NotificationKind::SettlementOverbooked,
                event.id,
                format!(
                    "Payment {} for {} seat(s) of {} settled after the event filled up",
                    payment.external_reference_id, payment.quantity, event.title
                ),
            )),
            Err(error) => {
                tracing::warn!(%error, "Could not load event to notify organizer");
            }
        }
    }
}

/// Whether the row now carries exactly what this delivery tried to write.
fn is_own_write(payment: &Payment, next: PaymentStatus, external_tx_id: Option<&str>) -> bool {
    payment.status == next
        && external_tx_id.is_none_or(|tx| payment.external_tx_id.as_deref() == Some(tx))
}

fn new_reference() -> String {
    format!("{REFERENCE_PREFIX}{}", Uuid::new_v4().simple())
}

fn overbooked(payment: &Payment) -> EngineError {
    EngineError::OverbookedSettlement {
        reference: payment.external_reference_id.clone(),
        event_id: payment.event_id,
        quantity: payment.quantity,
    }
}

fn not_overbooked(error: StoreError, reference: &str) -> EngineError {
    match error {
        StoreError::Conflict(_) => {
            EngineError::InvalidInput(format!("payment {reference} is not overbooked"))
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_prefixed_and_unique() {
        let a = new_reference();
        let b = new_reference();
        assert!(a.starts_with(REFERENCE_PREFIX));
        assert_eq!(a.len(), REFERENCE_PREFIX.len() + 32);
        assert_ne!(a, b);
    }
}
