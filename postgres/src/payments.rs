//! [`PaymentLedger`] over the `payments` table.
//!
//! `settle` and `reallocate` lock the payment row, run the guarded seat
//! increment on the same transaction, and commit both or neither.

use crate::PostgresStore;
use crate::error::SqlxResultExt;
use crate::events::reserve_on;
use crate::rows::{PAYMENT_COLUMNS, from_db_total, payment_from_row, to_db_amount, to_db_count};
use chrono::{DateTime, Utc};
use seatkeeper_core::error::{StoreError, StoreResult};
use seatkeeper_core::event_store::StoreFuture;
use seatkeeper_core::payment_ledger::{PaymentLedger, Settled, SettlementWrite};
use seatkeeper_core::types::{EventId, Payment, PaymentStatus, SeatAllocation};
use sqlx::{PgConnection, Row};

fn payment_name(reference: &str) -> String {
    format!("payment {reference}")
}

async fn lock_payment(conn: &mut PgConnection, reference: &str) -> StoreResult<Payment> {
    let what = payment_name(reference);
    let row = sqlx::query(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE external_reference_id = $1 FOR UPDATE"
    ))
    .bind(reference)
    .fetch_optional(&mut *conn)
    .await
    .or_store(&what)?
    .ok_or_else(|| StoreError::NotFound(what.clone()))?;
    payment_from_row(&row)
}

fn not_overbooked(payment: &Payment) -> StoreError {
    StoreError::Conflict(format!(
        "payment {} is {}",
        payment.external_reference_id,
        payment.seat_allocation.as_str()
    ))
}

impl PostgresStore {
    async fn insert_payment_impl(&self, payment: Payment) -> StoreResult<Payment> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO payments
                (id, event_id, user_id, quantity, amount, status,
                 external_reference_id, external_tx_id, seat_allocation,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {PAYMENT_COLUMNS}
            "
        ))
        .bind(payment.id.as_uuid())
        .bind(payment.event_id.as_uuid())
        .bind(payment.user_id.as_uuid())
        .bind(to_db_count(payment.quantity)?)
        .bind(to_db_amount(payment.amount)?)
        .bind(payment.status.as_str())
        .bind(&payment.external_reference_id)
        .bind(&payment.external_tx_id)
        .bind(payment.seat_allocation.as_str())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .fetch_one(&self.pool)
        .await
        .or_store(&payment_name(&payment.external_reference_id))?;
        payment_from_row(&row)
    }

    async fn find_by_reference_impl(&self, reference: String) -> StoreResult<Payment> {
        let what = payment_name(&reference);
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE external_reference_id = $1"
        ))
        .bind(&reference)
        .fetch_optional(&self.pool)
        .await
        .or_store(&what)?
        .ok_or(StoreError::NotFound(what))?;
        payment_from_row(&row)
    }

    async fn settle_impl(&self, write: SettlementWrite, now: DateTime<Utc>) -> StoreResult<Settled> {
        let what = payment_name(&write.reference);
        let mut tx = self.pool.begin().await.or_store(&what)?;

        let current = lock_payment(&mut tx, &write.reference).await?;
        if current.status != write.expected {
            return Err(StoreError::UnexpectedPaymentStatus {
                expected: write.expected,
                actual: current.status,
            });
        }

        let seats = if write.next == PaymentStatus::Completed {
            Some(reserve_on(&mut tx, current.event_id, current.quantity).await?)
        } else {
            None
        };
        let allocation = match seats {
            Some(reservation) if reservation.is_reserved() => SeatAllocation::Allocated,
            Some(_) => SeatAllocation::Overbooked,
            None => current.seat_allocation,
        };

        let row = sqlx::query(&format!(
            r"
            UPDATE payments
            SET status = $2,
                seat_allocation = $3,
                external_tx_id = COALESCE($4, external_tx_id),
                updated_at = $5
            WHERE external_reference_id = $1
            RETURNING {PAYMENT_COLUMNS}
            "
        ))
        .bind(&write.reference)
        .bind(write.next.as_str())
        .bind(allocation.as_str())
        .bind(&write.external_tx_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .or_store(&what)?;
        let payment = payment_from_row(&row)?;

        tx.commit().await.or_store(&what)?;

        tracing::debug!(
            reference = %write.reference,
            from = %write.expected,
            to = %write.next,
            allocation = allocation.as_str(),
            "Payment settled"
        );
        Ok(Settled { payment, seats })
    }

    async fn reallocate_impl(&self, reference: String, now: DateTime<Utc>) -> StoreResult<Settled> {
        let what = payment_name(&reference);
        let mut tx = self.pool.begin().await.or_store(&what)?;

        let current = lock_payment(&mut tx, &reference).await?;
        if current.seat_allocation != SeatAllocation::Overbooked {
            return Err(not_overbooked(&current));
        }

        let reservation = reserve_on(&mut tx, current.event_id, current.quantity).await?;
        let payment = if reservation.is_reserved() {
            let row = sqlx::query(&format!(
                r"
                UPDATE payments
                SET seat_allocation = $2, updated_at = $3
                WHERE external_reference_id = $1
                RETURNING {PAYMENT_COLUMNS}
                "
            ))
            .bind(&reference)
            .bind(SeatAllocation::Allocated.as_str())
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .or_store(&what)?;
            payment_from_row(&row)?
        } else {
            current
        };

        tx.commit().await.or_store(&what)?;
        Ok(Settled {
            payment,
            seats: Some(reservation),
        })
    }

    async fn release_overbooked_impl(
        &self,
        reference: String,
        now: DateTime<Utc>,
    ) -> StoreResult<Payment> {
        let what = payment_name(&reference);
        let updated = sqlx::query(&format!(
            r"
            UPDATE payments
            SET seat_allocation = $2, updated_at = $3
            WHERE external_reference_id = $1 AND seat_allocation = $4
            RETURNING {PAYMENT_COLUMNS}
            "
        ))
        .bind(&reference)
        .bind(SeatAllocation::Released.as_str())
        .bind(now)
        .bind(SeatAllocation::Overbooked.as_str())
        .fetch_optional(&self.pool)
        .await
        .or_store(&what)?;

        match updated {
            Some(row) => payment_from_row(&row),
            None => Err(not_overbooked(&self.find_by_reference_impl(reference).await?)),
        }
    }

    async fn list_for_event_impl(&self, event_id: EventId) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE event_id = $1 ORDER BY created_at, id"
        ))
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .or_store(&format!("payments for event {event_id}"))?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn list_overbooked_impl(&self) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE status = $1 AND seat_allocation = $2
            ORDER BY created_at, id
            "
        ))
        .bind(PaymentStatus::Completed.as_str())
        .bind(SeatAllocation::Overbooked.as_str())
        .fetch_all(&self.pool)
        .await
        .or_store("overbooked payments")?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn allocated_seats_impl(&self, event_id: EventId) -> StoreResult<u32> {
        let what = format!("payments for event {event_id}");
        let row = sqlx::query(
            r"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT AS seats FROM payments
            WHERE event_id = $1 AND status = $2 AND seat_allocation = $3
            ",
        )
        .bind(event_id.as_uuid())
        .bind(PaymentStatus::Completed.as_str())
        .bind(SeatAllocation::Allocated.as_str())
        .fetch_one(&self.pool)
        .await
        .or_store(&what)?;

        let seats: i64 = row.try_get("seats").or_store(&what)?;
        from_db_total(seats, "seats")
    }
}

impl PaymentLedger for PostgresStore {
    fn insert_payment(&self, payment: Payment) -> StoreFuture<'_, Payment> {
        Box::pin(self.insert_payment_impl(payment))
    }

    fn find_by_reference(&self, reference: &str) -> StoreFuture<'_, Payment> {
        Box::pin(self.find_by_reference_impl(reference.to_string()))
    }

    fn settle(&self, write: SettlementWrite, now: DateTime<Utc>) -> StoreFuture<'_, Settled> {
        Box::pin(self.settle_impl(write, now))
    }

    fn reallocate(&self, reference: &str, now: DateTime<Utc>) -> StoreFuture<'_, Settled> {
        Box::pin(self.reallocate_impl(reference.to_string(), now))
    }

    fn release_overbooked(&self, reference: &str, now: DateTime<Utc>) -> StoreFuture<'_, Payment> {
        Box::pin(self.release_overbooked_impl(reference.to_string(), now))
    }

    fn list_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<Payment>> {
        Box::pin(self.list_for_event_impl(event_id))
    }

    fn list_overbooked(&self) -> StoreFuture<'_, Vec<Payment>> {
        Box::pin(self.list_overbooked_impl())
    }

    fn allocated_seats(&self, event_id: EventId) -> StoreFuture<'_, u32> {
        Box::pin(self.allocated_seats_impl(event_id))
    }
}
