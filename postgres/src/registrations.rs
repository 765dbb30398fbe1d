//! [`RegistrationLedger`] over the `registrations` table.

use crate::PostgresStore;
use crate::error::SqlxResultExt;
use crate::events::release_on;
use crate::rows::{REGISTRATION_COLUMNS, from_db_total, registration_from_row};
use chrono::{DateTime, Utc};
use seatkeeper_core::error::{StoreError, StoreResult};
use seatkeeper_core::event_store::StoreFuture;
use seatkeeper_core::registration_ledger::RegistrationLedger;
use seatkeeper_core::types::{EventId, Registration, RegistrationStatus, Role, UserId};
use sqlx::Row;

fn row_name(event_id: EventId, user_id: UserId) -> String {
    format!("registration of user {user_id} for event {event_id}")
}

impl PostgresStore {
    async fn find_impl(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreResult<Option<Registration>> {
        sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE event_id = $1 AND user_id = $2"
        ))
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .or_store(&row_name(event_id, user_id))?
        .as_ref()
        .map(registration_from_row)
        .transpose()
    }

    async fn insert_impl(&self, registration: Registration) -> StoreResult<Registration> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO registrations
                (id, event_id, user_id, role, status, registered_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {REGISTRATION_COLUMNS}
            "
        ))
        .bind(registration.id.as_uuid())
        .bind(registration.event_id.as_uuid())
        .bind(registration.user_id.as_uuid())
        .bind(registration.role.as_str())
        .bind(registration.status.as_str())
        .bind(registration.registered_at)
        .bind(registration.updated_at)
        .fetch_one(&self.pool)
        .await
        .or_store(&row_name(registration.event_id, registration.user_id))?;
        registration_from_row(&row)
    }

    async fn transition_impl(
        &self,
        event_id: EventId,
        user_id: UserId,
        expected: RegistrationStatus,
        next: RegistrationStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Registration> {
        let what = row_name(event_id, user_id);
        let updated = sqlx::query(&format!(
            r"
            UPDATE registrations
            SET status = $4, updated_at = $5
            WHERE event_id = $1 AND user_id = $2 AND status = $3
            RETURNING {REGISTRATION_COLUMNS}
            "
        ))
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .or_store(&what)?;

        if let Some(row) = updated {
            return registration_from_row(&row);
        }

        // The compare-and-set missed; report what the row holds instead.
        match self.find_impl(event_id, user_id).await? {
            None => Err(StoreError::NotFound(what)),
            Some(row) => Err(StoreError::UnexpectedRegistrationStatus {
                expected,
                actual: row.status,
            }),
        }
    }

    async fn withdraw_confirmed_impl(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreResult<Registration> {
        let what = row_name(event_id, user_id);
        let mut tx = self.pool.begin().await.or_store(&what)?;

        let current = sqlx::query(&format!(
            r"
            SELECT {REGISTRATION_COLUMNS} FROM registrations
            WHERE event_id = $1 AND user_id = $2
            FOR UPDATE
            "
        ))
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .or_store(&what)?
        .ok_or_else(|| StoreError::NotFound(what.clone()))?;
        let row = registration_from_row(&current)?;

        if row.status != RegistrationStatus::Confirmed {
            return Err(StoreError::UnexpectedRegistrationStatus {
                expected: RegistrationStatus::Confirmed,
                actual: row.status,
            });
        }

        sqlx::query("DELETE FROM registrations WHERE id = $1")
            .bind(row.id.as_uuid())
            .execute(&mut *tx)
            .await
            .or_store(&what)?;

        if row.role.occupies_seat() {
            release_on(&mut tx, event_id, 1).await?;
        }

        tx.commit().await.or_store(&what)?;
        Ok(row)
    }

    async fn list_impl(
        &self,
        event_id: EventId,
        status: Option<RegistrationStatus>,
    ) -> StoreResult<Vec<Registration>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {REGISTRATION_COLUMNS} FROM registrations
            WHERE event_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY registered_at, id
            "
        ))
        .bind(event_id.as_uuid())
        .bind(status.map(RegistrationStatus::as_str))
        .fetch_all(&self.pool)
        .await
        .or_store(&format!("registrations for event {event_id}"))?;

        rows.iter().map(registration_from_row).collect()
    }

    async fn count_seated_impl(&self, event_id: EventId) -> StoreResult<u32> {
        let what = format!("registrations for event {event_id}");
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS seated FROM registrations
            WHERE event_id = $1 AND status = $2 AND role = $3
            ",
        )
        .bind(event_id.as_uuid())
        .bind(RegistrationStatus::Confirmed.as_str())
        .bind(Role::Attendee.as_str())
        .fetch_one(&self.pool)
        .await
        .or_store(&what)?;

        let seated: i64 = row.try_get("seated").or_store(&what)?;
        from_db_total(seated, "seated")
    }
}

impl RegistrationLedger for PostgresStore {
    fn find(&self, event_id: EventId, user_id: UserId) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(self.find_impl(event_id, user_id))
    }

    fn insert(&self, registration: Registration) -> StoreFuture<'_, Registration> {
        Box::pin(self.insert_impl(registration))
    }

    fn transition(
        &self,
        event_id: EventId,
        user_id: UserId,
        expected: RegistrationStatus,
        next: RegistrationStatus,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Registration> {
        Box::pin(self.transition_impl(event_id, user_id, expected, next, now))
    }

    fn withdraw_confirmed(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Registration> {
        Box::pin(self.withdraw_confirmed_impl(event_id, user_id))
    }

    fn list(
        &self,
        event_id: EventId,
        status: Option<RegistrationStatus>,
    ) -> StoreFuture<'_, Vec<Registration>> {
        Box::pin(self.list_impl(event_id, status))
    }

    fn count_seated(&self, event_id: EventId) -> StoreFuture<'_, u32> {
        Box::pin(self.count_seated_impl(event_id))
    }
}
