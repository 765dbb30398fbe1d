//! [`EventStore`] over the `events` table.

use crate::PostgresStore;
use crate::error::SqlxResultExt;
use crate::rows::{EVENT_COLUMNS, event_from_row, from_db_count, to_db_amount, to_db_count};
use chrono::{DateTime, Utc};
use seatkeeper_core::error::{StoreError, StoreResult};
use seatkeeper_core::event_store::{EventStore, Reservation, StoreFuture};
use seatkeeper_core::types::{Event, EventId, EventUpdate, NewEvent};
use sqlx::{PgConnection, Row};

/// Guarded increment on any connection, so settlement can run it inside its
/// own transaction.
///
/// The capacity check and the write are one statement; Postgres holds the
/// row lock between them.
pub(crate) async fn reserve_on(
    conn: &mut PgConnection,
    id: EventId,
    n: u32,
) -> StoreResult<Reservation> {
    let what = format!("event {id}");
    let seats = to_db_count(n)?;

    let updated = sqlx::query(
        r"
        UPDATE events
        SET attendee_count = attendee_count + $2
        WHERE id = $1
          AND (capacity IS NULL OR attendee_count + $2 <= capacity)
        RETURNING attendee_count
        ",
    )
    .bind(id.as_uuid())
    .bind(seats)
    .fetch_optional(&mut *conn)
    .await
    .or_store(&what)?;

    if let Some(row) = updated {
        let count: i32 = row.try_get("attendee_count").or_store(&what)?;
        return Ok(Reservation::Reserved {
            attendee_count: from_db_count(count, "attendee_count")?,
        });
    }

    // Nothing matched: either the event is gone or the seats did not fit.
    let current = sqlx::query("SELECT capacity, attendee_count FROM events WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .or_store(&what)?
        .ok_or_else(|| StoreError::NotFound(what.clone()))?;

    let capacity: Option<i32> = current.try_get("capacity").or_store(&what)?;
    let count: i32 = current.try_get("attendee_count").or_store(&what)?;
    Ok(Reservation::CapacityExceeded {
        capacity: capacity
            .map(|c| from_db_count(c, "capacity"))
            .transpose()?,
        attendee_count: from_db_count(count, "attendee_count")?,
    })
}

/// Decrement floored at zero.
pub(crate) async fn release_on(conn: &mut PgConnection, id: EventId, n: u32) -> StoreResult<u32> {
    let what = format!("event {id}");
    let row = sqlx::query(
        r"
        UPDATE events
        SET attendee_count = GREATEST(attendee_count - $2, 0)
        WHERE id = $1
        RETURNING attendee_count
        ",
    )
    .bind(id.as_uuid())
    .bind(to_db_count(n)?)
    .fetch_optional(&mut *conn)
    .await
    .or_store(&what)?
    .ok_or_else(|| StoreError::NotFound(what.clone()))?;

    let count: i32 = row.try_get("attendee_count").or_store(&what)?;
    from_db_count(count, "attendee_count")
}

impl PostgresStore {
    async fn create_event_impl(&self, event: NewEvent, now: DateTime<Utc>) -> StoreResult<Event> {
        if event.capacity == Some(0) {
            return Err(StoreError::Invalid("capacity must be positive".into()));
        }
        let id = EventId::new();
        let capacity = event.capacity.map(to_db_count).transpose()?;

        let row = sqlx::query(&format!(
            r"
            INSERT INTO events
                (id, organizer_id, title, capacity, attendee_count,
                 require_approval, ticket_price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $7)
            RETURNING {EVENT_COLUMNS}
            "
        ))
        .bind(id.as_uuid())
        .bind(event.organizer_id.as_uuid())
        .bind(&event.title)
        .bind(capacity)
        .bind(event.require_approval)
        .bind(to_db_amount(event.ticket_price)?)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .or_store(&format!("event {id}"))?;

        tracing::info!(event_id = %id, capacity = ?event.capacity, "Event created");
        event_from_row(&row)
    }

    async fn get_event_impl(&self, id: EventId) -> StoreResult<Event> {
        let what = format!("event {id}");
        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .or_store(&what)?
            .ok_or(StoreError::NotFound(what))?;
        event_from_row(&row)
    }

    async fn update_event_impl(
        &self,
        id: EventId,
        update: EventUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Event> {
        let what = format!("event {id}");
        let mut tx = self.pool.begin().await.or_store(&what)?;

        // Lock the row so a concurrent reservation cannot slip past the
        // capacity check below.
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .or_store(&what)?
        .ok_or_else(|| StoreError::NotFound(what.clone()))?;
        let mut event = event_from_row(&row)?;

        if let Some(capacity) = update.capacity {
            match capacity {
                Some(0) => return Err(StoreError::Invalid("capacity must be positive".into())),
                Some(c) if c < event.attendee_count => {
                    return Err(StoreError::Invalid(format!(
                        "capacity {c} is below the {} seats already taken",
                        event.attendee_count
                    )));
                }
                _ => event.capacity = capacity,
            }
        }
        if let Some(title) = update.title {
            event.title = title;
        }
        if let Some(require_approval) = update.require_approval {
            event.require_approval = require_approval;
        }
        if let Some(price) = update.ticket_price {
            event.ticket_price = price;
        }

        let row = sqlx::query(&format!(
            r"
            UPDATE events
            SET title = $2, capacity = $3, require_approval = $4,
                ticket_price = $5, updated_at = $6
            WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "
        ))
        .bind(id.as_uuid())
        .bind(&event.title)
        .bind(event.capacity.map(to_db_count).transpose()?)
        .bind(event.require_approval)
        .bind(to_db_amount(event.ticket_price)?)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .or_store(&what)?;

        tx.commit().await.or_store(&what)?;
        event_from_row(&row)
    }

    async fn list_event_ids_impl(&self) -> StoreResult<Vec<EventId>> {
        let rows = sqlx::query("SELECT id FROM events ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .or_store("events")?;
        rows.iter()
            .map(|row| {
                row.try_get::<uuid::Uuid, _>("id")
                    .map(EventId::from_uuid)
                    .or_store("events")
            })
            .collect()
    }

    async fn try_reserve_seats_impl(&self, id: EventId, n: u32) -> StoreResult<Reservation> {
        let mut conn = self.pool.acquire().await.or_store(&format!("event {id}"))?;
        let reservation = reserve_on(&mut conn, id, n).await?;
        tracing::debug!(event_id = %id, seats = n, ?reservation, "Seat reservation");
        Ok(reservation)
    }

    async fn release_seats_impl(&self, id: EventId, n: u32) -> StoreResult<u32> {
        let mut conn = self.pool.acquire().await.or_store(&format!("event {id}"))?;
        release_on(&mut conn, id, n).await
    }
}

impl EventStore for PostgresStore {
    fn create_event(&self, event: NewEvent, now: DateTime<Utc>) -> StoreFuture<'_, Event> {
        Box::pin(self.create_event_impl(event, now))
    }

    fn get_event(&self, id: EventId) -> StoreFuture<'_, Event> {
        Box::pin(self.get_event_impl(id))
    }

    fn update_event(
        &self,
        id: EventId,
        update: EventUpdate,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Event> {
        Box::pin(self.update_event_impl(id, update, now))
    }

    fn list_event_ids(&self) -> StoreFuture<'_, Vec<EventId>> {
        Box::pin(self.list_event_ids_impl())
    }

    fn try_reserve_seats(&self, id: EventId, n: u32) -> StoreFuture<'_, Reservation> {
        Box::pin(self.try_reserve_seats_impl(id, n))
    }

    fn release_seats(&self, id: EventId, n: u32) -> StoreFuture<'_, u32> {
        Box::pin(self.release_seats_impl(id, n))
    }
}
