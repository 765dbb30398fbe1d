//! Row decoding and integer conversions.
//!
//! Counters are `u32` in the domain and `INTEGER` in the schema; amounts are
//! `u64` and `BIGINT`. Values that do not fit either way are rejected rather
//! than truncated.

use seatkeeper_core::error::{StoreError, StoreResult};
use seatkeeper_core::types::{
    Event, EventId, Money, Payment, PaymentId, PaymentStatus, Registration, RegistrationId,
    RegistrationStatus, Role, SeatAllocation, UserId,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

pub(crate) const EVENT_COLUMNS: &str = "id, organizer_id, title, capacity, attendee_count, \
     require_approval, ticket_price, created_at, updated_at";

pub(crate) const REGISTRATION_COLUMNS: &str =
    "id, event_id, user_id, role, status, registered_at, updated_at";

pub(crate) const PAYMENT_COLUMNS: &str = "id, event_id, user_id, quantity, amount, status, \
     external_reference_id, external_tx_id, seat_allocation, created_at, updated_at";

/// Domain count to column value
pub(crate) fn to_db_count(value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::Invalid(format!("{value} exceeds column range")))
}

/// Domain amount to column value
pub(crate) fn to_db_amount(value: Money) -> StoreResult<i64> {
    i64::try_from(value.minor())
        .map_err(|_| StoreError::Invalid(format!("amount {value} exceeds column range")))
}

pub(crate) fn from_db_count(value: i32, column: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} = {value}")))
}

pub(crate) fn from_db_total(value: i64, column: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} = {value}")))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn parse<T>(raw: &str, column: &str, from_str: fn(&str) -> Option<T>) -> StoreResult<T> {
    from_str(raw).ok_or_else(|| StoreError::Corrupt(format!("{column} = {raw}")))
}

pub(crate) fn event_from_row(row: &PgRow) -> StoreResult<Event> {
    let capacity: Option<i32> = get(row, "capacity")?;
    let price: i64 = get(row, "ticket_price")?;
    Ok(Event {
        id: EventId::from_uuid(get::<Uuid>(row, "id")?),
        organizer_id: UserId::from_uuid(get::<Uuid>(row, "organizer_id")?),
        title: get(row, "title")?,
        capacity: capacity
            .map(|c| from_db_count(c, "capacity"))
            .transpose()?,
        attendee_count: from_db_count(get(row, "attendee_count")?, "attendee_count")?,
        require_approval: get(row, "require_approval")?,
        ticket_price: Money::from_minor(
            u64::try_from(price)
                .map_err(|_| StoreError::Corrupt(format!("ticket_price = {price}")))?,
        ),
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn registration_from_row(row: &PgRow) -> StoreResult<Registration> {
    let role: String = get(row, "role")?;
    let status: String = get(row, "status")?;
    Ok(Registration {
        id: RegistrationId::from_uuid(get::<Uuid>(row, "id")?),
        event_id: EventId::from_uuid(get::<Uuid>(row, "event_id")?),
        user_id: UserId::from_uuid(get::<Uuid>(row, "user_id")?),
        role: parse(&role, "role", Role::parse)?,
        status: parse(&status, "status", RegistrationStatus::parse)?,
        registered_at: get(row, "registered_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn payment_from_row(row: &PgRow) -> StoreResult<Payment> {
    let status: String = get(row, "status")?;
    let allocation: String = get(row, "seat_allocation")?;
    let amount: i64 = get(row, "amount")?;
    Ok(Payment {
        id: PaymentId::from_uuid(get::<Uuid>(row, "id")?),
        event_id: EventId::from_uuid(get::<Uuid>(row, "event_id")?),
        user_id: UserId::from_uuid(get::<Uuid>(row, "user_id")?),
        quantity: from_db_count(get(row, "quantity")?, "quantity")?,
        amount: Money::from_minor(
            u64::try_from(amount).map_err(|_| StoreError::Corrupt(format!("amount = {amount}")))?,
        ),
        status: parse(&status, "status", PaymentStatus::parse)?,
        external_reference_id: get(row, "external_reference_id")?,
        external_tx_id: get(row, "external_tx_id")?,
        seat_allocation: parse(&allocation, "seat_allocation", SeatAllocation::parse)?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_outside_column_range_are_rejected() {
        assert_eq!(to_db_count(7), Ok(7));
        assert!(matches!(to_db_count(u32::MAX), Err(StoreError::Invalid(_))));
        assert!(matches!(
            from_db_count(-1, "attendee_count"),
            Err(StoreError::Corrupt(_))
        ));
        assert!(matches!(
            to_db_amount(Money::from_minor(u64::MAX)),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_enum_text_is_corrupt() {
        assert_eq!(
            parse("WAITLISTED", "status", RegistrationStatus::parse),
            Err(StoreError::Corrupt("status = WAITLISTED".to_string()))
        );
    }
}
