//! Organizer-facing event publishing and policy edits.
//!
//! The catalog never touches `attendee_count`; that belongs to the engines.

use crate::environment::EngineEnvironment;
use crate::retry::retry_transient;
use seatkeeper_core::error::{EngineError, EngineResult};
use seatkeeper_core::types::{Event, EventId, EventUpdate, NewEvent, UserId};

/// Publishes events and applies organizer edits.
#[derive(Clone, Debug)]
pub struct EventCatalog {
    env: EngineEnvironment,
}

impl EventCatalog {
    /// Create a catalog over the given environment.
    #[must_use]
    pub const fn new(env: EngineEnvironment) -> Self {
        Self { env }
    }

    /// Publish a new event with no attendees.
    ///
    /// # Errors
    ///
    /// - `InvalidInput`: blank title or a capacity of zero
    /// - `StoreUnavailable`: persistence unreachable
    #[tracing::instrument(skip_all, fields(organizer_id = %event.organizer_id))]
    pub async fn publish(&self, event: NewEvent) -> EngineResult<Event> {
        validate_title(Some(&event.title))?;
        validate_capacity(Some(event.capacity))?;

        let created = self
            .env
            .events
            .create_event(event, self.env.clock.now())
            .await?;

        tracing::info!(event_id = %created.id, capacity = ?created.capacity, "Event published");
        metrics::counter!("seatkeeper.events.published").increment(1);
        Ok(created)
    }

    /// Apply an organizer edit. Capacity may not drop below the seats already taken.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown event
    /// - `Forbidden`: `actor_id` is not the organizer
    /// - `InvalidInput`: blank title, zero capacity, or capacity below `attendee_count`
    /// - `StoreUnavailable`: persistence unreachable
    #[tracing::instrument(skip_all, fields(%event_id, %actor_id))]
    pub async fn edit(
        &self,
        event_id: EventId,
        actor_id: UserId,
        update: EventUpdate,
    ) -> EngineResult<Event> {
        let event = self.event(event_id).await?;
        if !event.is_organizer(actor_id) {
            return Err(EngineError::Forbidden(format!(
                "only the organizer of event {event_id} may edit it"
            )));
        }
        validate_title(update.title.as_ref())?;
        validate_capacity(update.capacity)?;

        let updated = self
            .env
            .events
            .update_event(event_id, update, self.env.clock.now())
            .await?;

        tracing::info!(capacity = ?updated.capacity, "Event updated");
        Ok(updated)
    }

    /// Load an event.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown event
    /// - `StoreUnavailable`: persistence unreachable after retries
    pub async fn event(&self, event_id: EventId) -> EngineResult<Event> {
        let event = retry_transient(&self.env.retry, "get_event", || {
            self.env.events.get_event(event_id)
        })
        .await?;
        Ok(event)
    }
}

fn validate_title(title: Option<&String>) -> EngineResult<()> {
    match title {
        Some(title) if title.trim().is_empty() => {
            Err(EngineError::InvalidInput("title must not be blank".to_string()))
        }
        _ => Ok(()),
    }
}

fn validate_capacity(capacity: Option<Option<u32>>) -> EngineResult<()> {
    match capacity {
        Some(Some(0)) => Err(EngineError::InvalidInput(
            "capacity must be positive; omit it for unlimited".to_string(),
        )),
        _ => Ok(()),
    }
}
