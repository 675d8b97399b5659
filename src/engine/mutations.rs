use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKING_TRANSITIONS_TOTAL, CONFIRMATION_CONFLICTS_TOTAL};
use crate::workflow::{self, Action, Denial};

use super::conflict::{check_confirmable, check_no_conflict, now_ms, validate_span, validate_text};
use super::{Engine, EngineError, WalCommand};

fn require_role(actor: &Actor, required: Role) -> Result<(), EngineError> {
    if actor.role != required {
        return Err(EngineError::Unauthorized {
            required,
            actual: actor.role,
        });
    }
    Ok(())
}

fn validate_actor(actor: &Actor) -> Result<(), EngineError> {
    validate_text(&actor.id, MAX_ACTOR_ID_LEN, "actor id is empty", "actor id too long")
}

fn validate_description(description: &str) -> Result<(), EngineError> {
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}

fn denial_error(id: Ulid, status: Status, actor: &Actor, denial: Denial) -> EngineError {
    match denial {
        Denial::Stale { .. } | Denial::Terminal | Denial::StagePassed { .. } => {
            EngineError::InvalidState { id, status }
        }
        Denial::WrongRole { required } => EngineError::Unauthorized {
            required,
            actual: actor.role,
        },
    }
}

fn transition_label(status: Status) -> &'static str {
    match status {
        Status::PendingFaculty => "submitted",
        Status::PendingHod | Status::PendingAdmin => "advanced",
        Status::Confirmed => "confirmed",
        Status::Rejected => "rejected",
    }
}

impl Engine {
    pub async fn register_hall(
        &self,
        actor: &Actor,
        name: String,
        capacity: u32,
        location: String,
        amenities: Vec<String>,
    ) -> Result<Hall, EngineError> {
        require_role(actor, Role::Admin)?;
        let name = name.trim().to_string();
        validate_text(&name, MAX_NAME_LEN, "hall name is required", "hall name too long")?;
        if capacity == 0 {
            return Err(EngineError::Validation("capacity must be at least 1"));
        }
        if location.len() > MAX_LOCATION_LEN {
            return Err(EngineError::LimitExceeded("location too long"));
        }
        if amenities.len() > MAX_AMENITIES {
            return Err(EngineError::LimitExceeded("too many amenities"));
        }
        if amenities.iter().any(|a| a.len() > MAX_AMENITY_LEN) {
            return Err(EngineError::LimitExceeded("amenity too long"));
        }

        let _registry = self.registry_lock.lock().await;
        if self.halls.len() >= MAX_HALLS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many halls"));
        }
        if self.hall_names.contains_key(&name) {
            return Err(EngineError::AlreadyExists(name));
        }

        let id = Ulid::new();
        let event = Event::HallRegistered {
            id,
            name: name.clone(),
            capacity,
            location: location.clone(),
            amenities: amenities.clone(),
        };
        self.wal_append(&event).await?;
        let hall = Hall {
            id,
            name: name.clone(),
            capacity,
            location,
            amenities,
        };
        self.halls
            .insert(id, Arc::new(RwLock::new(HallState::new(hall.clone()))));
        self.hall_names.insert(name, id);
        self.notify.send(id, &event);
        info!(hall = %id, name = %hall.name, "hall registered");
        Ok(hall)
    }

    /// Create a booking request in `PENDING_FACULTY`.
    pub async fn submit(
        &self,
        actor: &Actor,
        hall_id: Ulid,
        span: Span,
        title: String,
        description: String,
    ) -> Result<Booking, EngineError> {
        require_role(actor, Role::Requester)?;
        validate_actor(actor)?;
        validate_span(&span)?;
        validate_text(&title, MAX_TITLE_LEN, "event title is required", "title too long")?;
        validate_description(&description)?;

        let hs = self.get_hall(&hall_id).ok_or(EngineError::NotFound(hall_id))?;
        let mut guard = hs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_HALL {
            return Err(EngineError::LimitExceeded("too many bookings on hall"));
        }

        check_no_conflict(&guard, &span)?;

        let id = Ulid::new();
        let event = Event::BookingSubmitted {
            id,
            hall_id,
            requester_id: actor.id.clone(),
            title,
            description,
            span,
            created_at: now_ms(),
        };
        self.persist_and_apply(hall_id, &mut guard, &event).await?;
        metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "transition" => "submitted").increment(1);
        debug!(booking = %id, hall = %hall_id, requester = %actor.id, "booking submitted");

        guard
            .bookings
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Change title/description. Only the requester, only before faculty review.
    pub async fn amend(
        &self,
        actor: &Actor,
        booking_id: Ulid,
        title: String,
        description: String,
    ) -> Result<Booking, EngineError> {
        require_role(actor, Role::Requester)?;
        validate_text(&title, MAX_TITLE_LEN, "event title is required", "title too long")?;
        validate_description(&description)?;

        let (hall_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.requester_id != actor.id {
            return Err(EngineError::NotFound(booking_id));
        }
        if booking.status != Status::PendingFaculty {
            return Err(EngineError::InvalidState {
                id: booking_id,
                status: booking.status,
            });
        }

        let event = Event::BookingAmended {
            id: booking_id,
            hall_id,
            title,
            description,
        };
        self.persist_and_apply(hall_id, &mut guard, &event).await?;
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Advance a booking one stage. `expected` guards against stale clients.
    pub async fn approve(
        &self,
        booking_id: Ulid,
        actor: &Actor,
        expected: Option<Status>,
    ) -> Result<Booking, EngineError> {
        self.transition(booking_id, actor, Action::Approve, expected, None)
            .await
    }

    /// Terminate a booking at its current stage.
    pub async fn reject(
        &self,
        booking_id: Ulid,
        actor: &Actor,
        reason: String,
        expected: Option<Status>,
    ) -> Result<Booking, EngineError> {
        self.transition(booking_id, actor, Action::Reject, expected, Some(reason))
            .await
    }

    /// Check + write under the hall's write lock as one unit.
    async fn transition(
        &self,
        booking_id: Ulid,
        actor: &Actor,
        action: Action,
        expected: Option<Status>,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        validate_actor(actor)?;
        let (hall_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let (status, span) = {
            let booking = guard
                .bookings
                .get(&booking_id)
                .ok_or(EngineError::NotFound(booking_id))?;
            (booking.status, booking.span)
        };

        let stage = workflow::authorize(status, actor.role, expected)
            .map_err(|d| denial_error(booking_id, status, actor, d))?;
        let next = workflow::next_status(status, action).ok_or(EngineError::InvalidState {
            id: booking_id,
            status,
        })?;
        // Gating errors take precedence over a bad reason.
        if let Some(reason) = &reason {
            validate_text(
                reason,
                MAX_REASON_LEN,
                "rejection reason is required",
                "rejection reason too long",
            )?;
        }

        if next == Status::Confirmed
            && let Err(e) = check_confirmable(&guard, booking_id, &span)
        {
            metrics::counter!(CONFIRMATION_CONFLICTS_TOTAL).increment(1);
            info!(booking = %booking_id, hall = %hall_id, "confirmation lost to an overlapping booking");
            return Err(e);
        }

        let event = match action {
            Action::Approve => Event::BookingApproved {
                id: booking_id,
                hall_id,
                stage,
                actor_id: actor.id.clone(),
                status: next,
            },
            Action::Reject => Event::BookingRejected {
                id: booking_id,
                hall_id,
                stage,
                actor_id: actor.id.clone(),
                reason: reason.unwrap_or_default(),
            },
        };
        self.persist_and_apply(hall_id, &mut guard, &event).await?;
        metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "transition" => transition_label(next)).increment(1);
        info!(
            booking = %booking_id,
            hall = %hall_id,
            actor = %actor.id,
            from = %status,
            to = %next,
            "booking transition"
        );

        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    ///
    /// Holds the registry lock and every hall's read lock until the compaction
    /// command is queued, so no append can land between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry_lock.lock().await;

        let mut handles: Vec<(Ulid, super::SharedHallState)> = self
            .halls
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(handles.len());
        for (_, hs) in handles {
            guards.push(hs.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            let hall = &guard.hall;
            events.push(Event::HallRegistered {
                id: hall.id,
                name: hall.name.clone(),
                capacity: hall.capacity,
                location: hall.location.clone(),
                amenities: hall.amenities.clone(),
            });
        }
        for guard in &guards {
            for booking in guard.bookings.values() {
                emit_booking(booking, &mut events);
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        drop(guards);

        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Minimal event sequence that rebuilds `booking` on replay.
fn emit_booking(booking: &Booking, events: &mut Vec<Event>) {
    events.push(Event::BookingSubmitted {
        id: booking.id,
        hall_id: booking.hall_id,
        requester_id: booking.requester_id.clone(),
        title: booking.title.clone(),
        description: booking.description.clone(),
        span: booking.span,
        created_at: booking.created_at,
    });

    let mut status = Status::PendingFaculty;
    for stage in Stage::ALL {
        let Some(actor_id) = booking.approver(stage) else {
            break;
        };
        let Some(next) = workflow::next_status(status, Action::Approve) else {
            break;
        };
        events.push(Event::BookingApproved {
            id: booking.id,
            hall_id: booking.hall_id,
            stage,
            actor_id: actor_id.to_string(),
            status: next,
        });
        status = next;
    }

    if booking.status == Status::Rejected
        && let Some(stage) = status.stage()
    {
        events.push(Event::BookingRejected {
            id: booking.id,
            hall_id: booking.hall_id,
            stage,
            actor_id: booking.rejected_by.clone().unwrap_or_default(),
            reason: booking.rejection_reason.clone().unwrap_or_default(),
        });
    }
}
