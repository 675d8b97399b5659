use std::cmp::Reverse;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{HallFeed, Visibility};
use crate::workflow::required_role;

use super::conflict::{self, ConflictScope};
use super::{Engine, EngineError};

impl Engine {
    // ── Hall registry ────────────────────────────────────────

    pub fn exists(&self, hall_id: &Ulid) -> bool {
        self.halls.contains_key(hall_id)
    }

    pub async fn capacity(&self, hall_id: &Ulid) -> Option<u32> {
        let hs = self.get_hall(hall_id)?;
        let guard = hs.read().await;
        Some(guard.hall.capacity)
    }

    pub async fn hall(&self, hall_id: &Ulid) -> Option<Hall> {
        let hs = self.get_hall(hall_id)?;
        let guard = hs.read().await;
        Some(guard.hall.clone())
    }

    /// All halls, ordered by name.
    pub async fn list_halls(&self) -> Vec<Hall> {
        let mut halls = Vec::new();
        for hs in self.hall_handles() {
            halls.push(hs.read().await.hall.clone());
        }
        halls.sort_by(|a, b| a.name.cmp(&b.name));
        halls
    }

    /// Subscribe `actor` to a hall's events, limited to the bookings `get`
    /// would show them.
    pub async fn watch(&self, hall_id: Ulid, actor: &Actor) -> Result<HallFeed, EngineError> {
        let hs = self.get_hall(&hall_id).ok_or(EngineError::NotFound(hall_id))?;
        if actor.role != Role::Requester {
            return Ok(self.notify.feed(hall_id, Visibility::All));
        }
        // Subscribe before reading: anything missed by the read arrives on the feed.
        let mut feed = self.notify.feed(
            hall_id,
            Visibility::Own {
                requester_id: actor.id.clone(),
                owned: Default::default(),
            },
        );
        let guard = hs.read().await;
        feed.track(
            guard
                .bookings
                .values()
                .filter(|b| b.requester_id == actor.id)
                .map(|b| b.id),
        );
        Ok(feed)
    }

    // ── Conflict checker ─────────────────────────────────────

    /// Would `span` overlap an active booking of `hall_id`? Unknown halls have no bookings.
    pub async fn has_conflict(&self, hall_id: Ulid, span: Span, exclude: Option<Ulid>) -> bool {
        let Some(hs) = self.get_hall(&hall_id) else {
            return false;
        };
        let guard = hs.read().await;
        conflict::has_conflict(&guard, &span, exclude, ConflictScope::Active)
    }

    // ── Bookings ─────────────────────────────────────────────

    async fn collect_bookings(&self, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let mut out = Vec::new();
        for hs in self.hall_handles() {
            let guard = hs.read().await;
            out.extend(guard.bookings.values().filter(|&b| keep(b)).cloned());
        }
        out
    }

    /// A single booking. Requesters only see their own.
    pub async fn get(&self, booking_id: Ulid, actor: &Actor) -> Result<Booking, EngineError> {
        let hall_id = self
            .get_hall_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let hs = self
            .get_hall(&hall_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let guard = hs.read().await;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if actor.role == Role::Requester && booking.requester_id != actor.id {
            return Err(EngineError::NotFound(booking_id));
        }
        Ok(booking.clone())
    }

    /// Requesters see their own bookings, approvers see all. Newest first.
    pub async fn list_bookings(&self, actor: &Actor) -> Vec<Booking> {
        let mut bookings = match actor.role {
            Role::Requester => self.collect_bookings(|b| b.requester_id == actor.id).await,
            Role::Faculty | Role::Hod | Role::Admin => self.collect_bookings(|_| true).await,
        };
        bookings.sort_by_key(|b| Reverse((b.created_at, b.id)));
        bookings
    }

    /// Bookings waiting on the actor's role. Oldest first.
    pub async fn queue_for(&self, actor: &Actor) -> Vec<Booking> {
        let role = actor.role;
        let mut queue = self
            .collect_bookings(|b| required_role(b.status) == Some(role))
            .await;
        queue.sort_by_key(|b| (b.created_at, b.id));
        queue
    }

    /// Bookings the actor approved at some stage or rejected. Newest first.
    pub async fn history_for(&self, actor: &Actor) -> Vec<Booking> {
        let mut history = self.collect_bookings(|b| b.acted_on_by(&actor.id)).await;
        history.sort_by_key(|b| Reverse((b.created_at, b.id)));
        history
    }

    /// Active bookings of a hall overlapping `window`, in start order.
    pub async fn schedule(&self, hall_id: Ulid, window: Span) -> Result<Vec<ScheduleEntry>, EngineError> {
        if window.start >= window.end {
            return Err(EngineError::Validation("window start must be before end"));
        }
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let hs = self.get_hall(&hall_id).ok_or(EngineError::NotFound(hall_id))?;
        let guard = hs.read().await;
        Ok(guard
            .overlapping(&window)
            .map(|i| ScheduleEntry {
                booking_id: i.id,
                hall_id,
                start: i.span.start,
                end: i.span.end,
                status: guard
                    .bookings
                    .get(&i.id)
                    .map_or(Status::PendingFaculty, |b| b.status),
            })
            .collect())
    }
}
