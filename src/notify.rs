use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{ActorId, Event, Status};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-hall change notifications.
///
/// Events are published after they are durable and applied, while the
/// hall's write lock is still held, so a watcher that reads hall state after
/// subscribing never misses an event for a booking it did not see.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Raw subscription to every event of a hall. Creates the channel if needed.
    pub fn subscribe(&self, hall_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(hall_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscription that only yields what `visibility` allows.
    pub fn feed(&self, hall_id: Ulid, visibility: Visibility) -> HallFeed {
        HallFeed {
            rx: self.subscribe(hall_id),
            visibility,
        }
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, hall_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&hall_id) {
            let _ = sender.send(event.clone());
        }
    }
}

/// Which booking events a watcher may receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    /// Approvers see every booking on the hall.
    All,
    /// Requesters see their own bookings only. `owned` holds the ids of their
    /// bookings on the hall; a booking leaves it once its terminal event is delivered.
    Own {
        requester_id: ActorId,
        owned: HashSet<Ulid>,
    },
}

impl Visibility {
    /// Whether `event` may be delivered, tracking the requester's bookings as
    /// they are submitted and reach a terminal status.
    fn admit(&mut self, event: &Event) -> bool {
        let Visibility::Own { requester_id, owned } = self else {
            return true;
        };
        match event {
            Event::HallRegistered { .. } => true,
            Event::BookingSubmitted {
                id,
                requester_id: owner,
                ..
            } => {
                if *owner == *requester_id {
                    owned.insert(*id);
                    true
                } else {
                    false
                }
            }
            Event::BookingAmended { id, .. } => owned.contains(id),
            Event::BookingApproved { id, status, .. } => {
                if *status == Status::Confirmed {
                    owned.remove(id)
                } else {
                    owned.contains(id)
                }
            }
            Event::BookingRejected { id, .. } => owned.remove(id),
        }
    }
}

/// A hall subscription filtered for one watcher.
pub struct HallFeed {
    rx: broadcast::Receiver<Event>,
    visibility: Visibility,
}

impl HallFeed {
    /// Add bookings the requester already owns. No-op for approvers.
    pub fn track(&mut self, bookings: impl IntoIterator<Item = Ulid>) {
        if let Visibility::Own { owned, .. } = &mut self.visibility {
            owned.extend(bookings);
        }
    }

    /// Next event this watcher may see. Lag and close errors pass through.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if self.visibility.admit(&event) {
                return Ok(event);
            }
        }
    }
}
