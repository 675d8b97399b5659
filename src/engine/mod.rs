mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::{has_conflict, ConflictScope};
pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedHallState = Arc<RwLock<HallState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    let result = match append_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
    };
    // Callers are told the whole batch failed, so none of it may survive
    // on disk or in the buffer for the next batch.
    if result.is_err() {
        rollback(wal);
    }
    result
}

fn rollback(wal: &mut Wal) {
    if let Err(e) = wal.discard_unsynced() {
        tracing::error!("failed to discard unsynced WAL bytes: {e}");
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            if result.is_err() {
                rollback(wal);
            }
            let _ = response.send(result);
        }
    }
}

/// Booking lifecycle engine for one organization.
///
/// Each hall's bookings and interval index sit behind one `RwLock`. Every
/// transition on a booking takes its hall's write lock for the whole
/// check-then-write, so role/status checks, the conflict re-check and the
/// WAL append cannot interleave with another transition on the same hall.
pub struct Engine {
    pub(crate) halls: DashMap<Ulid, SharedHallState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → hall id
    pub(super) booking_to_hall: DashMap<Ulid, Ulid>,
    /// Hall name → hall id, for name uniqueness.
    pub(super) hall_names: DashMap<String, Ulid>,
    /// Serializes hall registration (name check + append) and compaction snapshots.
    pub(super) registry_lock: Mutex<()>,
}

/// Apply a booking event to its hall (no locking; caller holds the lock).
fn apply_to_hall(hs: &mut HallState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingSubmitted {
            id,
            hall_id,
            requester_id,
            title,
            description,
            span,
            created_at,
        } => {
            hs.bookings.insert(
                *id,
                Booking {
                    id: *id,
                    hall_id: *hall_id,
                    requester_id: requester_id.clone(),
                    title: title.clone(),
                    description: description.clone(),
                    span: *span,
                    status: Status::PendingFaculty,
                    approvals: [None, None, None],
                    rejected_by: None,
                    rejection_reason: None,
                    created_at: *created_at,
                },
            );
            hs.insert_interval(Interval {
                id: *id,
                span: *span,
                kind: IntervalKind::Pending,
            });
            booking_index.insert(*id, *hall_id);
        }
        Event::BookingAmended {
            id,
            title,
            description,
            ..
        } => {
            if let Some(b) = hs.bookings.get_mut(id) {
                b.title = title.clone();
                b.description = description.clone();
            }
        }
        Event::BookingApproved {
            id,
            stage,
            actor_id,
            status,
            ..
        } => {
            if let Some(b) = hs.bookings.get_mut(id) {
                b.approvals[stage.index()] = Some(actor_id.clone());
                b.status = *status;
            }
            if *status == Status::Confirmed {
                hs.set_interval_kind(*id, IntervalKind::Confirmed);
            }
        }
        Event::BookingRejected {
            id,
            actor_id,
            reason,
            ..
        } => {
            if let Some(b) = hs.bookings.get_mut(id) {
                b.status = Status::Rejected;
                b.rejected_by = Some(actor_id.clone());
                b.rejection_reason = Some(reason.clone());
            }
            hs.remove_interval(*id);
        }
        // Registration is handled at the DashMap level, not here
        Event::HallRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let booking_to_hall = DashMap::new();
        let hall_names = DashMap::new();

        // Rebuild plain state first; nothing else can see it until it is wrapped.
        let mut replayed: HashMap<Ulid, HallState> = HashMap::new();
        for event in &events {
            match event {
                Event::HallRegistered {
                    id,
                    name,
                    capacity,
                    location,
                    amenities,
                } => {
                    hall_names.insert(name.clone(), *id);
                    replayed.insert(
                        *id,
                        HallState::new(Hall {
                            id: *id,
                            name: name.clone(),
                            capacity: *capacity,
                            location: location.clone(),
                            amenities: amenities.clone(),
                        }),
                    );
                }
                other => {
                    if let Some(hs) = replayed.get_mut(&other.hall_id()) {
                        apply_to_hall(hs, other, &booking_to_hall);
                    }
                }
            }
        }

        let halls = DashMap::new();
        for (id, hs) in replayed {
            halls.insert(id, Arc::new(RwLock::new(hs)));
        }
        if !events.is_empty() {
            tracing::info!(
                events = events.len(),
                halls = halls.len(),
                bookings = booking_to_hall.len(),
                "replayed WAL {}",
                wal_path.display()
            );
        }

        Ok(Self {
            halls,
            wal_tx,
            notify,
            booking_to_hall,
            hall_names,
            registry_lock: Mutex::new(()),
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_hall(&self, id: &Ulid) -> Option<SharedHallState> {
        self.halls.get(id).map(|e| e.value().clone())
    }

    pub fn get_hall_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_hall.get(booking_id).map(|e| *e.value())
    }

    /// Clone out every hall handle so no DashMap guard is held across an await.
    pub(super) fn hall_handles(&self) -> Vec<SharedHallState> {
        self.halls.iter().map(|e| e.value().clone()).collect()
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        hall_id: Ulid,
        hs: &mut HallState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_hall(hs, event, &self.booking_to_hall);
        self.notify.send(hall_id, event);
        Ok(())
    }

    /// Lookup booking → hall, get hall, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<HallState>), EngineError> {
        let hall_id = self
            .get_hall_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let hs = self
            .get_hall(&hall_id)
            .ok_or(EngineError::NotFound(hall_id))?;
        let guard = hs.write_owned().await;
        Ok((hall_id, guard))
    }
}
