mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
pub mod status;

pub use availability::{free_windows, is_free, merge_overlapping, subtract_stays};
pub use conflict::stays_conflict;
pub use error::{EngineError, Entity, ErrorKind, Unavailable};

pub(crate) use conflict::today;

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

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
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
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
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking store. One `RoomState` per room behind its own lock: the
/// room is the serialization point for every booking, payment, refund and
/// review that belongs to it.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    /// Unique room number → room id.
    pub(super) room_numbers: DashMap<String, Ulid>,
    /// Reverse lookup: booking id → room id.
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    pub(super) users: DashMap<Ulid, User>,
    /// Lowercased email → user id.
    pub(super) user_emails: DashMap<String, Ulid>,
    pub(super) payments: DashMap<Ulid, Payment>,
    pub(super) refunds: DashMap<Ulid, Refund>,
    pub(super) reviews: DashMap<Ulid, Review>,
    pub(super) settings: std::sync::RwLock<SystemSettings>,
    /// Serializes catalog changes (rooms, users, settings) that check
    /// uniqueness across the whole hotel.
    pub(super) catalog_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a room-scoped event to its RoomState (no locking, caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { room_type, capacity, price, .. } => {
            rs.room.room_type = *room_type;
            rs.room.capacity = *capacity;
            rs.room.price = *price;
        }
        Event::RoomStatusChanged { status, .. } => {
            rs.room.status = *status;
        }
        Event::RoomDeleted { .. } => {
            rs.retired = true;
        }
        Event::BookingCreated {
            id,
            room_id,
            guest_id,
            stay,
            total_price,
            created_at,
            room_status,
        } => {
            rs.insert_booking(Booking {
                id: *id,
                room_id: *room_id,
                guest_id: *guest_id,
                stay: *stay,
                status: BookingStatus::Pending,
                total_price: *total_price,
                created_at: *created_at,
            });
            rs.room.status = *room_status;
            booking_index.insert(*id, *room_id);
        }
        Event::BookingStatusChanged { id, status, room_status, .. } => {
            if let Some(booking) = rs.booking_mut(*id) {
                booking.status = *status;
            }
            rs.room.status = *room_status;
        }
        Event::PaymentStatusChanged {
            booking_id,
            confirms_booking: true,
            ..
        } => {
            if let Some(booking) = rs.booking_mut(*booking_id) {
                booking.status = BookingStatus::Confirmed;
            }
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            room_numbers: DashMap::new(),
            booking_to_room: DashMap::new(),
            users: DashMap::new(),
            user_emails: DashMap::new(),
            payments: DashMap::new(),
            refunds: DashMap::new(),
            reviews: DashMap::new(),
            settings: std::sync::RwLock::new(SystemSettings::default()),
            catalog_lock: Mutex::new(()),
            wal_tx,
            notify,
        };

        // Replay events. We're the sole owner of these Arcs, so try_write
        // always succeeds instantly. Never use blocking_write here because
        // this runs inside an async context.
        for event in &events {
            let room = engine
                .event_room_id(event)
                .and_then(|room_id| engine.room_state(&room_id));
            match room {
                Some(rs) => {
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    engine.apply(Some(&mut *guard), event);
                }
                None => engine.apply(None, event),
            }
        }

        tracing::info!(
            "replayed {} events: {} rooms, {} bookings, {} users",
            events.len(),
            engine.rooms.len(),
            engine.booking_to_room.len(),
            engine.users.len()
        );
        Ok(engine)
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

    /// Apply a committed event to in-memory state. Room-scoped parts go to
    /// `room` (already locked by the caller); catalog and ledger parts go to
    /// the shared maps.
    fn apply(&self, room: Option<&mut RoomState>, event: &Event) {
        if let Some(rs) = room {
            apply_to_room(rs, event, &self.booking_to_room);
        }
        match event {
            Event::RoomCreated {
                id,
                number,
                room_type,
                capacity,
                price,
            } => {
                let rs = RoomState::new(Room {
                    id: *id,
                    number: number.clone(),
                    room_type: *room_type,
                    capacity: *capacity,
                    price: *price,
                    status: RoomStatus::Available,
                });
                self.rooms.insert(*id, Arc::new(RwLock::new(rs)));
                self.room_numbers.insert(number.clone(), *id);
            }
            Event::RoomDeleted { id } => {
                self.rooms.remove(id);
                self.room_numbers.retain(|_, room_id| room_id != id);
                // The room's payments, refunds and reviews go with it.
                let retired: HashSet<Ulid> = self
                    .booking_to_room
                    .iter()
                    .filter(|e| e.value() == id)
                    .map(|e| *e.key())
                    .collect();
                self.booking_to_room.retain(|_, room_id| room_id != id);
                self.payments.retain(|_, p| !retired.contains(&p.booking_id));
                self.refunds.retain(|_, r| !retired.contains(&r.booking_id));
                self.reviews.retain(|_, r| r.room_id != *id);
            }
            Event::UserRegistered { id, name, email, role } => {
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        name: name.clone(),
                        email: email.clone(),
                        role: *role,
                    },
                );
                self.user_emails.insert(email.to_lowercase(), *id);
            }
            Event::PaymentRecorded {
                id,
                booking_id,
                amount,
                method,
                created_at,
            } => {
                self.payments.insert(
                    *id,
                    Payment {
                        id: *id,
                        booking_id: *booking_id,
                        amount: *amount,
                        method: *method,
                        status: PaymentStatus::Pending,
                        created_at: *created_at,
                    },
                );
            }
            Event::PaymentStatusChanged { id, status, .. } => {
                if let Some(mut payment) = self.payments.get_mut(id) {
                    payment.status = *status;
                }
            }
            Event::RefundRequested {
                id,
                booking_id,
                amount,
                reason,
                created_at,
            } => {
                self.refunds.insert(
                    *id,
                    Refund {
                        id: *id,
                        booking_id: *booking_id,
                        amount: *amount,
                        reason: reason.clone(),
                        status: RefundStatus::Pending,
                        created_at: *created_at,
                    },
                );
            }
            Event::RefundCompleted { id, .. } => {
                if let Some(mut refund) = self.refunds.get_mut(id) {
                    refund.status = RefundStatus::Completed;
                }
            }
            Event::ReviewPosted {
                id,
                booking_id,
                room_id,
                guest_id,
                rating,
                comment,
                created_at,
            } => {
                self.reviews.insert(
                    *id,
                    Review {
                        id: *id,
                        booking_id: *booking_id,
                        room_id: *room_id,
                        guest_id: *guest_id,
                        rating: *rating,
                        comment: comment.clone(),
                        created_at: *created_at,
                    },
                );
            }
            Event::SettingsUpdated { settings } => {
                *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings.clone();
            }
            Event::RoomUpdated { .. }
            | Event::RoomStatusChanged { .. }
            | Event::BookingCreated { .. }
            | Event::BookingStatusChanged { .. } => {}
        }
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn commit(&self, room: Option<&mut RoomState>, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        let room_id = self.event_room_id(&event);
        self.apply(room, &event);
        if let Some(room_id) = room_id {
            self.notify.send(room_id, &event);
        }
        Ok(())
    }

    /// The room an event belongs to, if any.
    fn event_room_id(&self, event: &Event) -> Option<Ulid> {
        match event {
            Event::RoomCreated { id, .. }
            | Event::RoomUpdated { id, .. }
            | Event::RoomDeleted { id }
            | Event::RoomStatusChanged { id, .. } => Some(*id),
            Event::BookingCreated { room_id, .. }
            | Event::BookingStatusChanged { room_id, .. }
            | Event::ReviewPosted { room_id, .. } => Some(*room_id),
            Event::PaymentRecorded { booking_id, .. }
            | Event::PaymentStatusChanged { booking_id, .. }
            | Event::RefundRequested { booking_id, .. }
            | Event::RefundCompleted { booking_id, .. } => self.room_for_booking(booking_id),
            Event::UserRegistered { .. } | Event::SettingsUpdated { .. } => None,
        }
    }

    pub fn room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// Lookup booking → room, acquire the room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, *booking_id))?;
        let rs = self
            .room_state(&room_id)
            .ok_or(EngineError::NotFound(Entity::Booking, *booking_id))?;
        let guard = rs.write_owned().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Booking, *booking_id));
        }
        Ok((room_id, guard))
    }

    /// Snapshot of the current hotel settings.
    pub fn settings(&self) -> SystemSettings {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
