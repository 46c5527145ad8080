use std::collections::HashSet;

use chrono::NaiveDate;
use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, now_ms, quote, stay_from, today, validate_stay};
use super::error::Unavailable;
use super::{status, Engine, EngineError, Entity, WalCommand};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_room_fields(capacity: u32, price: Cents) -> Result<(), EngineError> {
    if capacity == 0 || capacity > MAX_ROOM_CAPACITY {
        return Err(EngineError::Invalid(format!(
            "capacity must be between 1 and {MAX_ROOM_CAPACITY}"
        )));
    }
    if price <= 0 || price > MAX_NIGHTLY_PRICE {
        return Err(EngineError::Invalid(format!(
            "nightly price must be between 1 and {MAX_NIGHTLY_PRICE}"
        )));
    }
    Ok(())
}

fn validate_settings(settings: &SystemSettings) -> Result<(), EngineError> {
    if settings.hotel_name.trim().is_empty() {
        return Err(EngineError::Invalid("hotel name must not be empty".into()));
    }
    check_len(&settings.hotel_name, MAX_NAME_LEN, "hotel name too long")?;
    if settings.currency.len() != 3 || !settings.currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(EngineError::Invalid(format!(
            "currency must be a three-letter ISO code, got {:?}",
            settings.currency
        )));
    }
    if settings.max_stay_nights == 0 || settings.max_stay_nights > MAX_STAY_NIGHTS {
        return Err(EngineError::Invalid(format!(
            "max_stay_nights must be between 1 and {MAX_STAY_NIGHTS}"
        )));
    }
    if settings.booking_horizon_days > MAX_BOOKING_HORIZON_DAYS {
        return Err(EngineError::Invalid(format!(
            "booking_horizon_days must be at most {MAX_BOOKING_HORIZON_DAYS}"
        )));
    }
    Ok(())
}

fn booking_transition_error(booking: &Booking, to: BookingStatus) -> EngineError {
    EngineError::InvalidTransition {
        entity: Entity::Booking,
        id: booking.id,
        from: booking.status.as_str(),
        to: to.as_str(),
    }
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(
        &self,
        id: Ulid,
        number: String,
        room_type: RoomType,
        capacity: u32,
        price: Cents,
    ) -> Result<Room, EngineError> {
        let number = number.trim().to_string();
        if number.is_empty() {
            return Err(EngineError::Invalid("room number must not be empty".into()));
        }
        check_len(&number, MAX_ROOM_NUMBER_LEN, "room number too long")?;
        validate_room_fields(capacity, price)?;

        let _catalog = self.catalog_lock.lock().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::Room, id.to_string()));
        }
        if self.room_numbers.contains_key(&number) {
            return Err(EngineError::AlreadyExists(Entity::Room, number));
        }

        let event = Event::RoomCreated {
            id,
            number: number.clone(),
            room_type,
            capacity,
            price,
        };
        self.commit(None, event).await?;
        info!(room_id = %id, %number, "room created");
        Ok(Room {
            id,
            number,
            room_type,
            capacity,
            price,
            status: RoomStatus::Available,
        })
    }

    pub async fn update_room(
        &self,
        id: Ulid,
        room_type: RoomType,
        capacity: u32,
        price: Cents,
    ) -> Result<Room, EngineError> {
        validate_room_fields(capacity, price)?;
        let rs = self.room_state(&id).ok_or(EngineError::NotFound(Entity::Room, id))?;
        let mut guard = rs.write().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, id));
        }
        let event = Event::RoomUpdated { id, room_type, capacity, price };
        self.commit(Some(&mut *guard), event).await?;
        Ok(guard.room.clone())
    }

    /// Remove a room. Refused while any booking on it is still active; its
    /// booking history goes with it.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let rs = self.room_state(&id).ok_or(EngineError::NotFound(Entity::Room, id))?;
        let mut guard = rs.write().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, id));
        }
        if guard.active_bookings().next().is_some() {
            return Err(EngineError::Unavailable(Unavailable::HasActiveBookings(id)));
        }
        self.commit(Some(&mut *guard), Event::RoomDeleted { id }).await?;
        self.notify.remove(&id);
        info!(room_id = %id, "room deleted");
        Ok(())
    }

    /// Take a room out of service. Existing bookings stay; new ones and
    /// check-ins are refused until the room is released.
    pub async fn set_maintenance(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.room_state(&id).ok_or(EngineError::NotFound(Entity::Room, id))?;
        let mut guard = rs.write().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, id));
        }
        if guard.room.status == RoomStatus::Maintenance {
            return Ok(guard.room.clone());
        }
        let event = Event::RoomStatusChanged {
            id,
            status: RoomStatus::Maintenance,
        };
        self.commit(Some(&mut *guard), event).await?;
        info!(room_id = %id, "room under maintenance");
        Ok(guard.room.clone())
    }

    /// Return a room to service. It comes back with whatever status its
    /// active bookings imply for today.
    pub async fn release_maintenance(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.room_state(&id).ok_or(EngineError::NotFound(Entity::Room, id))?;
        let mut guard = rs.write().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, id));
        }
        if guard.room.status != RoomStatus::Maintenance {
            return Err(EngineError::InvalidTransition {
                entity: Entity::Room,
                id,
                from: guard.room.status.as_str(),
                to: RoomStatus::Available.as_str(),
            });
        }
        let next = status::implied_status(&guard, today(), None);
        let event = Event::RoomStatusChanged { id, status: next };
        self.commit(Some(&mut *guard), event).await?;
        info!(room_id = %id, status = %next, "room back in service");
        Ok(guard.room.clone())
    }

    // ── Users and settings ───────────────────────────────────

    pub async fn register_user(
        &self,
        id: Ulid,
        name: String,
        email: String,
        role: Role,
    ) -> Result<User, EngineError> {
        let name = name.trim().to_string();
        let email = email.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::Invalid("name must not be empty".into()));
        }
        check_len(&name, MAX_NAME_LEN, "name too long")?;
        check_len(&email, MAX_EMAIL_LEN, "email too long")?;
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(EngineError::Invalid(format!("not an email address: {email:?}"))),
        }

        let _catalog = self.catalog_lock.lock().await;
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.users.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::User, id.to_string()));
        }
        if self.user_emails.contains_key(&email.to_lowercase()) {
            return Err(EngineError::AlreadyExists(Entity::User, email));
        }

        let user = User { id, name, email, role };
        let event = Event::UserRegistered {
            id,
            name: user.name.clone(),
            email: user.email.clone(),
            role,
        };
        self.commit(None, event).await?;
        info!(user_id = %id, %role, "user registered");
        Ok(user)
    }

    pub async fn update_settings(&self, settings: SystemSettings) -> Result<SystemSettings, EngineError> {
        validate_settings(&settings)?;
        let _catalog = self.catalog_lock.lock().await;
        let event = Event::SettingsUpdated {
            settings: settings.clone(),
        };
        self.commit(None, event).await?;
        info!(hotel = %settings.hotel_name, "settings updated");
        Ok(settings)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Book `room_id` for `[check_in, check_out)`.
    ///
    /// The overlap check, the WAL record and the room status change all
    /// happen under the room's write lock, so two racing requests for
    /// overlapping stays cannot both succeed.
    pub async fn try_create_booking(
        &self,
        id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let stay = stay_from(check_in, check_out)?;
        validate_stay(&stay, &self.settings(), today())?;
        if !self.users.contains_key(&guest_id) {
            return Err(EngineError::NotFound(Entity::User, guest_id));
        }
        if self.booking_to_room.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::Booking, id.to_string()));
        }
        let rs = self
            .room_state(&room_id)
            .ok_or(EngineError::NotFound(Entity::Room, room_id))?;
        let mut guard = rs.write().await;
        if guard.retired {
            return Err(EngineError::ConcurrencyConflict(room_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        if let Err(e) = check_no_conflict(&guard, &stay) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            debug!(room_id = %room_id, %check_in, %check_out, "booking refused: {e}");
            return Err(e);
        }

        let total_price = quote(&guard.room, &stay)?;
        let created_at = now_ms();
        let room_status = status::after_booking_created(guard.room.status);
        let event = Event::BookingCreated {
            id,
            room_id,
            guest_id,
            stay,
            total_price,
            created_at,
            room_status,
        };
        self.commit(Some(&mut *guard), event).await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(booking_id = %id, room_id = %room_id, %check_in, %check_out, "booking created");

        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Booking, id))
    }

    pub async fn confirm_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition_booking(id, BookingStatus::Confirmed, today()).await
    }

    pub async fn check_in(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition_booking(id, BookingStatus::CheckedIn, today()).await
    }

    pub async fn check_out(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition_booking(id, BookingStatus::Completed, today()).await
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition_booking(id, BookingStatus::Cancelled, today()).await
    }

    /// Move a booking along its lifecycle as of `today`, updating the room
    /// status in the same WAL record.
    pub async fn transition_booking(
        &self,
        id: Ulid,
        target: BookingStatus,
        today: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        if !booking.status.can_transition_to(target) {
            return Err(booking_transition_error(&booking, target));
        }

        let room_status = match target {
            BookingStatus::CheckedIn => {
                if !booking.stay.contains_day(today) {
                    return Err(EngineError::Invalid(format!(
                        "booking {id} runs {} to {}, check-in is not possible on {today}",
                        booking.stay.check_in, booking.stay.check_out
                    )));
                }
                status::after_check_in(&guard)?
            }
            BookingStatus::Completed | BookingStatus::Cancelled => status::after_release(&guard, id, today),
            BookingStatus::Confirmed | BookingStatus::Pending => guard.room.status,
        };

        let event = Event::BookingStatusChanged {
            id,
            room_id,
            status: target,
            room_status,
        };
        self.commit(Some(&mut *guard), event).await?;
        metrics::counter!(observability::BOOKING_TRANSITIONS_TOTAL, "status" => target.as_str()).increment(1);
        info!(booking_id = %id, room_id = %room_id, from = %booking.status, to = %target, room_status = %room_status, "booking moved");

        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Booking, id))
    }

    /// Checked-in stays whose check-out day has passed.
    pub fn collect_overdue_stays(&self, today: NaiveDate) -> Vec<Ulid> {
        let mut overdue = Vec::new();
        for entry in self.rooms.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for booking in &guard.bookings {
                    if booking.status == BookingStatus::CheckedIn && booking.stay.check_out < today {
                        overdue.push(booking.id);
                    }
                }
            }
        }
        overdue
    }

    // ── Payments and refunds ─────────────────────────────────

    fn paid_total(&self, booking_id: Ulid) -> Cents {
        self.payments
            .iter()
            .filter(|p| p.booking_id == booking_id && p.status == PaymentStatus::Completed)
            .map(|p| p.amount)
            .sum()
    }

    fn refunded_total(&self, booking_id: Ulid) -> Cents {
        self.refunds
            .iter()
            .filter(|r| r.booking_id == booking_id)
            .map(|r| r.amount)
            .sum()
    }

    pub async fn record_payment(
        &self,
        id: Ulid,
        booking_id: Ulid,
        amount: Cents,
        method: PaymentMethod,
    ) -> Result<Payment, EngineError> {
        if amount <= 0 {
            return Err(EngineError::Invalid("payment amount must be positive".into()));
        }
        let (_room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        if booking.status == BookingStatus::Cancelled {
            return Err(EngineError::Invalid(format!("booking {booking_id} is cancelled")));
        }
        if self.payments.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::Payment, id.to_string()));
        }

        let created_at = now_ms();
        let event = Event::PaymentRecorded {
            id,
            booking_id,
            amount,
            method,
            created_at,
        };
        self.commit(Some(&mut *guard), event).await?;
        info!(payment_id = %id, booking_id = %booking_id, amount, %method, "payment recorded");
        Ok(Payment {
            id,
            booking_id,
            amount,
            method,
            status: PaymentStatus::Pending,
            created_at,
        })
    }

    pub async fn complete_payment(&self, id: Ulid) -> Result<Payment, EngineError> {
        self.settle_payment(id, PaymentStatus::Completed).await
    }

    pub async fn fail_payment(&self, id: Ulid) -> Result<Payment, EngineError> {
        self.settle_payment(id, PaymentStatus::Failed).await
    }

    /// A completed payment that brings the paid total up to the booking
    /// price confirms a PENDING booking in the same record.
    async fn settle_payment(&self, id: Ulid, target: PaymentStatus) -> Result<Payment, EngineError> {
        let booking_id = self
            .payments
            .get(&id)
            .map(|p| p.booking_id)
            .ok_or(EngineError::NotFound(Entity::Payment, id))?;
        let (_room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;

        // Payment rows only change under this room's lock.
        let payment = self
            .payments
            .get(&id)
            .map(|p| p.clone())
            .ok_or(EngineError::NotFound(Entity::Payment, id))?;
        if !payment.status.can_transition_to(target) {
            return Err(EngineError::InvalidTransition {
                entity: Entity::Payment,
                id,
                from: payment.status.as_str(),
                to: target.as_str(),
            });
        }
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        let confirms_booking = target == PaymentStatus::Completed
            && booking.status == BookingStatus::Pending
            && self.paid_total(booking_id) + payment.amount >= booking.total_price;

        let event = Event::PaymentStatusChanged {
            id,
            booking_id,
            status: target,
            confirms_booking,
        };
        self.commit(Some(&mut *guard), event).await?;
        info!(payment_id = %id, booking_id = %booking_id, status = %target, confirms_booking, "payment settled");

        self.payments
            .get(&id)
            .map(|p| p.clone())
            .ok_or(EngineError::NotFound(Entity::Payment, id))
    }

    /// Refunds never exceed what was actually collected: completed payments
    /// minus every refund already requested.
    pub async fn request_refund(
        &self,
        id: Ulid,
        booking_id: Ulid,
        amount: Cents,
        reason: Option<String>,
    ) -> Result<Refund, EngineError> {
        if amount <= 0 {
            return Err(EngineError::Invalid("refund amount must be positive".into()));
        }
        if let Some(ref r) = reason {
            check_len(r, MAX_REASON_LEN, "refund reason too long")?;
        }
        let (_room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(Entity::Booking, booking_id));
        }
        if self.refunds.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::Refund, id.to_string()));
        }
        let refundable = self.paid_total(booking_id) - self.refunded_total(booking_id);
        if amount > refundable {
            return Err(EngineError::Invalid(format!(
                "refund of {amount} exceeds refundable balance of {refundable}"
            )));
        }

        let created_at = now_ms();
        let event = Event::RefundRequested {
            id,
            booking_id,
            amount,
            reason: reason.clone(),
            created_at,
        };
        self.commit(Some(&mut *guard), event).await?;
        info!(refund_id = %id, booking_id = %booking_id, amount, "refund requested");
        Ok(Refund {
            id,
            booking_id,
            amount,
            reason,
            status: RefundStatus::Pending,
            created_at,
        })
    }

    pub async fn complete_refund(&self, id: Ulid) -> Result<Refund, EngineError> {
        let booking_id = self
            .refunds
            .get(&id)
            .map(|r| r.booking_id)
            .ok_or(EngineError::NotFound(Entity::Refund, id))?;
        let (_room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let current = self
            .refunds
            .get(&id)
            .map(|r| r.status)
            .ok_or(EngineError::NotFound(Entity::Refund, id))?;
        if !current.can_transition_to(RefundStatus::Completed) {
            return Err(EngineError::InvalidTransition {
                entity: Entity::Refund,
                id,
                from: current.as_str(),
                to: RefundStatus::Completed.as_str(),
            });
        }
        self.commit(Some(&mut *guard), Event::RefundCompleted { id, booking_id })
            .await?;
        info!(refund_id = %id, booking_id = %booking_id, "refund completed");
        self.refunds
            .get(&id)
            .map(|r| r.clone())
            .ok_or(EngineError::NotFound(Entity::Refund, id))
    }

    // ── Reviews ──────────────────────────────────────────────

    pub async fn post_review(
        &self,
        id: Ulid,
        booking_id: Ulid,
        guest_id: Ulid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Review, EngineError> {
        if !(1..=5).contains(&rating) {
            return Err(EngineError::Invalid(format!("rating must be 1 to 5, got {rating}")));
        }
        if let Some(ref c) = comment {
            check_len(c, MAX_COMMENT_LEN, "review comment too long")?;
        }
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        if booking.guest_id != guest_id {
            return Err(EngineError::Invalid(format!(
                "booking {booking_id} belongs to another guest"
            )));
        }
        if booking.status != BookingStatus::Completed {
            return Err(EngineError::Invalid(format!(
                "only completed stays can be reviewed, booking {booking_id} is {}",
                booking.status
            )));
        }
        if self.reviews.iter().any(|r| r.booking_id == booking_id) {
            return Err(EngineError::AlreadyExists(Entity::Review, booking_id.to_string()));
        }

        let created_at = now_ms();
        let event = Event::ReviewPosted {
            id,
            booking_id,
            room_id,
            guest_id,
            rating,
            comment: comment.clone(),
            created_at,
        };
        self.commit(Some(&mut *guard), event).await?;
        info!(review_id = %id, room_id = %room_id, rating, "review posted");
        Ok(Review {
            id,
            booking_id,
            room_id,
            guest_id,
            rating,
            comment,
            created_at,
        })
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    ///
    /// Holds the catalog lock and a read lock on every room until the
    /// writer has swapped files, so no commit can land in the old WAL after
    /// the snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let mut room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        room_ids.sort();
        let mut guards = Vec::with_capacity(room_ids.len());
        for room_id in &room_ids {
            if let Some(rs) = self.room_state(room_id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut events = vec![Event::SettingsUpdated {
            settings: self.settings(),
        }];

        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        events.extend(users.into_iter().map(|u| Event::UserRegistered {
            id: u.id,
            name: u.name,
            email: u.email,
            role: u.role,
        }));

        let mut live_bookings = HashSet::new();
        for guard in &guards {
            if guard.retired {
                continue;
            }
            events.push(Event::RoomCreated {
                id: guard.room.id,
                number: guard.room.number.clone(),
                room_type: guard.room.room_type,
                capacity: guard.room.capacity,
                price: guard.room.price,
            });
            for booking in &guard.bookings {
                live_bookings.insert(booking.id);
                events.push(Event::BookingCreated {
                    id: booking.id,
                    room_id: booking.room_id,
                    guest_id: booking.guest_id,
                    stay: booking.stay,
                    total_price: booking.total_price,
                    created_at: booking.created_at,
                    room_status: guard.room.status,
                });
                if booking.status != BookingStatus::Pending {
                    events.push(Event::BookingStatusChanged {
                        id: booking.id,
                        room_id: booking.room_id,
                        status: booking.status,
                        room_status: guard.room.status,
                    });
                }
            }
            events.push(Event::RoomStatusChanged {
                id: guard.room.id,
                status: guard.room.status,
            });
        }

        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| live_bookings.contains(&p.booking_id))
            .map(|p| p.clone())
            .collect();
        payments.sort_by_key(|p| p.id);
        for p in payments {
            events.push(Event::PaymentRecorded {
                id: p.id,
                booking_id: p.booking_id,
                amount: p.amount,
                method: p.method,
                created_at: p.created_at,
            });
            if p.status != PaymentStatus::Pending {
                events.push(Event::PaymentStatusChanged {
                    id: p.id,
                    booking_id: p.booking_id,
                    status: p.status,
                    confirms_booking: false,
                });
            }
        }

        let mut refunds: Vec<Refund> = self
            .refunds
            .iter()
            .filter(|r| live_bookings.contains(&r.booking_id))
            .map(|r| r.clone())
            .collect();
        refunds.sort_by_key(|r| r.id);
        for r in refunds {
            events.push(Event::RefundRequested {
                id: r.id,
                booking_id: r.booking_id,
                amount: r.amount,
                reason: r.reason,
                created_at: r.created_at,
            });
            if r.status == RefundStatus::Completed {
                events.push(Event::RefundCompleted {
                    id: r.id,
                    booking_id: r.booking_id,
                });
            }
        }

        let mut reviews: Vec<Review> = self
            .reviews
            .iter()
            .filter(|r| live_bookings.contains(&r.booking_id))
            .map(|r| r.clone())
            .collect();
        reviews.sort_by_key(|r| r.id);
        events.extend(reviews.into_iter().map(|r| Event::ReviewPosted {
            id: r.id,
            booking_id: r.booking_id,
            room_id: r.room_id,
            guest_id: r.guest_id,
            rating: r.rating,
            comment: r.comment,
            created_at: r.created_at,
        }));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
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
