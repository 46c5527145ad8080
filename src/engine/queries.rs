use std::collections::BTreeMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::policy::Actor;

use super::availability::{free_windows, is_free};
use super::conflict::stay_from;
use super::{Engine, EngineError, Entity, SharedRoomState};

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.room_state(&id).ok_or(EngineError::NotFound(Entity::Room, id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, id));
        }
        Ok(guard.room.clone())
    }

    pub fn room_by_number(&self, number: &str) -> Option<Ulid> {
        self.room_numbers.get(number.trim()).map(|e| *e.value())
    }

    /// All rooms ordered by room number.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let handles: Vec<SharedRoomState> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(handles.len());
        for rs in handles {
            let guard = rs.read().await;
            if !guard.retired {
                rooms.push(guard.room.clone());
            }
        }
        rooms.sort_by(|a, b| a.number.cmp(&b.number));
        rooms
    }

    // ── Availability ─────────────────────────────────────────

    /// Would a booking for this room and range succeed right now?
    pub async fn is_room_available(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<bool, EngineError> {
        let stay = stay_from(check_in, check_out)?;
        let rs = self
            .room_state(&room_id)
            .ok_or(EngineError::NotFound(Entity::Room, room_id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, room_id));
        }
        Ok(is_free(&guard, &stay))
    }

    /// Rooms free for the whole range, ordered by room number. Maintenance
    /// rooms never qualify.
    pub async fn search_available_rooms(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        min_capacity: Option<u32>,
        room_type: Option<RoomType>,
    ) -> Result<Vec<Room>, EngineError> {
        let stay = stay_from(check_in, check_out)?;
        let handles: Vec<SharedRoomState> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::new();
        for rs in handles {
            let guard = rs.read().await;
            if guard.retired {
                continue;
            }
            if min_capacity.is_some_and(|c| guard.room.capacity < c) {
                continue;
            }
            if room_type.is_some_and(|t| guard.room.room_type != t) {
                continue;
            }
            if is_free(&guard, &stay) {
                rooms.push(guard.room.clone());
            }
        }
        rooms.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(rooms)
    }

    pub async fn free_windows(
        &self,
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Stay>, EngineError> {
        let window = stay_from(from, to)?;
        if window.nights() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let rs = self
            .room_state(&room_id)
            .ok_or(EngineError::NotFound(Entity::Room, room_id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, room_id));
        }
        Ok(free_windows(&guard, &window))
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let room_id = self
            .room_for_booking(&id)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        let rs = self
            .room_state(&room_id)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        let guard = rs.read().await;
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Booking, id))
    }

    /// A room's bookings in check-in order, inactive ones included.
    pub async fn bookings_for_room(&self, room_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .room_state(&room_id)
            .ok_or(EngineError::NotFound(Entity::Room, room_id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, room_id));
        }
        Ok(guard.bookings.clone())
    }

    /// Every booking in the hotel, filtered, ordered by check-in then id.
    pub async fn bookings_where(&self, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let handles: Vec<SharedRoomState> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut bookings = Vec::new();
        for rs in handles {
            let guard = rs.read().await;
            if guard.retired {
                continue;
            }
            bookings.extend(guard.bookings.iter().filter(|b| keep(b)).cloned());
        }
        bookings.sort_by_key(|b| (b.stay.check_in, b.id));
        bookings
    }

    pub async fn bookings_for_guest(&self, guest_id: Ulid) -> Vec<Booking> {
        self.bookings_where(|b| b.guest_id == guest_id).await
    }

    // ── Ledger ───────────────────────────────────────────────

    pub fn get_payment(&self, id: Ulid) -> Result<Payment, EngineError> {
        self.payments
            .get(&id)
            .map(|p| p.clone())
            .ok_or(EngineError::NotFound(Entity::Payment, id))
    }

    pub fn payments_for_booking(&self, booking_id: Ulid) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| p.booking_id == booking_id)
            .map(|p| p.clone())
            .collect();
        payments.sort_by_key(|p| p.id);
        payments
    }

    pub fn get_refund(&self, id: Ulid) -> Result<Refund, EngineError> {
        self.refunds
            .get(&id)
            .map(|r| r.clone())
            .ok_or(EngineError::NotFound(Entity::Refund, id))
    }

    pub fn refunds_for_booking(&self, booking_id: Ulid) -> Vec<Refund> {
        let mut refunds: Vec<Refund> = self
            .refunds
            .iter()
            .filter(|r| r.booking_id == booking_id)
            .map(|r| r.clone())
            .collect();
        refunds.sort_by_key(|r| r.id);
        refunds
    }

    pub fn reviews_for_room(&self, room_id: Ulid) -> Vec<Review> {
        let mut reviews: Vec<Review> = self
            .reviews
            .iter()
            .filter(|r| r.room_id == room_id)
            .map(|r| r.clone())
            .collect();
        reviews.sort_by_key(|r| r.id);
        reviews
    }

    // ── Users ────────────────────────────────────────────────

    pub fn get_user(&self, id: Ulid) -> Result<User, EngineError> {
        self.users
            .get(&id)
            .map(|u| u.clone())
            .ok_or(EngineError::NotFound(Entity::User, id))
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        let id = *self.user_emails.get(&email.trim().to_lowercase())?;
        self.users.get(&id).map(|u| u.clone())
    }

    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    // ── Dashboard ────────────────────────────────────────────

    /// Summary for `actor` as of `today`. Guests see their own bookings;
    /// staff see operations; management also sees money and ratings.
    pub async fn dashboard(&self, actor: &Actor, today: NaiveDate) -> Dashboard {
        if actor.role == Role::Guest {
            return Dashboard {
                my_bookings: Some(self.bookings_for_guest(actor.id).await),
                ..Dashboard::default()
            };
        }

        let handles: Vec<SharedRoomState> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms_by_status: BTreeMap<RoomStatus, usize> = BTreeMap::new();
        let mut bookings_by_status: BTreeMap<BookingStatus, usize> = BTreeMap::new();
        let mut arrivals = Vec::new();
        let mut departures = Vec::new();
        for rs in handles {
            let guard = rs.read().await;
            if guard.retired {
                continue;
            }
            *rooms_by_status.entry(guard.room.status).or_default() += 1;
            for booking in &guard.bookings {
                *bookings_by_status.entry(booking.status).or_default() += 1;
                let arriving = matches!(booking.status, BookingStatus::Pending | BookingStatus::Confirmed)
                    && booking.stay.check_in == today;
                if arriving {
                    arrivals.push(booking.clone());
                }
                if booking.status == BookingStatus::CheckedIn && booking.stay.check_out == today {
                    departures.push(booking.clone());
                }
            }
        }
        arrivals.sort_by_key(|b| b.id);
        departures.sort_by_key(|b| b.id);

        let count = |s: RoomStatus| rooms_by_status.get(&s).copied().unwrap_or(0);
        let total: usize = rooms_by_status.values().sum();
        let in_service = total - count(RoomStatus::Maintenance);
        let occupancy_rate = if in_service == 0 {
            0.0
        } else {
            count(RoomStatus::Occupied) as f64 / in_service as f64
        };

        let mut dashboard = Dashboard {
            rooms_by_status: Some(rooms_by_status),
            bookings_by_status: Some(bookings_by_status),
            occupancy_rate: Some(occupancy_rate),
            arrivals_today: Some(arrivals),
            departures_today: Some(departures),
            ..Dashboard::default()
        };

        if matches!(actor.role, Role::Admin | Role::Manager) {
            let collected: Cents = self
                .payments
                .iter()
                .filter(|p| p.status == PaymentStatus::Completed)
                .map(|p| p.amount)
                .sum();
            let refunded: Cents = self
                .refunds
                .iter()
                .filter(|r| r.status == RefundStatus::Completed)
                .map(|r| r.amount)
                .sum();
            dashboard.revenue = Some(collected - refunded);

            let (sum, n) = self
                .reviews
                .iter()
                .fold((0u64, 0u64), |(sum, n), r| (sum + u64::from(r.rating), n + 1));
            dashboard.average_rating = (n > 0).then(|| sum as f64 / n as f64);
        }
        dashboard
    }
}
