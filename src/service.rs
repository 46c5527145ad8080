//! The operations both surfaces expose. Each call authorizes its actor with
//! [`policy::authorize`] and then delegates to the engine.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, Entity};
use crate::model::*;
use crate::observability;
use crate::policy::{self, Action, Actor, Resource};

pub struct HotelService {
    engine: Arc<Engine>,
}

fn allow(actor: Option<&Actor>, action: Action, resource: Resource) -> Result<(), EngineError> {
    policy::authorize(actor, action, resource).map_err(EngineError::from)
}

fn is_staff(actor: Option<&Actor>) -> bool {
    actor.is_some_and(|a| a.role.is_staff())
}

impl HotelService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// The registered user behind an id, as an actor.
    pub fn actor(&self, user_id: Ulid) -> Option<Actor> {
        self.engine
            .get_user(user_id)
            .ok()
            .map(|u| Actor::new(u.id, u.role))
    }

    async fn booking_owner(&self, booking_id: Ulid) -> Result<Ulid, EngineError> {
        Ok(self.engine.get_booking(booking_id).await?.guest_id)
    }

    async fn payment_owner(&self, payment_id: Ulid) -> Result<Ulid, EngineError> {
        let booking_id = self.engine.get_payment(payment_id)?.booking_id;
        self.booking_owner(booking_id).await
    }

    // ── Users and settings ───────────────────────────────────

    pub async fn register_user(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        name: String,
        email: String,
        role: Role,
    ) -> Result<User, EngineError> {
        allow(actor, Action::RegisterUser, Resource::NewUser(role))?;
        self.engine.register_user(id, name, email, role).await
    }

    /// Users may always read their own account.
    pub fn get_user(&self, actor: Option<&Actor>, id: Ulid) -> Result<User, EngineError> {
        if actor.is_none_or(|a| a.id != id) {
            allow(actor, Action::ListUsers, Resource::Hotel)?;
        }
        self.engine.get_user(id)
    }

    pub fn list_users(&self, actor: Option<&Actor>) -> Result<Vec<User>, EngineError> {
        allow(actor, Action::ListUsers, Resource::Hotel)?;
        Ok(self.engine.list_users())
    }

    pub fn settings(&self, actor: Option<&Actor>) -> Result<SystemSettings, EngineError> {
        allow(actor, Action::ReadSettings, Resource::Hotel)?;
        Ok(self.engine.settings())
    }

    pub async fn update_settings(
        &self,
        actor: Option<&Actor>,
        settings: SystemSettings,
    ) -> Result<SystemSettings, EngineError> {
        allow(actor, Action::UpdateSettings, Resource::Hotel)?;
        self.engine.update_settings(settings).await
    }

    // ── Rooms ────────────────────────────────────────────────

    pub async fn list_rooms(&self, actor: Option<&Actor>) -> Result<Vec<Room>, EngineError> {
        allow(actor, Action::ReadRooms, Resource::Hotel)?;
        Ok(self.engine.list_rooms().await)
    }

    pub async fn get_room(&self, actor: Option<&Actor>, id: Ulid) -> Result<Room, EngineError> {
        allow(actor, Action::ReadRooms, Resource::Hotel)?;
        self.engine.get_room(id).await
    }

    pub async fn create_room(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        number: String,
        room_type: RoomType,
        capacity: u32,
        price: Cents,
    ) -> Result<Room, EngineError> {
        allow(actor, Action::ManageRooms, Resource::Hotel)?;
        self.engine
            .create_room(id, number, room_type, capacity, price)
            .await
    }

    /// Fields left `None` keep their current value.
    pub async fn update_room(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        room_type: Option<RoomType>,
        capacity: Option<u32>,
        price: Option<Cents>,
    ) -> Result<Room, EngineError> {
        allow(actor, Action::ManageRooms, Resource::Hotel)?;
        let current = self.engine.get_room(id).await?;
        self.engine
            .update_room(
                id,
                room_type.unwrap_or(current.room_type),
                capacity.unwrap_or(current.capacity),
                price.unwrap_or(current.price),
            )
            .await
    }

    pub async fn delete_room(&self, actor: Option<&Actor>, id: Ulid) -> Result<(), EngineError> {
        allow(actor, Action::ManageRooms, Resource::Hotel)?;
        self.engine.delete_room(id).await
    }

    pub async fn set_maintenance(&self, actor: Option<&Actor>, id: Ulid) -> Result<Room, EngineError> {
        allow(actor, Action::SetMaintenance, Resource::Hotel)?;
        self.engine.set_maintenance(id).await
    }

    pub async fn release_maintenance(&self, actor: Option<&Actor>, id: Ulid) -> Result<Room, EngineError> {
        allow(actor, Action::SetMaintenance, Resource::Hotel)?;
        self.engine.release_maintenance(id).await
    }

    /// Only MAINTENANCE is set by hand; `AVAILABLE` ends maintenance. The
    /// other statuses follow the bookings.
    pub async fn set_room_status(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        status: RoomStatus,
    ) -> Result<Room, EngineError> {
        match status {
            RoomStatus::Maintenance => self.set_maintenance(actor, id).await,
            RoomStatus::Available => self.release_maintenance(actor, id).await,
            RoomStatus::Occupied | RoomStatus::Reserved => Err(EngineError::Invalid(format!(
                "room status {status} follows the bookings and cannot be set directly"
            ))),
        }
    }

    // ── Availability ─────────────────────────────────────────

    pub async fn is_room_available(
        &self,
        actor: Option<&Actor>,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<bool, EngineError> {
        allow(actor, Action::ReadRooms, Resource::Hotel)?;
        self.engine.is_room_available(room_id, check_in, check_out).await
    }

    pub async fn search_available_rooms(
        &self,
        actor: Option<&Actor>,
        check_in: NaiveDate,
        check_out: NaiveDate,
        min_capacity: Option<u32>,
        room_type: Option<RoomType>,
    ) -> Result<Vec<Room>, EngineError> {
        allow(actor, Action::ReadRooms, Resource::Hotel)?;
        self.engine
            .search_available_rooms(check_in, check_out, min_capacity, room_type)
            .await
    }

    pub async fn free_windows(
        &self,
        actor: Option<&Actor>,
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Stay>, EngineError> {
        allow(actor, Action::ReadRooms, Resource::Hotel)?;
        self.engine.free_windows(room_id, from, to).await
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn create_booking(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Booking, EngineError> {
        allow(actor, Action::CreateBooking, Resource::OwnedBy(guest_id))?;
        self.engine
            .try_create_booking(id, room_id, guest_id, check_in, check_out)
            .await
    }

    pub async fn get_booking(&self, actor: Option<&Actor>, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self.engine.get_booking(id).await?;
        allow(actor, Action::ReadBooking, Resource::OwnedBy(booking.guest_id))?;
        Ok(booking)
    }

    pub async fn bookings_for_room(&self, actor: Option<&Actor>, room_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        allow(actor, Action::ReadBooking, Resource::Hotel)?;
        self.engine.bookings_for_room(room_id).await
    }

    pub async fn bookings_for_guest(
        &self,
        actor: Option<&Actor>,
        guest_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        allow(actor, Action::ReadBooking, Resource::OwnedBy(guest_id))?;
        Ok(self.engine.bookings_for_guest(guest_id).await)
    }

    /// Bookings matching `keep` that the actor may see: everything for
    /// staff, their own for guests.
    pub async fn visible_bookings(
        &self,
        actor: Option<&Actor>,
        keep: impl Fn(&Booking) -> bool,
    ) -> Result<Vec<Booking>, EngineError> {
        if is_staff(actor) {
            return Ok(self.engine.bookings_where(keep).await);
        }
        let Some(me) = actor else {
            return Err(EngineError::from(policy::Denied {
                role: None,
                action: Action::ReadBooking,
            }));
        };
        let mine = me.id;
        Ok(self
            .engine
            .bookings_where(|b| b.guest_id == mine && keep(b))
            .await)
    }

    pub async fn confirm_booking(&self, actor: Option<&Actor>, id: Ulid) -> Result<Booking, EngineError> {
        let owner = self.booking_owner(id).await?;
        allow(actor, Action::ConfirmBooking, Resource::OwnedBy(owner))?;
        self.engine.confirm_booking(id).await
    }

    pub async fn check_in(&self, actor: Option<&Actor>, id: Ulid) -> Result<Booking, EngineError> {
        let owner = self.booking_owner(id).await?;
        allow(actor, Action::CheckIn, Resource::OwnedBy(owner))?;
        self.engine.check_in(id).await
    }

    pub async fn check_out(&self, actor: Option<&Actor>, id: Ulid) -> Result<Booking, EngineError> {
        let owner = self.booking_owner(id).await?;
        allow(actor, Action::CheckOut, Resource::OwnedBy(owner))?;
        self.engine.check_out(id).await
    }

    pub async fn cancel_booking(&self, actor: Option<&Actor>, id: Ulid) -> Result<Booking, EngineError> {
        let owner = self.booking_owner(id).await?;
        allow(actor, Action::CancelBooking, Resource::OwnedBy(owner))?;
        self.engine.cancel_booking(id).await
    }

    pub async fn set_booking_status(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        match status {
            BookingStatus::Confirmed => self.confirm_booking(actor, id).await,
            BookingStatus::CheckedIn => self.check_in(actor, id).await,
            BookingStatus::Completed => self.check_out(actor, id).await,
            BookingStatus::Cancelled => self.cancel_booking(actor, id).await,
            BookingStatus::Pending => {
                let booking = self.get_booking(actor, id).await?;
                Err(EngineError::InvalidTransition {
                    entity: Entity::Booking,
                    id,
                    from: booking.status.as_str(),
                    to: BookingStatus::Pending.as_str(),
                })
            }
        }
    }

    // ── Payments, refunds, reviews ───────────────────────────

    pub async fn record_payment(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        booking_id: Ulid,
        amount: Cents,
        method: PaymentMethod,
    ) -> Result<Payment, EngineError> {
        let owner = self.booking_owner(booking_id).await?;
        allow(actor, Action::RecordPayment, Resource::OwnedBy(owner))?;
        self.engine.record_payment(id, booking_id, amount, method).await
    }

    pub async fn payments_for_booking(
        &self,
        actor: Option<&Actor>,
        booking_id: Ulid,
    ) -> Result<Vec<Payment>, EngineError> {
        let owner = self.booking_owner(booking_id).await?;
        allow(actor, Action::ReadBooking, Resource::OwnedBy(owner))?;
        Ok(self.engine.payments_for_booking(booking_id))
    }

    pub async fn set_payment_status(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        status: PaymentStatus,
    ) -> Result<Payment, EngineError> {
        let owner = self.payment_owner(id).await?;
        allow(actor, Action::SettlePayment, Resource::OwnedBy(owner))?;
        match status {
            PaymentStatus::Completed => self.engine.complete_payment(id).await,
            PaymentStatus::Failed => self.engine.fail_payment(id).await,
            PaymentStatus::Pending => Err(EngineError::InvalidTransition {
                entity: Entity::Payment,
                id,
                from: self.engine.get_payment(id)?.status.as_str(),
                to: PaymentStatus::Pending.as_str(),
            }),
        }
    }

    pub async fn request_refund(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        booking_id: Ulid,
        amount: Cents,
        reason: Option<String>,
    ) -> Result<Refund, EngineError> {
        allow(actor, Action::IssueRefund, Resource::Hotel)?;
        self.engine.request_refund(id, booking_id, amount, reason).await
    }

    pub async fn refunds_for_booking(
        &self,
        actor: Option<&Actor>,
        booking_id: Ulid,
    ) -> Result<Vec<Refund>, EngineError> {
        let owner = self.booking_owner(booking_id).await?;
        allow(actor, Action::ReadBooking, Resource::OwnedBy(owner))?;
        Ok(self.engine.refunds_for_booking(booking_id))
    }

    pub async fn set_refund_status(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        status: RefundStatus,
    ) -> Result<Refund, EngineError> {
        allow(actor, Action::IssueRefund, Resource::Hotel)?;
        match status {
            RefundStatus::Completed => self.engine.complete_refund(id).await,
            RefundStatus::Pending => Err(EngineError::InvalidTransition {
                entity: Entity::Refund,
                id,
                from: self.engine.get_refund(id)?.status.as_str(),
                to: RefundStatus::Pending.as_str(),
            }),
        }
    }

    /// Reviews are always written as the acting guest.
    pub async fn post_review(
        &self,
        actor: Option<&Actor>,
        id: Ulid,
        booking_id: Ulid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Review, EngineError> {
        let owner = self.booking_owner(booking_id).await?;
        allow(actor, Action::PostReview, Resource::OwnedBy(owner))?;
        self.engine
            .post_review(id, booking_id, owner, rating, comment)
            .await
    }

    pub async fn reviews_for_room(&self, actor: Option<&Actor>, room_id: Ulid) -> Result<Vec<Review>, EngineError> {
        allow(actor, Action::ReadRooms, Resource::Hotel)?;
        self.engine.get_room(room_id).await?;
        Ok(self.engine.reviews_for_room(room_id))
    }

    // ── Dashboard and events ─────────────────────────────────

    pub async fn dashboard(&self, actor: Option<&Actor>) -> Result<Dashboard, EngineError> {
        allow(actor, Action::ViewDashboard, Resource::Hotel)?;
        let Some(actor) = actor else {
            return Err(EngineError::from(policy::Denied {
                role: None,
                action: Action::ViewDashboard,
            }));
        };
        Ok(self.engine.dashboard(actor, crate::engine::today()).await)
    }

    /// Live events for one room. Staff only: events name guests.
    pub async fn subscribe_room(
        &self,
        actor: Option<&Actor>,
        room_id: Ulid,
    ) -> Result<broadcast::Receiver<Event>, EngineError> {
        allow(actor, Action::ReadBooking, Resource::Hotel)?;
        self.engine.get_room(room_id).await?;
        let rx = self.engine.notify.subscribe(room_id);
        metrics::gauge!(observability::ROOMS_WATCHED).set(self.engine.notify.watched_rooms() as f64);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ErrorKind;
    use crate::notify::NotifyHub;
    use chrono::Days;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeeper_test_service");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    struct Hotel {
        svc: HotelService,
        admin: Actor,
        desk: Actor,
        guest: Actor,
        room: Ulid,
    }

    async fn hotel(name: &str) -> Hotel {
        let engine = Arc::new(Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap());
        let svc = HotelService::new(engine.clone());
        let admin_id = Ulid::new();
        engine
            .register_user(admin_id, "Admin".into(), "admin@example.com".into(), Role::Admin)
            .await
            .unwrap();
        let admin = svc.actor(admin_id).unwrap();

        let desk_id = Ulid::new();
        svc.register_user(Some(&admin), desk_id, "Desk".into(), "desk@example.com".into(), Role::Concierge)
            .await
            .unwrap();
        let guest_id = Ulid::new();
        svc.register_user(None, guest_id, "Guest".into(), "guest@example.com".into(), Role::Guest)
            .await
            .unwrap();

        let room = Ulid::new();
        svc.create_room(Some(&admin), room, "201".into(), RoomType::Suite, 4, 30_000)
            .await
            .unwrap();
        Hotel {
            desk: svc.actor(desk_id).unwrap(),
            guest: svc.actor(guest_id).unwrap(),
            svc,
            admin,
            room,
        }
    }

    fn nights(from: u64, to: u64) -> (NaiveDate, NaiveDate) {
        let today = crate::engine::today();
        (today + Days::new(from), today + Days::new(to))
    }

    #[tokio::test]
    async fn anonymous_calls_are_refused() {
        let h = hotel("anonymous.wal").await;
        let err = h.svc.list_rooms(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let (ci, co) = nights(1, 2);
        let err = h
            .svc
            .create_booking(None, Ulid::new(), h.room, h.guest.id, ci, co)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn guest_books_for_self_only() {
        let h = hotel("guest_self.wal").await;
        let (ci, co) = nights(1, 3);
        let other = h.desk.id;
        let err = h
            .svc
            .create_booking(Some(&h.guest), Ulid::new(), h.room, other, ci, co)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let booking = h
            .svc
            .create_booking(Some(&h.guest), Ulid::new(), h.room, h.guest.id, ci, co)
            .await
            .unwrap();
        assert_eq!(h.svc.get_booking(Some(&h.guest), booking.id).await.unwrap(), booking);

        // Guests cannot move their own booking along the front-desk path.
        let err = h.svc.confirm_booking(Some(&h.guest), booking.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        h.svc.confirm_booking(Some(&h.desk), booking.id).await.unwrap();
        let cancelled = h.svc.cancel_booking(Some(&h.guest), booking.id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn visible_bookings_scoped_by_role() {
        let h = hotel("visible.wal").await;
        let (ci, co) = nights(1, 2);
        h.svc
            .create_booking(Some(&h.guest), Ulid::new(), h.room, h.guest.id, ci, co)
            .await
            .unwrap();
        let (ci, co) = nights(3, 4);
        h.svc
            .create_booking(Some(&h.desk), Ulid::new(), h.room, h.desk.id, ci, co)
            .await
            .unwrap();

        assert_eq!(h.svc.visible_bookings(Some(&h.desk), |_| true).await.unwrap().len(), 2);
        let mine = h.svc.visible_bookings(Some(&h.guest), |_| true).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].guest_id, h.guest.id);
        assert!(h.svc.visible_bookings(None, |_| true).await.is_err());
    }

    #[tokio::test]
    async fn room_status_only_settable_for_maintenance() {
        let h = hotel("room_status.wal").await;
        let room = h
            .svc
            .set_room_status(Some(&h.admin), h.room, RoomStatus::Maintenance)
            .await
            .unwrap();
        assert_eq!(room.status, RoomStatus::Maintenance);
        let err = h
            .svc
            .set_room_status(Some(&h.admin), h.room, RoomStatus::Occupied)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        let room = h
            .svc
            .set_room_status(Some(&h.admin), h.room, RoomStatus::Available)
            .await
            .unwrap();
        assert_eq!(room.status, RoomStatus::Available);

        let err = h
            .svc
            .set_room_status(Some(&h.desk), h.room, RoomStatus::Maintenance)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn partial_room_update_keeps_other_fields() {
        let h = hotel("partial_update.wal").await;
        let room = h
            .svc
            .update_room(Some(&h.admin), h.room, None, None, Some(35_000))
            .await
            .unwrap();
        assert_eq!(room.price, 35_000);
        assert_eq!(room.capacity, 4);
        assert_eq!(room.room_type, RoomType::Suite);
    }

    #[tokio::test]
    async fn money_paths_need_finance_roles() {
        let h = hotel("money.wal").await;
        let (ci, co) = nights(1, 2);
        let booking = h
            .svc
            .create_booking(Some(&h.guest), Ulid::new(), h.room, h.guest.id, ci, co)
            .await
            .unwrap();
        let payment = h
            .svc
            .record_payment(Some(&h.guest), Ulid::new(), booking.id, booking.total_price, PaymentMethod::Card)
            .await
            .unwrap();

        let err = h
            .svc
            .set_payment_status(Some(&h.desk), payment.id, PaymentStatus::Completed)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let paid = h
            .svc
            .set_payment_status(Some(&h.admin), payment.id, PaymentStatus::Completed)
            .await
            .unwrap();
        assert_eq!(paid.status, PaymentStatus::Completed);
        assert_eq!(
            h.svc.get_booking(Some(&h.guest), booking.id).await.unwrap().status,
            BookingStatus::Confirmed
        );

        let err = h
            .svc
            .set_payment_status(Some(&h.admin), payment.id, PaymentStatus::Pending)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn pending_is_never_a_target() {
        let h = hotel("pending_target.wal").await;
        let (ci, co) = nights(1, 2);
        let booking = h
            .svc
            .create_booking(Some(&h.guest), Ulid::new(), h.room, h.guest.id, ci, co)
            .await
            .unwrap();
        let err = h
            .svc
            .set_booking_status(Some(&h.desk), booking.id, BookingStatus::Pending)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn users_read_their_own_account() {
        let h = hotel("own_account.wal").await;
        assert_eq!(h.svc.get_user(Some(&h.guest), h.guest.id).unwrap().role, Role::Guest);
        assert!(h.svc.get_user(Some(&h.guest), h.admin.id).is_err());
        assert_eq!(h.svc.list_users(Some(&h.admin)).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn event_stream_is_staff_only() {
        let h = hotel("events.wal").await;
        assert!(h.svc.subscribe_room(Some(&h.guest), h.room).await.is_err());
        let mut rx = h.svc.subscribe_room(Some(&h.desk), h.room).await.unwrap();
        h.svc.set_maintenance(Some(&h.admin), h.room).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::RoomStatusChanged {
                status: RoomStatus::Maintenance,
                ..
            }
        ));
    }
}
