//! Room status transitions driven by the booking lifecycle.

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::error::Unavailable;
use super::EngineError;

/// Status the active booking set implies on `today`, leaving out `excluding`
/// (the booking that is about to be cancelled or completed).
///
/// A checked-in guest makes the room OCCUPIED; an active booking covering
/// today makes it RESERVED; otherwise it is AVAILABLE.
pub fn implied_status(rs: &RoomState, today: NaiveDate, excluding: Option<Ulid>) -> RoomStatus {
    let mut status = RoomStatus::Available;
    for booking in rs.active_bookings().filter(|b| Some(b.id) != excluding) {
        if booking.status == BookingStatus::CheckedIn {
            return RoomStatus::Occupied;
        }
        if booking.stay.contains_day(today) {
            status = RoomStatus::Reserved;
        }
    }
    status
}

/// A new booking claims an AVAILABLE room; any other status is kept.
pub fn after_booking_created(current: RoomStatus) -> RoomStatus {
    match current {
        RoomStatus::Available => RoomStatus::Reserved,
        other => other,
    }
}

pub fn after_check_in(rs: &RoomState) -> Result<RoomStatus, EngineError> {
    match rs.room.status {
        RoomStatus::Maintenance => Err(EngineError::Unavailable(Unavailable::Maintenance(rs.room.id))),
        _ => Ok(RoomStatus::Occupied),
    }
}

/// Status after `booking_id` leaves the active set (cancel or checkout).
/// Maintenance is only ever left explicitly.
pub fn after_release(rs: &RoomState, booking_id: Ulid, today: NaiveDate) -> RoomStatus {
    match rs.room.status {
        RoomStatus::Maintenance => RoomStatus::Maintenance,
        _ => implied_status(rs, today, Some(booking_id)),
    }
}
