use chrono::NaiveDate;

use crate::model::*;

use super::error::Unavailable;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// Build a stay, rejecting `check_out <= check_in`.
pub(crate) fn stay_from(check_in: NaiveDate, check_out: NaiveDate) -> Result<Stay, EngineError> {
    Stay::try_new(check_in, check_out).ok_or(EngineError::InvalidInterval { check_in, check_out })
}

/// Hotel policy on stay length and lead time.
pub(crate) fn validate_stay(stay: &Stay, settings: &SystemSettings, today: NaiveDate) -> Result<(), EngineError> {
    if stay.nights() > i64::from(settings.max_stay_nights) {
        return Err(EngineError::Invalid(format!(
            "stay of {} nights exceeds the maximum of {}",
            stay.nights(),
            settings.max_stay_nights
        )));
    }
    let horizon = today + chrono::Duration::days(i64::from(settings.booking_horizon_days));
    if stay.check_in > horizon {
        return Err(EngineError::Invalid(format!(
            "check_in {} is beyond the booking horizon ({horizon})",
            stay.check_in
        )));
    }
    Ok(())
}

/// The overlap predicate: half-open `[check_in, check_out)` intersection.
pub fn stays_conflict(a: &Stay, b: &Stay) -> bool {
    a.check_in < b.check_out && a.check_out > b.check_in
}

/// Fail if the room cannot take `stay`: under maintenance, or an active
/// booking overlaps it.
pub(crate) fn check_no_conflict(rs: &RoomState, stay: &Stay) -> Result<(), EngineError> {
    if rs.room.status == RoomStatus::Maintenance {
        return Err(EngineError::Unavailable(Unavailable::Maintenance(rs.room.id)));
    }
    for booking in rs.active_overlapping(stay) {
        if stays_conflict(&booking.stay, stay) {
            return Err(EngineError::Unavailable(Unavailable::Conflict {
                room_id: rs.room.id,
                booking_id: booking.id,
            }));
        }
    }
    Ok(())
}

/// Nightly price times nights. Whole-day stays make the night count exact.
pub(crate) fn quote(room: &Room, stay: &Stay) -> Result<Cents, EngineError> {
    room.price
        .checked_mul(stay.nights())
        .ok_or(EngineError::LimitExceeded("total price overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn february_cases() {
        let existing = Stay::new(d(2024, 2, 1), d(2024, 2, 3));
        assert!(stays_conflict(&Stay::new(d(2024, 2, 2), d(2024, 2, 4)), &existing));
        assert!(!stays_conflict(&Stay::new(d(2024, 2, 3), d(2024, 2, 5)), &existing)); // turnover
        assert!(stays_conflict(&Stay::new(d(2024, 1, 30), d(2024, 2, 2)), &existing));
    }

    #[test]
    fn conflict_is_symmetric_half_open_intersection() {
        let base = d(2024, 1, 1);
        let day = |n: i64| base + chrono::Duration::days(n);
        for a1 in 0..6 {
            for a2 in (a1 + 1)..7 {
                for b1 in 0..6 {
                    for b2 in (b1 + 1)..7 {
                        let a = Stay::new(day(a1), day(a2));
                        let b = Stay::new(day(b1), day(b2));
                        let shared_night = (a1..a2).any(|n| (b1..b2).contains(&n));
                        assert_eq!(stays_conflict(&a, &b), shared_night, "{a:?} vs {b:?}");
                        assert_eq!(stays_conflict(&a, &b), stays_conflict(&b, &a));
                    }
                }
            }
        }
    }
}
