use crate::model::*;

use super::conflict::stays_conflict;

// ── Availability Algorithm ────────────────────────────────────────

/// Whether `room` could take `stay` right now. Pure read.
pub fn is_free(rs: &RoomState, stay: &Stay) -> bool {
    rs.room.status != RoomStatus::Maintenance
        && !rs.active_overlapping(stay).any(|b| stays_conflict(&b.stay, stay))
}

/// Maximal free sub-ranges of `window` for one room: the window minus the
/// merged stays of active bookings. A room under maintenance has none.
pub fn free_windows(rs: &RoomState, window: &Stay) -> Vec<Stay> {
    if rs.room.status == RoomStatus::Maintenance {
        return Vec::new();
    }
    let mut taken: Vec<Stay> = rs
        .active_overlapping(window)
        .map(|b| {
            Stay::new(
                b.stay.check_in.max(window.check_in),
                b.stay.check_out.min(window.check_out),
            )
        })
        .collect();
    taken.sort_by_key(|s| s.check_in);
    let taken = merge_overlapping(&taken);
    subtract_stays(&[*window], &taken)
}

/// Merge sorted overlapping/adjacent stays into disjoint stays.
pub fn merge_overlapping(sorted: &[Stay]) -> Vec<Stay> {
    let mut merged: Vec<Stay> = Vec::new();
    for &stay in sorted {
        if let Some(last) = merged.last_mut()
            && stay.check_in <= last.check_out
        {
            last.check_out = last.check_out.max(stay.check_out);
            continue;
        }
        merged.push(stay);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by check-in, `to_remove` disjoint.
pub fn subtract_stays(base: &[Stay], to_remove: &[Stay]) -> Vec<Stay> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.check_in;
        let current_end = b.check_out;

        while ri < to_remove.len() && to_remove[ri].check_out <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].check_in < current_end {
            let r = &to_remove[j];
            if r.check_in > current_start {
                result.push(Stay::new(current_start, r.check_in));
            }
            current_start = current_start.max(r.check_out);
            j += 1;
        }

        if current_start < current_end {
            result.push(Stay::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn stay(a: u32, b: u32) -> Stay {
        Stay::new(d(a), d(b))
    }

    fn make_room(status: RoomStatus, bookings: Vec<(u32, u32, BookingStatus)>) -> RoomState {
        let room_id = Ulid::new();
        let mut rs = RoomState::new(Room {
            id: room_id,
            number: "12".into(),
            room_type: RoomType::Twin,
            capacity: 2,
            price: 9_900,
            status,
        });
        for (a, b, status) in bookings {
            rs.insert_booking(Booking {
                id: Ulid::new(),
                room_id,
                guest_id: Ulid::new(),
                stay: stay(a, b),
                status,
                total_price: 0,
                created_at: 0,
            });
        }
        rs
    }

    // ── subtract_stays ───────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![stay(1, 3), stay(5, 7)];
        let result = subtract_stays(&base, &[stay(3, 5)]);
        assert_eq!(result, base);
    }

    #[test]
    fn subtract_full_overlap() {
        assert!(subtract_stays(&[stay(2, 4)], &[stay(1, 6)]).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let result = subtract_stays(&[stay(1, 10)], &[stay(3, 5)]);
        assert_eq!(result, vec![stay(1, 3), stay(5, 10)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let result = subtract_stays(&[stay(1, 20)], &[stay(2, 3), stay(6, 8), stay(15, 20)]);
        assert_eq!(result, vec![stay(1, 2), stay(3, 6), stay(8, 15)]);
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_and_adjacent() {
        let merged = merge_overlapping(&[stay(1, 3), stay(2, 5), stay(5, 6), stay(8, 9)]);
        assert_eq!(merged, vec![stay(1, 6), stay(8, 9)]);
    }

    #[test]
    fn merge_empty() {
        assert!(merge_overlapping(&[]).is_empty());
    }

    // ── free_windows / is_free ───────────────────────────

    #[test]
    fn free_windows_around_bookings() {
        let rs = make_room(
            RoomStatus::Reserved,
            vec![
                (3, 5, BookingStatus::Confirmed),
                (5, 6, BookingStatus::Pending),
                (9, 12, BookingStatus::CheckedIn),
                (13, 14, BookingStatus::Cancelled),
            ],
        );
        let free = free_windows(&rs, &stay(1, 15));
        assert_eq!(free, vec![stay(1, 3), stay(6, 9), stay(12, 15)]);
    }

    #[test]
    fn free_windows_clamps_to_window() {
        let rs = make_room(RoomStatus::Reserved, vec![(1, 10, BookingStatus::Confirmed)]);
        assert_eq!(free_windows(&rs, &stay(8, 12)), vec![stay(10, 12)]);
    }

    #[test]
    fn maintenance_room_has_no_free_windows() {
        let rs = make_room(RoomStatus::Maintenance, vec![]);
        assert!(free_windows(&rs, &stay(1, 15)).is_empty());
        assert!(!is_free(&rs, &stay(1, 2)));
    }

    #[test]
    fn is_free_allows_turnover_day() {
        let rs = make_room(RoomStatus::Reserved, vec![(1, 3, BookingStatus::Confirmed)]);
        assert!(is_free(&rs, &stay(3, 5)));
        assert!(!is_free(&rs, &stay(2, 4)));
        assert!(is_free(&rs, &stay(3, 5)));
    }

    #[test]
    fn cancelled_and_completed_bookings_do_not_block() {
        let rs = make_room(
            RoomStatus::Available,
            vec![(1, 3, BookingStatus::Cancelled), (3, 6, BookingStatus::Completed)],
        );
        assert!(is_free(&rs, &stay(1, 6)));
        assert_eq!(free_windows(&rs, &stay(1, 6)), vec![stay(1, 6)]);
    }
}
