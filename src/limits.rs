//! Hard caps that hold regardless of the configurable hotel settings.

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_USERS: usize = 1_000_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

pub const MAX_ROOM_NUMBER_LEN: usize = 32;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_COMMENT_LEN: usize = 4096;

pub const MAX_ROOM_CAPACITY: u32 = 64;
/// No single night may cost more than this (minor units).
pub const MAX_NIGHTLY_PRICE: i64 = 100_000_000;

/// Upper bound for `SystemSettings::max_stay_nights`.
pub const MAX_STAY_NIGHTS: u32 = 366;
/// Upper bound for `SystemSettings::booking_horizon_days`.
pub const MAX_BOOKING_HORIZON_DAYS: u32 = 1_096;
/// Widest window accepted by free-window queries.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 732;
