use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for creation timestamps only.
pub type Ms = i64;

/// Money in minor currency units.
pub type Cents = i64;

/// Half-open stay `[check_in, check_out)` in whole days.
///
/// A guest leaving on day D and another arriving on day D do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "Stay check_in must be before check_out");
        Self { check_in, check_out }
    }

    /// `None` unless `check_out` is strictly after `check_in`.
    pub fn try_new(check_in: NaiveDate, check_out: NaiveDate) -> Option<Self> {
        (check_in < check_out).then_some(Self { check_in, check_out })
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.check_in <= day && day < self.check_out
    }
}

/// A status string that is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Closed string-backed enum: serde, `Display` and `FromStr` all agree on
/// the same SCREAMING_SNAKE_CASE spelling.
macro_rules! closed_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

closed_enum!(
    RoomStatus {
        Available => "AVAILABLE",
        Occupied => "OCCUPIED",
        Reserved => "RESERVED",
        Maintenance => "MAINTENANCE",
    }
);

closed_enum!(
    RoomType {
        Single => "SINGLE",
        Double => "DOUBLE",
        Twin => "TWIN",
        Suite => "SUITE",
        Deluxe => "DELUXE",
    }
);

closed_enum!(
    BookingStatus {
        Pending => "PENDING",
        Confirmed => "CONFIRMED",
        CheckedIn => "CHECKED_IN",
        Cancelled => "CANCELLED",
        Completed => "COMPLETED",
    }
);

closed_enum!(
    Role {
        Admin => "ADMIN",
        Manager => "MANAGER",
        Staff => "STAFF",
        Concierge => "CONCIERGE",
        Guest => "GUEST",
    }
);

closed_enum!(
    PaymentStatus {
        Pending => "PENDING",
        Completed => "COMPLETED",
        Failed => "FAILED",
    }
);

closed_enum!(
    PaymentMethod {
        Card => "CARD",
        Cash => "CASH",
        BankTransfer => "BANK_TRANSFER",
    }
);

closed_enum!(
    RefundStatus {
        Pending => "PENDING",
        Completed => "COMPLETED",
    }
);

impl BookingStatus {
    /// Active bookings hold their room and take part in conflict detection.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::CheckedIn
        )
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, CheckedIn)
                | (CheckedIn, Completed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }
}

impl PaymentStatus {
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
        )
    }
}

impl RefundStatus {
    pub fn can_transition_to(self, next: RefundStatus) -> bool {
        matches!((self, next), (RefundStatus::Pending, RefundStatus::Completed))
    }
}

impl Role {
    /// Hotel employees: everyone except guests.
    pub fn is_staff(self) -> bool {
        !matches!(self, Role::Guest)
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub number: String,
    pub room_type: RoomType,
    pub capacity: u32,
    /// Price per night.
    pub price: Cents,
    pub status: RoomStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub guest_id: Ulid,
    #[serde(flatten)]
    pub stay: Stay,
    pub status: BookingStatus,
    pub total_price: Cents,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub amount: Cents,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub amount: Cents,
    pub reason: Option<String>,
    pub status: RefundStatus,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub room_id: Ulid,
    pub guest_id: Ulid,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: Ms,
}

/// Hotel-wide settings. Persisted through the WAL and owned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSettings {
    pub hotel_name: String,
    pub currency: String,
    pub max_stay_nights: u32,
    /// How far ahead of today a stay may start.
    pub booking_horizon_days: u32,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            hotel_name: "Innkeeper Hotel".into(),
            currency: "USD".into(),
            max_stay_nights: 30,
            booking_horizon_days: 365,
        }
    }
}

// ── Per-room state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Every booking ever made for this room, sorted by `stay.check_in`.
    pub bookings: Vec<Booking>,
    /// Set once the room is deleted; holders of a stale handle must back off.
    pub retired: bool,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
            retired: false,
        }
    }

    /// Insert booking maintaining sort order by check-in.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.stay.check_in <= booking.stay.check_in);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn active_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.status.is_active())
    }

    /// Active bookings whose stay overlaps `query`.
    /// Uses binary search to skip bookings starting on or after `query.check_out`.
    pub fn active_overlapping(&self, query: &Stay) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.check_in < query.check_out);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.status.is_active() && b.stay.check_out > query.check_in)
    }
}

// ── Query result types ───────────────────────────────────────────

/// Role-scoped summary. Sections the caller's role may not see are `None`
/// and left out of the JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dashboard {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rooms_by_status: Option<BTreeMap<RoomStatus, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookings_by_status: Option<BTreeMap<BookingStatus, usize>>,
    /// Occupied rooms over rooms in service, 0.0 when none are in service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupancy_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrivals_today: Option<Vec<Booking>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departures_today: Option<Vec<Booking>>,
    /// Completed payments minus completed refunds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<Cents>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_bookings: Option<Vec<Booking>>,
}

/// The event types. This is the WAL record format and the payload of
/// room notifications.
///
/// Booking events carry the room status that results from them so a
/// single record is the whole transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        number: String,
        room_type: RoomType,
        capacity: u32,
        price: Cents,
    },
    RoomUpdated {
        id: Ulid,
        room_type: RoomType,
        capacity: u32,
        price: Cents,
    },
    RoomDeleted {
        id: Ulid,
    },
    RoomStatusChanged {
        id: Ulid,
        status: RoomStatus,
    },
    UserRegistered {
        id: Ulid,
        name: String,
        email: String,
        role: Role,
    },
    BookingCreated {
        id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        stay: Stay,
        total_price: Cents,
        created_at: Ms,
        room_status: RoomStatus,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
        room_status: RoomStatus,
    },
    PaymentRecorded {
        id: Ulid,
        booking_id: Ulid,
        amount: Cents,
        method: PaymentMethod,
        created_at: Ms,
    },
    PaymentStatusChanged {
        id: Ulid,
        booking_id: Ulid,
        status: PaymentStatus,
        /// The payment settled the booking, which moves PENDING -> CONFIRMED.
        confirms_booking: bool,
    },
    RefundRequested {
        id: Ulid,
        booking_id: Ulid,
        amount: Cents,
        reason: Option<String>,
        created_at: Ms,
    },
    RefundCompleted {
        id: Ulid,
        booking_id: Ulid,
    },
    ReviewPosted {
        id: Ulid,
        booking_id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        rating: u8,
        comment: Option<String>,
        created_at: Ms,
    },
    SettingsUpdated {
        settings: SystemSettings,
    },
}
