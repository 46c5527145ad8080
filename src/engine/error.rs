use chrono::NaiveDate;
use ulid::Ulid;

use crate::policy::Denied;

/// Which kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Room,
    Booking,
    User,
    Payment,
    Refund,
    Review,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Entity::Room => "room",
            Entity::Booking => "booking",
            Entity::User => "user",
            Entity::Payment => "payment",
            Entity::Refund => "refund",
            Entity::Review => "review",
        })
    }
}

/// Why a room cannot take a booking (or be removed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// An active booking already holds part of the requested stay.
    Conflict { room_id: Ulid, booking_id: Ulid },
    Maintenance(Ulid),
    HasActiveBookings(Ulid),
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Entity, Ulid),
    InvalidInterval {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    Unavailable(Unavailable),
    /// The room changed underneath the operation; the whole call may be retried once.
    ConcurrencyConflict(Ulid),
    InvalidTransition {
        entity: Entity,
        id: Ulid,
        from: &'static str,
        to: &'static str,
    },
    AlreadyExists(Entity, String),
    Invalid(String),
    LimitExceeded(&'static str),
    Forbidden(Denied),
    WalError(String),
}

/// The closed error taxonomy shared by every surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInterval,
    Unavailable,
    ConcurrencyConflict,
    InvalidTransition,
    AlreadyExists,
    Invalid,
    Forbidden,
    Store,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidInterval => "INVALID_INTERVAL",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            ErrorKind::InvalidTransition => "INVALID_TRANSITION",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::Invalid => "INVALID",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Store => "STORE_ERROR",
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(..) => ErrorKind::NotFound,
            EngineError::InvalidInterval { .. } => ErrorKind::InvalidInterval,
            EngineError::Unavailable(_) => ErrorKind::Unavailable,
            EngineError::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::AlreadyExists(..) => ErrorKind::AlreadyExists,
            EngineError::Invalid(_) | EngineError::LimitExceeded(_) => ErrorKind::Invalid,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::WalError(_) => ErrorKind::Store,
        }
    }
}

impl From<Denied> for EngineError {
    fn from(denied: Denied) -> Self {
        EngineError::Forbidden(denied)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::InvalidInterval { check_in, check_out } => write!(
                f,
                "invalid date range: check_out {check_out} must be after check_in {check_in}"
            ),
            EngineError::Unavailable(Unavailable::Conflict { room_id, booking_id }) => write!(
                f,
                "room {room_id} unavailable for requested dates: overlaps booking {booking_id}"
            ),
            EngineError::Unavailable(Unavailable::Maintenance(id)) => {
                write!(f, "room {id} is under maintenance")
            }
            EngineError::Unavailable(Unavailable::HasActiveBookings(id)) => {
                write!(f, "room {id} still has active bookings")
            }
            EngineError::ConcurrencyConflict(id) => {
                write!(f, "room {id} changed concurrently, retry the request")
            }
            EngineError::InvalidTransition { entity, id, from, to } => {
                write!(f, "{entity} {id} cannot move from {from} to {to}")
            }
            EngineError::AlreadyExists(entity, key) => write!(f, "{entity} already exists: {key}"),
            EngineError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Forbidden(denied) => write!(f, "forbidden: {denied}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
