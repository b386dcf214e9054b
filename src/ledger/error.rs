use ulid::Ulid;

use crate::model::{AppointmentStatus, Ms};

#[derive(Debug)]
pub enum LedgerError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The candidate span overlaps a live appointment. `next_available` is
    /// the finder's suggestion; `None` means the search horizon is fully
    /// booked, which is a legitimate answer rather than a failure.
    Conflict {
        with: Ulid,
        next_available: Option<Ms>,
    },
    SlotInactive(Ulid),
    StartInPast {
        start: Ms,
        now: Ms,
    },
    Forbidden(Ulid),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    CancelNotice {
        start: Ms,
        required_ms: Ms,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::NotFound(id) => write!(f, "not found: {id}"),
            LedgerError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            LedgerError::Conflict { with, next_available } => match next_available {
                Some(t) => write!(f, "conflicts with appointment {with}; next opening at {t}"),
                None => write!(f, "conflicts with appointment {with}; no opening within the search horizon"),
            },
            LedgerError::SlotInactive(id) => write!(f, "slot {id} is not accepting bookings"),
            LedgerError::StartInPast { start, now } => {
                write!(f, "start {start} is in the past (now {now})")
            }
            LedgerError::Forbidden(actor) => write!(f, "actor {actor} is not allowed to do this"),
            LedgerError::InvalidTransition { from, to } => {
                write!(f, "illegal status transition: {from} -> {to}")
            }
            LedgerError::CancelNotice { start, required_ms } => {
                let hours = required_ms / 3_600_000;
                write!(f, "appointment at {start} needs {hours}h cancellation notice")
            }
            LedgerError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            LedgerError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for LedgerError {}
