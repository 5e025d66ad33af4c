//! Reservation lifecycle state machine.
//!
//! ```text
//!              start reached              end reached
//!  upcoming ───────────────────► active ─────────────► expired ──┐
//!     │ │                                                  ▲      │ retention passed
//!     │ └──────────────────────────────────────────────────┘      ├──► deleted
//!     │        end passed before activation                       │
//!     └──────────────────────────────────────────────► error ─────┘
//!              activation preconditions failed
//! ```
//!
//! Transitions are driven purely by time. [`due_transition`] decides, for a given reference time,
//! what the scanner must do with a reservation; [`ReservationStatus::can_transition_to`] is the
//! guard every status write goes through.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::models::reservations::Reservation;
use crate::types::{Timestamp, add_months};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Upcoming,
    Active,
    Expired,
    Error,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Upcoming => "upcoming",
            ReservationStatus::Active => "active",
            ReservationStatus::Expired => "expired",
            ReservationStatus::Error => "error",
        }
    }

    /// Terminal reservations only wait for their retention to pass.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Expired | ReservationStatus::Error)
    }

    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Upcoming, Active) | (Upcoming, Expired) | (Upcoming, Error) | (Active, Expired)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the scanner has to do with one reservation at a given time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// upcoming → active, provisioning access first
    Activate,
    /// upcoming → expired, the window passed without ever being activated
    ExpireUnstarted,
    /// active → expired, revoking access first
    Deactivate,
    /// terminal → deleted
    Purge,
}

pub fn due_transition(reservation: &Reservation, now: Timestamp) -> Option<Transition> {
    match reservation.status {
        ReservationStatus::Upcoming if reservation.end_at <= now => Some(Transition::ExpireUnstarted),
        ReservationStatus::Upcoming if reservation.start_at <= now => Some(Transition::Activate),
        ReservationStatus::Active if reservation.end_at <= now => Some(Transition::Deactivate),
        status if status.is_terminal() && reservation.retention_until <= now => Some(Transition::Purge),
        _ => None,
    }
}

/// When a reservation ending at `end` becomes eligible for deletion.
pub fn retention_until(end: Timestamp, ttl_months: u32) -> Timestamp {
    add_months(end, ttl_months)
}
