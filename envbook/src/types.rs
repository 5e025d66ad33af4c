//! Common type definitions shared across the crate.
//!
//! # ID Types
//!
//! - [`ReservationId`]: store-assigned reservation identifier
//! - [`EnvironmentId`]: plain, normalized environment identifier (see [`crate::environments`])
//!
//! # Time
//!
//! All reservation timestamps are naive wall-clock times in the process-local timezone, held at
//! minute granularity. [`Timestamp`] is the alias used everywhere, and [`minute_floor`],
//! [`add_months`] and [`display`] are the helpers that keep that convention in one place.

use chrono::{Months, NaiveDateTime, Timelike};

pub type ReservationId = i64;
pub type EnvironmentId = String;
pub type Timestamp = NaiveDateTime;

/// Layout used when showing timestamps to users and in mails.
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Drop seconds and sub-second precision.
pub fn minute_floor(ts: Timestamp) -> Timestamp {
    ts.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(ts)
}

/// Calendar month arithmetic, clamping to the last day of shorter months (Jan 31 + 1 = Feb 28/29).
/// Saturates at the maximum representable time.
pub fn add_months(ts: Timestamp, months: u32) -> Timestamp {
    ts.checked_add_months(Months::new(months)).unwrap_or(NaiveDateTime::MAX)
}

pub fn display(ts: Timestamp) -> String {
    ts.format(DISPLAY_FORMAT).to_string()
}
