use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::lifecycle::ReservationStatus;
use crate::types::{EnvironmentId, ReservationId, Timestamp};

#[derive(Debug, Clone, FromRow)]
pub struct Reservation {
    pub id: ReservationId,
    pub status: ReservationStatus,
    pub username: String,
    pub environment_id: EnvironmentId,
    pub start_at: Timestamp,
    pub end_at: Timestamp,
    pub subject: Option<String>,
    pub labels: Option<String>,
    pub notify_on_start: bool,
    pub notify_on_end: bool,
    pub retention_until: Timestamp,
    pub created_at: DateTime<Utc>,
}

/// A validated booking, ready to be written.
#[derive(Debug, Clone)]
pub struct ReservationCreateDBRequest {
    pub username: String,
    pub environment_id: EnvironmentId,
    pub start_at: Timestamp,
    pub end_at: Timestamp,
    pub subject: Option<String>,
    pub labels: Option<String>,
    pub notify_on_start: bool,
    pub notify_on_end: bool,
    pub retention_until: Timestamp,
}

/// Just enough of an existing reservation to tell a user why theirs was refused.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ConflictingWindow {
    pub id: ReservationId,
    pub start_at: Timestamp,
    pub end_at: Timestamp,
}
