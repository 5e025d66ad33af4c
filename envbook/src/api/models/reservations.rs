use serde::{Deserialize, Serialize};

use crate::db::models::reservations::Reservation;
use crate::lifecycle::ReservationStatus;
use crate::types::{ReservationId, display};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationResponse {
    pub id: ReservationId,
    pub status: ReservationStatus,
    pub username: String,
    pub environment_id: String,
    pub start: String,
    pub end: String,
    pub subject: Option<String>,
    pub labels: Option<String>,
    pub notify_on_start: bool,
    pub notify_on_end: bool,
}

impl From<Reservation> for ReservationResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            id: reservation.id,
            status: reservation.status,
            username: reservation.username,
            environment_id: reservation.environment_id,
            start: display(reservation.start_at),
            end: display(reservation.end_at),
            subject: reservation.subject,
            labels: reservation.labels,
            notify_on_start: reservation.notify_on_start,
            notify_on_end: reservation.notify_on_end,
        }
    }
}
