//! Reservation start/end notifications.
//!
//! The scanner calls a [`Notifier`] after a reservation changed state and the user asked to be told.
//! Delivery is best-effort: callers log failures and carry on.

use async_trait::async_trait;

use crate::db::models::reservations::Reservation;
use crate::email::{EmailService, ReservationMailInfo};
use crate::errors::Error;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_start(&self, contact: &str, reservation: &Reservation, environment_name: &str) -> Result<(), Error>;

    async fn notify_end(&self, contact: &str, reservation: &Reservation, environment_name: &str) -> Result<(), Error>;
}

fn mail_info<'a>(reservation: &'a Reservation, environment_name: &'a str) -> ReservationMailInfo<'a> {
    ReservationMailInfo {
        username: &reservation.username,
        environment_name,
        start: reservation.start_at,
        end: reservation.end_at,
        subject: reservation.subject.as_deref(),
    }
}

pub struct EmailNotifier {
    email: EmailService,
}

impl EmailNotifier {
    pub fn new(email: EmailService) -> Self {
        Self { email }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify_start(&self, contact: &str, reservation: &Reservation, environment_name: &str) -> Result<(), Error> {
        self.email
            .send_reservation_started(contact, &mail_info(reservation, environment_name))
            .await
    }

    async fn notify_end(&self, contact: &str, reservation: &Reservation, environment_name: &str) -> Result<(), Error> {
        self.email
            .send_reservation_expired(contact, &mail_info(reservation, environment_name))
            .await
    }
}
