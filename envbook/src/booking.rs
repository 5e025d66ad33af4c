//! Reservation creation and abort.
//!
//! Creation runs the booking checks in a fixed order and stops at the first failure. The checks
//! on the booking window are pure; the remaining ones read the store and run in the same
//! transaction as the final insert, after taking the environment's advisory lock, so two
//! concurrent requests for the same environment cannot both pass the conflict check.

use std::{fmt, sync::Arc};

use chrono::Duration;
use serde::Deserialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::clock::Clock;
use crate::config::BookingConfig;
use crate::db::{
    errors::DbError,
    handlers::{Reservations, Users},
    models::reservations::{ConflictingWindow, Reservation, ReservationCreateDBRequest},
};
use crate::environments::Registry;
use crate::lifecycle::{ReservationStatus, retention_until};
use crate::types::{EnvironmentId, ReservationId, Timestamp, add_months, display, minute_floor};

/// Why the notification part of a booking request cannot be honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactProblem {
    NotificationsDisabled,
    NoAddress,
}

impl fmt::Display for ContactProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactProblem::NotificationsDisabled => f.write_str("e-mail notifications are not enabled on this server"),
            ContactProblem::NoAddress => f.write_str("no e-mail address is stored for you, so you cannot be notified"),
        }
    }
}

/// A booking request rejected because of its content. Always safe to show to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("reservations must start in the future")]
    StartInPast,

    #[error("the end of a reservation must be after its start")]
    EndNotAfterStart,

    #[error("reservations may last at most {max_days} days")]
    TooLong { max_days: u32 },

    #[error("reservations may start at most {max_months} months in the future")]
    TooFarOut { max_months: u32 },

    #[error("environment '{0}' does not exist")]
    UnknownEnvironment(EnvironmentId),

    #[error("environment '{0}' requires an SSH public key, but none is stored for you")]
    MissingSecretMaterial(EnvironmentId),

    #[error("{0}")]
    MissingContact(ContactProblem),

    #[error("reservation conflicts with an existing reservation from {} to {}", display(.0.start_at), display(.0.end_at))]
    Conflict(ConflictingWindow),
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("reservation {0} has already started or ended and can no longer be aborted")]
    NotAbortable(ReservationId),

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<sqlx::Error> for BookingError {
    fn from(err: sqlx::Error) -> Self {
        BookingError::Database(err.into())
    }
}

/// A booking request as submitted by a user.
#[derive(Debug, Clone, Deserialize)]
pub struct NewReservation {
    pub environment_id: EnvironmentId,
    pub start: Timestamp,
    pub end: Timestamp,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub labels: Option<String>,
    #[serde(default)]
    pub notify_on_start: bool,
    #[serde(default)]
    pub notify_on_end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    Deleted,
    /// Nothing to abort: the reservation is gone or belongs to someone else.
    NotFound,
}

/// Checks on the requested window alone, in booking order.
pub fn check_window(now: Timestamp, start: Timestamp, end: Timestamp, limits: &BookingConfig) -> Result<(), ValidationError> {
    if start <= now {
        return Err(ValidationError::StartInPast);
    }
    if start >= end {
        return Err(ValidationError::EndNotAfterStart);
    }
    if end - start > Duration::days(i64::from(limits.max_reservation_duration_days)) {
        return Err(ValidationError::TooLong {
            max_days: limits.max_reservation_duration_days,
        });
    }
    if start > add_months(now, limits.max_queuing_time_months) {
        return Err(ValidationError::TooFarOut {
            max_months: limits.max_queuing_time_months,
        });
    }
    Ok(())
}

#[derive(Clone)]
pub struct ReservationService {
    pool: PgPool,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    limits: BookingConfig,
    notifications_enabled: bool,
}

impl ReservationService {
    pub fn new(pool: PgPool, registry: Arc<Registry>, clock: Arc<dyn Clock>, limits: BookingConfig, notifications_enabled: bool) -> Self {
        Self {
            pool,
            registry,
            clock,
            limits,
            notifications_enabled,
        }
    }

    /// Rejections are logged at debug level only; store faults at error level.
    #[instrument(skip(self, request), fields(environment_id = %request.environment_id))]
    pub async fn create_reservation(&self, username: &str, request: NewReservation) -> Result<Reservation, BookingError> {
        let start = minute_floor(request.start);
        let end = minute_floor(request.end);

        let result = self.try_create(username, &request, start, end).await;
        match &result {
            Err(BookingError::Validation(e)) => debug!(username, error = %e, "Reservation rejected"),
            Err(e) => error!(username, error = %e, "Failed to create reservation"),
            Ok(_) => {}
        }
        result
    }

    async fn try_create(&self, username: &str, request: &NewReservation, start: Timestamp, end: Timestamp) -> Result<Reservation, BookingError> {
        check_window(self.clock.now(), start, end, &self.limits)?;

        let environment_id = request.environment_id.as_str();
        if !self.registry.exists(environment_id) {
            return Err(ValidationError::UnknownEnvironment(environment_id.to_string()).into());
        }

        let mut tx = self.pool.begin().await?;

        if self.registry.has_secret_requirement(environment_id) && Users::new(&mut tx).ssh_key(username).await?.is_none() {
            return Err(ValidationError::MissingSecretMaterial(environment_id.to_string()).into());
        }

        if request.notify_on_start || request.notify_on_end {
            if !self.notifications_enabled {
                return Err(ValidationError::MissingContact(ContactProblem::NotificationsDisabled).into());
            }
            if Users::new(&mut tx).email(username).await?.is_none() {
                return Err(ValidationError::MissingContact(ContactProblem::NoAddress).into());
            }
        }

        let mut reservations = Reservations::new(&mut tx);
        reservations.lock_environment(environment_id).await?;
        if let Some(window) = reservations.find_conflict(environment_id, start, end).await? {
            return Err(ValidationError::Conflict(window).into());
        }

        let reservation = reservations
            .insert(&ReservationCreateDBRequest {
                username: username.to_string(),
                environment_id: environment_id.to_string(),
                start_at: start,
                end_at: end,
                subject: request.subject.clone().filter(|s| !s.trim().is_empty()),
                labels: request.labels.clone().filter(|s| !s.trim().is_empty()),
                notify_on_start: request.notify_on_start,
                notify_on_end: request.notify_on_end,
                retention_until: retention_until(end, self.limits.database_ttl_months),
            })
            .await?;

        tx.commit().await?;

        info!(
            reservation_id = reservation.id,
            username,
            environment_id,
            start = %display(start),
            end = %display(end),
            "Reservation created"
        );
        Ok(reservation)
    }

    /// Delete an upcoming reservation of `username`.
    ///
    /// Runs against the row lock the scanner holds while transitioning a reservation, so an abort
    /// that loses the race to an activation sees the new status and is refused.
    #[instrument(skip(self))]
    pub async fn abort_reservation(&self, username: &str, id: ReservationId) -> Result<AbortOutcome, BookingError> {
        let result = self.try_abort(username, id).await;
        match &result {
            Err(e @ BookingError::NotAbortable(_)) => debug!(username, error = %e, "Abort refused"),
            Err(e) => error!(username, reservation_id = id, error = %e, "Failed to abort reservation"),
            Ok(_) => {}
        }
        result
    }

    async fn try_abort(&self, username: &str, id: ReservationId) -> Result<AbortOutcome, BookingError> {
        let mut tx = self.pool.begin().await?;
        let mut reservations = Reservations::new(&mut tx);

        let Some(reservation) = reservations.lock_owned(id, username).await? else {
            info!(reservation_id = id, username, "Abort of missing or foreign reservation ignored");
            return Ok(AbortOutcome::NotFound);
        };

        if reservation.status != ReservationStatus::Upcoming {
            return Err(BookingError::NotAbortable(id));
        }

        reservations.delete(id).await?;
        tx.commit().await?;

        info!(reservation_id = id, username, environment_id = %reservation.environment_id, "Reservation aborted");
        Ok(AbortOutcome::Deleted)
    }
}
