//! Database repository for reservations.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    models::reservations::{ConflictingWindow, Reservation, ReservationCreateDBRequest},
};
use crate::lifecycle::ReservationStatus;
use crate::types::{ReservationId, Timestamp};

/// Which end of the booking window a due check compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueOn {
    Start,
    End,
}

pub struct Reservations<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Reservations<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Serialize writers for one environment until the surrounding transaction ends.
    ///
    /// Must be called on a transaction; on a bare connection the lock is released immediately.
    #[instrument(skip(self), err)]
    pub async fn lock_environment(&mut self, environment_id: &str) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(environment_id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    /// First stored reservation on `environment_id` whose window touches `[start, end]`.
    #[instrument(skip(self), err)]
    pub async fn find_conflict(&mut self, environment_id: &str, start: Timestamp, end: Timestamp) -> Result<Option<ConflictingWindow>> {
        let conflict = sqlx::query_as::<_, ConflictingWindow>(
            r#"
            SELECT id, start_at, end_at
            FROM reservations
            WHERE environment_id = $1
              AND start_at <= $3
              AND end_at >= $2
            ORDER BY start_at
            LIMIT 1
            "#,
        )
        .bind(environment_id)
        .bind(start)
        .bind(end)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(conflict)
    }

    #[instrument(skip(self, request), fields(username = %request.username, environment_id = %request.environment_id), err)]
    pub async fn insert(&mut self, request: &ReservationCreateDBRequest) -> Result<Reservation> {
        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations
                (status, username, environment_id, start_at, end_at, subject, labels,
                 notify_on_start, notify_on_end, retention_until)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(ReservationStatus::Upcoming)
        .bind(&request.username)
        .bind(&request.environment_id)
        .bind(request.start_at)
        .bind(request.end_at)
        .bind(&request.subject)
        .bind(&request.labels)
        .bind(request.notify_on_start)
        .bind(request.notify_on_end)
        .bind(request.retention_until)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(reservation)
    }

    #[instrument(skip(self), err)]
    pub async fn get(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(reservation)
    }

    /// Row-locks a reservation owned by `username`. `None` if it is gone or belongs to someone else.
    #[instrument(skip(self), err)]
    pub async fn lock_owned(&mut self, id: ReservationId, username: &str) -> Result<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1 AND username = $2 FOR UPDATE")
            .bind(id)
            .bind(username)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(reservation)
    }

    #[instrument(skip(self), err)]
    pub async fn list_for_user(&mut self, username: &str) -> Result<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE username = $1 ORDER BY start_at, id")
            .bind(username)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(reservations)
    }

    #[instrument(skip(self), err)]
    pub async fn list_for_environment(&mut self, environment_id: &str) -> Result<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE environment_id = $1 ORDER BY start_at, id")
            .bind(environment_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(reservations)
    }

    /// Active reservations of `username`, ordered by environment.
    #[instrument(skip(self), err)]
    pub async fn list_active_for_user(&mut self, username: &str) -> Result<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE username = $1 AND status = $2 ORDER BY environment_id, start_at",
        )
        .bind(username)
        .bind(ReservationStatus::Active)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(reservations)
    }

    /// Locks every reservation in `status` whose start or end is at or before `now`.
    ///
    /// Rows already locked by another transaction are skipped; they are picked up by a later sweep.
    #[instrument(skip(self), err)]
    pub async fn lock_due(&mut self, status: ReservationStatus, due_on: DueOn, now: Timestamp) -> Result<Vec<Reservation>> {
        let query = match due_on {
            DueOn::Start => "SELECT * FROM reservations WHERE status = $1 AND start_at <= $2 ORDER BY start_at, id FOR UPDATE SKIP LOCKED",
            DueOn::End => "SELECT * FROM reservations WHERE status = $1 AND end_at <= $2 ORDER BY end_at, id FOR UPDATE SKIP LOCKED",
        };

        let reservations = sqlx::query_as::<_, Reservation>(query)
            .bind(status)
            .bind(now)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(reservations)
    }

    /// Compare-and-set status write. Returns false if the reservation is no longer in `from`.
    #[instrument(skip(self), err)]
    pub async fn set_status(&mut self, id: ReservationId, from: ReservationStatus, to: ReservationStatus) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(DbError::IllegalTransition { from, to });
        }

        let result = sqlx::query("UPDATE reservations SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from)
            .bind(to)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&mut self, id: ReservationId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Locks terminal reservations whose retention has passed, skipping rows locked elsewhere.
    #[instrument(skip(self), err)]
    pub async fn lock_retired(&mut self, now: Timestamp) -> Result<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE status IN ($1, $2)
              AND retention_until <= $3
            ORDER BY retention_until, id
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(ReservationStatus::Expired)
        .bind(ReservationStatus::Error)
        .bind(now)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(reservations)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_many(&mut self, ids: &[ReservationId]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM reservations WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
