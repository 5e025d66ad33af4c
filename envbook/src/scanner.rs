//! Reservation scanner.
//!
//! The scanner is the only component that moves reservations through their lifecycle. One
//! [`sweep`](ReservationScanner::sweep) runs four phases against a single reference time:
//!
//! 1. **deactivate** active reservations whose end has come, revoking access
//! 2. **activate** upcoming reservations whose start has come, provisioning access (or expiring
//!    them directly when their whole window has already passed)
//! 3. **purge** terminal reservations past their retention
//! 4. **purge users** past their retention
//!
//! Each phase commits on its own, so a store fault only loses the phase it happened in; the next
//! sweep picks up whatever is left. Inside a phase every reservation is written under its own
//! savepoint, and the rows being processed stay locked (`FOR UPDATE SKIP LOCKED`) until the phase
//! commits, which keeps concurrent sweeps and user aborts from acting on the same reservation.

use std::{sync::Arc, time::Duration};

use sqlx::{Connection, PgConnection, PgPool};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::SecretsBroker;
use crate::clock::Clock;
use crate::db::{
    errors::DbError,
    handlers::{Reservations, Users, reservations::DueOn},
    models::reservations::Reservation,
};
use crate::environments::Registry;
use crate::lifecycle::{ReservationStatus, Transition, due_transition};
use crate::notifications::Notifier;
use crate::types::Timestamp;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// active → expired
    pub deactivated: usize,
    /// upcoming → active
    pub activated: usize,
    /// upcoming → expired without ever being active
    pub expired_unstarted: usize,
    /// upcoming → error
    pub failed: usize,
    pub purged_reservations: usize,
    pub purged_users: u64,
    /// Phases rolled back because of a store fault
    pub aborted_phases: usize,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        *self == SweepReport::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoticeKind {
    Start,
    End,
}

#[derive(Clone)]
pub struct ReservationScanner {
    pool: PgPool,
    registry: Arc<Registry>,
    broker: Arc<dyn SecretsBroker>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Arc<dyn Clock>,
}

impl ReservationScanner {
    /// `notifier` is `None` when notifications are disabled.
    pub fn new(
        pool: PgPool,
        registry: Arc<Registry>,
        broker: Arc<dyn SecretsBroker>,
        notifier: Option<Arc<dyn Notifier>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            registry,
            broker,
            notifier,
            clock,
        }
    }

    /// Run exactly one sweep against the current time.
    pub async fn scan_now(&self) -> SweepReport {
        self.sweep(self.clock.now()).await
    }

    /// Run the four phases against `now`.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();

        if let Err(e) = self.deactivate_phase(now, &mut report).await {
            error!(phase = "deactivate", error = %e, "Store fault, phase rolled back");
            report.aborted_phases += 1;
        }
        if let Err(e) = self.activate_phase(now, &mut report).await {
            error!(phase = "activate", error = %e, "Store fault, phase rolled back");
            report.aborted_phases += 1;
        }
        if let Err(e) = self.purge_phase(now, &mut report).await {
            error!(phase = "purge", error = %e, "Store fault, phase rolled back");
            report.aborted_phases += 1;
        }
        if let Err(e) = self.user_retention_phase(now, &mut report).await {
            error!(phase = "user retention", error = %e, "Store fault, phase rolled back");
            report.aborted_phases += 1;
        }

        report
    }

    /// Sweep every `interval` until `shutdown` is cancelled. The first sweep runs immediately.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!(?interval, "Starting reservation scanner");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reservation scanner shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.scan_now().await;
                    if report.is_idle() {
                        debug!("Sweep finished, nothing to do");
                    } else {
                        info!(?report, "Sweep finished");
                    }
                }
            }
        }
    }

    async fn deactivate_phase(&self, now: Timestamp, report: &mut SweepReport) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        let due = Reservations::new(&mut tx).lock_due(ReservationStatus::Active, DueOn::End, now).await?;

        let mut notices = Vec::new();
        for reservation in due {
            if due_transition(&reservation, now) != Some(Transition::Deactivate) {
                continue;
            }

            if !self.registry.exists(&reservation.environment_id) {
                warn!(
                    reservation_id = reservation.id,
                    environment_id = %reservation.environment_id,
                    "Environment no longer configured, expiring without revoking access"
                );
            } else if let Err(e) = self.broker.end_environment_access(&reservation.environment_id).await {
                // The booking is over either way; only the cleanup failed
                error!(
                    reservation_id = reservation.id,
                    environment_id = %reservation.environment_id,
                    error = %e,
                    "Failed to revoke environment access, credentials may remain valid"
                );
            }

            if self.transition(&mut tx, &reservation, ReservationStatus::Expired).await? {
                report.deactivated += 1;
                if reservation.notify_on_end {
                    notices.push((reservation, NoticeKind::End));
                }
            }
        }

        tx.commit().await?;
        self.send_notices(notices).await;
        Ok(())
    }

    async fn activate_phase(&self, now: Timestamp, report: &mut SweepReport) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        let due = Reservations::new(&mut tx).lock_due(ReservationStatus::Upcoming, DueOn::Start, now).await?;

        let mut notices = Vec::new();
        for reservation in due {
            match due_transition(&reservation, now) {
                Some(Transition::ExpireUnstarted) => {
                    if self.transition(&mut tx, &reservation, ReservationStatus::Expired).await? {
                        info!(
                            reservation_id = reservation.id,
                            environment_id = %reservation.environment_id,
                            "Reservation window passed before activation, expired"
                        );
                        report.expired_unstarted += 1;
                    }
                }
                Some(Transition::Activate) => {
                    let target = self.provision(&mut tx, &reservation).await;
                    if self.transition(&mut tx, &reservation, target).await? {
                        match target {
                            ReservationStatus::Active => {
                                report.activated += 1;
                                if reservation.notify_on_start {
                                    notices.push((reservation, NoticeKind::Start));
                                }
                            }
                            _ => report.failed += 1,
                        }
                    }
                }
                _ => {}
            }
        }

        tx.commit().await?;
        self.send_notices(notices).await;
        Ok(())
    }

    /// Provision access for a reservation due to start and return the status it moves to.
    async fn provision(&self, conn: &mut PgConnection, reservation: &Reservation) -> ReservationStatus {
        let environment_id = reservation.environment_id.as_str();
        let Some(environment) = self.registry.get(environment_id) else {
            warn!(reservation_id = reservation.id, environment_id, "Environment no longer configured, cannot activate");
            return ReservationStatus::Error;
        };

        let material = if environment.requires_secret_material {
            match Users::new(conn).ssh_key(&reservation.username).await {
                Ok(Some(key)) => Some(key),
                Ok(None) => {
                    warn!(
                        reservation_id = reservation.id,
                        username = %reservation.username,
                        environment_id,
                        "No SSH key stored for user of a reservation that requires one, cannot activate"
                    );
                    return ReservationStatus::Error;
                }
                Err(e) => {
                    error!(reservation_id = reservation.id, error = %e, "Failed to look up SSH key, cannot activate");
                    return ReservationStatus::Error;
                }
            }
        } else {
            None
        };

        match self
            .broker
            .begin_environment_access(environment_id, material.as_deref(), reservation.end_at)
            .await
        {
            Ok(()) => {
                info!(
                    reservation_id = reservation.id,
                    username = %reservation.username,
                    environment_id,
                    "Reservation activated"
                );
                ReservationStatus::Active
            }
            Err(e) => {
                warn!(reservation_id = reservation.id, environment_id, error = %e, "Failed to provision environment access");
                ReservationStatus::Error
            }
        }
    }

    /// Write one status change under a savepoint. A failing write is logged and leaves the rest of
    /// the phase untouched; only failing to open the savepoint aborts the phase.
    async fn transition(&self, tx: &mut PgConnection, reservation: &Reservation, to: ReservationStatus) -> Result<bool, DbError> {
        let mut savepoint = tx.begin().await?;

        match Reservations::new(&mut savepoint).set_status(reservation.id, reservation.status, to).await {
            Ok(true) => {
                savepoint.commit().await?;
                debug!(reservation_id = reservation.id, from = %reservation.status, %to, "Status changed");
                Ok(true)
            }
            Ok(false) => {
                debug!(reservation_id = reservation.id, "Reservation changed concurrently, skipped");
                Ok(false)
            }
            Err(e) => {
                error!(reservation_id = reservation.id, %to, error = %e, "Failed to write status change");
                Ok(false)
            }
        }
    }

    async fn purge_phase(&self, now: Timestamp, report: &mut SweepReport) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        let mut reservations = Reservations::new(&mut tx);
        let purged: Vec<_> = reservations
            .lock_retired(now)
            .await?
            .into_iter()
            .filter(|reservation| due_transition(reservation, now) == Some(Transition::Purge))
            .map(|reservation| reservation.id)
            .collect();
        if !purged.is_empty() {
            reservations.delete_many(&purged).await?;
        }
        tx.commit().await?;

        if !purged.is_empty() {
            info!(count = purged.len(), ids = ?purged, "Purged retired reservations");
        }
        report.purged_reservations += purged.len();
        Ok(())
    }

    async fn user_retention_phase(&self, now: Timestamp, report: &mut SweepReport) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        let purged = Users::new(&mut tx).delete_retired(now).await?;
        tx.commit().await?;

        if purged > 0 {
            info!(count = purged, "Purged retired users");
        }
        report.purged_users += purged;
        Ok(())
    }

    async fn send_notices(&self, notices: Vec<(Reservation, NoticeKind)>) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if notices.is_empty() {
            return;
        }

        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, count = notices.len(), "Cannot look up contact addresses, notifications dropped");
                return;
            }
        };

        for (reservation, kind) in notices {
            let contact = match Users::new(&mut conn).email(&reservation.username).await {
                Ok(Some(contact)) => contact,
                Ok(None) => {
                    debug!(reservation_id = reservation.id, username = %reservation.username, "No contact address, notification skipped");
                    continue;
                }
                Err(e) => {
                    warn!(reservation_id = reservation.id, error = %e, "Failed to look up contact address");
                    continue;
                }
            };

            let environment_name = self.registry.display_name(&reservation.environment_id);
            let sent = match kind {
                NoticeKind::Start => notifier.notify_start(&contact, &reservation, &environment_name).await,
                NoticeKind::End => notifier.notify_end(&contact, &reservation, &environment_name).await,
            };
            if let Err(e) = sent {
                warn!(reservation_id = reservation.id, ?kind, error = %e, "Failed to send notification");
            }
        }
    }
}
