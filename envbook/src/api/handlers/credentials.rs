use axum::{extract::State, response::Json};

use crate::{
    AppState,
    api::models::{credentials::CredentialsResponse, users::CurrentUser},
    db::handlers::Reservations,
    errors::{Error, Result},
    types::display,
};

/// Credentials for every environment the current user holds right now.
///
/// Only active reservations are considered; an upcoming booking has nothing provisioned yet.
#[tracing::instrument(skip_all, fields(username = %current_user.username))]
pub async fn list_credentials(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<CredentialsResponse>>> {
    let active = {
        let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        Reservations::new(&mut conn).list_active_for_user(&current_user.username).await?
    };

    let mut response = Vec::with_capacity(active.len());
    for reservation in active {
        let credentials = state.broker.read_credentials(&reservation.environment_id).await?;
        response.push(CredentialsResponse {
            reservation_id: reservation.id,
            valid_until: display(reservation.end_at),
            environment_id: reservation.environment_id,
            credentials,
        });
    }

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ReservationStatus;
    use crate::test::utils::{BrokerCall, auth_header, create_test_app, create_test_reservation, minutes_from, test_now};
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_credentials_of_active_reservations_only(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let now = test_now();
        let active = create_test_reservation(&pool, "alice", "demo1", minutes_from(now, -10), minutes_from(now, 50)).await;
        create_test_reservation(&pool, "alice", "demo0", minutes_from(now, 100), minutes_from(now, 150)).await;
        let mut conn = pool.acquire().await.unwrap();
        Reservations::new(&mut conn)
            .set_status(active.id, ReservationStatus::Upcoming, ReservationStatus::Active)
            .await
            .unwrap();

        let (name, value) = auth_header("alice");
        let response = app.server.get("/api/v1/credentials").add_header(name, value).await;

        response.assert_status_ok();
        let credentials: Vec<CredentialsResponse> = response.json();
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials[0].reservation_id, active.id);
        assert_eq!(credentials[0].environment_id, "demo1");
        assert_eq!(credentials[0].valid_until, "2030-01-07 10:50");
        assert_eq!(credentials[0].credentials["admin"]["username"], "demo1-admin");
        assert_eq!(
            app.broker.calls(),
            vec![BrokerCall::Read {
                environment_id: "demo1".to_string()
            }]
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_no_credentials_without_reservation(pool: PgPool) {
        let app = create_test_app(pool).await;
        let (name, value) = auth_header("alice");

        let credentials: Vec<CredentialsResponse> = app.server.get("/api/v1/credentials").add_header(name, value).await.json();

        assert!(credentials.is_empty());
        assert!(app.broker.calls().is_empty());
    }
}
