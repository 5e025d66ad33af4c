use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use crate::{
    AppState,
    api::models::{reservations::ReservationResponse, users::CurrentUser},
    booking::{AbortOutcome, NewReservation},
    db::handlers::Reservations,
    errors::{Error, Result},
    types::ReservationId,
};

/// List the current user's reservations in start order.
#[tracing::instrument(skip_all)]
pub async fn list_reservations(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<ReservationResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let reservations = Reservations::new(&mut conn).list_for_user(&current_user.username).await?;
    Ok(Json(reservations.into_iter().map(ReservationResponse::from).collect()))
}

/// Book an environment for the current user.
///
/// Rejected bookings answer 400 with the reason, or 409 with the conflicting window.
#[tracing::instrument(skip_all, fields(username = %current_user.username))]
pub async fn create_reservation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<NewReservation>,
) -> Result<(StatusCode, Json<ReservationResponse>)> {
    let reservation = state.reservations.create_reservation(&current_user.username, request).await?;
    Ok((StatusCode::CREATED, Json(ReservationResponse::from(reservation))))
}

/// Abort one of the current user's upcoming reservations.
///
/// Aborting a reservation that does not exist (anymore) succeeds without doing anything.
#[tracing::instrument(skip(state, current_user), fields(username = %current_user.username))]
pub async fn abort_reservation(
    State(state): State<AppState>,
    Path(id): Path<ReservationId>,
    current_user: CurrentUser,
) -> Result<StatusCode> {
    match state.reservations.abort_reservation(&current_user.username, id).await? {
        AbortOutcome::Deleted | AbortOutcome::NotFound => Ok(StatusCode::NO_CONTENT),
    }
}
