use axum::{
    extract::{Path, State},
    response::Json,
};

use crate::{
    AppState,
    api::models::{environments::EnvironmentResponse, reservations::ReservationResponse, users::CurrentUser},
    db::handlers::{Environments, Reservations},
    errors::{Error, Result},
};

/// List all bookable environments.
#[tracing::instrument(skip_all)]
pub async fn list_environments(State(state): State<AppState>, _user: CurrentUser) -> Result<Json<Vec<EnvironmentResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let rows = Environments::new(&mut conn).list().await?;
    Ok(Json(rows.into_iter().map(EnvironmentResponse::from).collect()))
}

/// All reservations on one environment, in start order. This is the environment's calendar, so
/// reservations of other users are included.
#[tracing::instrument(skip(state, _user))]
pub async fn list_environment_reservations(
    State(state): State<AppState>,
    Path(environment_id): Path<String>,
    _user: CurrentUser,
) -> Result<Json<Vec<ReservationResponse>>> {
    if !state.registry.exists(&environment_id) {
        return Err(Error::NotFound {
            resource: "Environment".to_string(),
            id: environment_id,
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let reservations = Reservations::new(&mut conn).list_for_environment(&environment_id).await?;
    Ok(Json(reservations.into_iter().map(ReservationResponse::from).collect()))
}
