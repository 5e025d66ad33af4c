use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
};

use crate::{
    AppState,
    api::models::users::{CurrentUser, EmailUpdate, SshKeyResponse, SshKeyUpdate, UserResponse},
    db::handlers::Users,
    errors::{Error, Result},
    types::{Timestamp, add_months},
};

fn retention_until(state: &AppState) -> Timestamp {
    add_months(state.clock.now(), state.config.booking.database_ttl_months)
}

/// An OpenSSH public key line: key type, base64 blob, optional comment.
fn validate_ssh_key(key: &str) -> Result<()> {
    let mut parts = key.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(kind), Some(_)) if kind.starts_with("ssh-") || kind.starts_with("ecdsa-") || kind.starts_with("sk-") => Ok(()),
        _ => Err(Error::BadRequest {
            message: "SSH public key must be in OpenSSH format, e.g. 'ssh-ed25519 AAAA... user@host'".to_string(),
        }),
    }
}

/// The current user and their stored attributes.
#[tracing::instrument(skip_all)]
pub async fn get_current_user(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn).get(&current_user.username).await?;
    Ok(Json(user.map(UserResponse::from).unwrap_or_else(|| UserResponse::empty(current_user.username))))
}

#[tracing::instrument(skip_all)]
pub async fn get_ssh_key(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<SshKeyResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let ssh_public_key = Users::new(&mut conn).ssh_key(&current_user.username).await?;
    Ok(Json(SshKeyResponse { ssh_public_key }))
}

#[tracing::instrument(skip_all, fields(username = %current_user.username))]
pub async fn put_ssh_key(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(update): Json<SshKeyUpdate>,
) -> Result<Json<UserResponse>> {
    let key = update.ssh_public_key.trim();
    validate_ssh_key(key)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .save_ssh_key(&current_user.username, key, retention_until(&state))
        .await?;
    Ok(Json(UserResponse::from(user)))
}

/// Removing the key makes later activations on environments that need one fail.
#[tracing::instrument(skip_all, fields(username = %current_user.username))]
pub async fn delete_ssh_key(State(state): State<AppState>, current_user: CurrentUser) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Users::new(&mut conn).remove_ssh_key(&current_user.username).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip_all, fields(username = %current_user.username))]
pub async fn put_email(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(update): Json<EmailUpdate>,
) -> Result<Json<UserResponse>> {
    let email = update.email.trim();
    email.parse::<lettre::Address>().map_err(|e| Error::BadRequest {
        message: format!("Invalid email address: {e}"),
    })?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .save_email(&current_user.username, email, retention_until(&state))
        .await?;
    Ok(Json(UserResponse::from(user)))
}

#[tracing::instrument(skip_all, fields(username = %current_user.username))]
pub async fn delete_email(State(state): State<AppState>, current_user: CurrentUser) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Users::new(&mut conn).remove_email(&current_user.username).await?;
    Ok(StatusCode::NO_CONTENT)
}
