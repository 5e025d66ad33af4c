use crate::{
    AppState,
    api::models::users::CurrentUser,
    db::handlers::Users,
    errors::{Error, Result},
    types::add_months,
};
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{instrument, trace};

/// Extract the username from the trusted proxy header
/// Returns:
/// - None: header missing or blank
/// - Some(Ok(username)): header present
/// - Some(Err(error)): header present but not valid UTF-8
fn try_proxy_header_auth(parts: &Parts, header_name: &str) -> Option<Result<String>> {
    let value = parts.headers.get(header_name)?;

    let username = match value.to_str() {
        Ok(s) => s.trim(),
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid {header_name} header: {e}"),
            }));
        }
    };

    if username.is_empty() {
        return None;
    }
    Some(Ok(username.to_string()))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    /// Every authenticated request keeps the user's stored attributes alive for another
    /// retention period.
    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let username = match try_proxy_header_auth(parts, &state.config.auth.proxy_header.header_name) {
            Some(result) => result?,
            None => {
                trace!("No proxy header present");
                return Err(Error::Unauthenticated { message: None });
            }
        };

        let retention_until = add_months(state.clock.now(), state.config.booking.database_ttl_months);
        let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        if Users::new(&mut conn).refresh_retention(&username, retention_until).await? {
            trace!(username, "Refreshed user retention");
        }

        Ok(CurrentUser { username })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::handlers::Users;
    use crate::test::utils::{auth_header, create_test_app, save_email, test_now};
    use crate::types::add_months;
    use axum::http::StatusCode;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_missing_header_is_rejected(pool: PgPool) {
        let app = create_test_app(pool).await;

        app.server.get("/api/v1/reservations").await.assert_status(StatusCode::UNAUTHORIZED);
        app.server
            .get("/api/v1/reservations")
            .add_header("x-remote-user", "   ")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_request_refreshes_retention(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        save_email(&pool, "alice").await;

        app.clock.advance(chrono::Duration::days(20));
        let (name, value) = auth_header("alice");
        app.server.get("/api/v1/reservations").add_header(name, value).await.assert_status_ok();

        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn).get("alice").await.unwrap().unwrap();
        assert_eq!(user.retention_until, add_months(test_now() + chrono::Duration::days(20), 1));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_request_does_not_create_users(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;

        let (name, value) = auth_header("bob");
        app.server.get("/api/v1/reservations").add_header(name, value).await.assert_status_ok();

        let mut conn = pool.acquire().await.unwrap();
        assert!(Users::new(&mut conn).get("bob").await.unwrap().is_none());
    }
}
