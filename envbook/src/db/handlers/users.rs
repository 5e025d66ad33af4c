//! Database repository for per-user booking attributes.
//!
//! A user row only exists while it holds an SSH public key or an e-mail address. Removing the
//! last attribute removes the row.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{errors::Result, models::users::UserRecord};
use crate::types::Timestamp;

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

/// SSH keys are stored on a single line.
fn single_line(key: &str) -> String {
    key.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get(&mut self, username: &str) -> Result<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(user)
    }

    /// The user's SSH public key, if one is stored and non-empty.
    #[instrument(skip(self), err)]
    pub async fn ssh_key(&mut self, username: &str) -> Result<Option<String>> {
        Ok(self.get(username).await?.and_then(|u| u.ssh_public_key).filter(|k| !k.is_empty()))
    }

    /// The user's contact address, if one is stored and non-empty.
    #[instrument(skip(self), err)]
    pub async fn email(&mut self, username: &str) -> Result<Option<String>> {
        Ok(self.get(username).await?.and_then(|u| u.email).filter(|e| !e.is_empty()))
    }

    #[instrument(skip(self, key), err)]
    pub async fn save_ssh_key(&mut self, username: &str, key: &str, retention_until: Timestamp) -> Result<UserRecord> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (username, ssh_public_key, retention_until)
            VALUES ($1, $2, $3)
            ON CONFLICT (username) DO UPDATE
            SET ssh_public_key = EXCLUDED.ssh_public_key,
                retention_until = EXCLUDED.retention_until
            RETURNING *
            "#,
        )
        .bind(username)
        .bind(single_line(key))
        .bind(retention_until)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(user)
    }

    #[instrument(skip(self, email), err)]
    pub async fn save_email(&mut self, username: &str, email: &str, retention_until: Timestamp) -> Result<UserRecord> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (username, email, retention_until)
            VALUES ($1, $2, $3)
            ON CONFLICT (username) DO UPDATE
            SET email = EXCLUDED.email,
                retention_until = EXCLUDED.retention_until
            RETURNING *
            "#,
        )
        .bind(username)
        .bind(email.trim())
        .bind(retention_until)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(user)
    }

    #[instrument(skip(self), err)]
    pub async fn remove_ssh_key(&mut self, username: &str) -> Result<()> {
        sqlx::query("UPDATE users SET ssh_public_key = NULL WHERE username = $1")
            .bind(username)
            .execute(&mut *self.db)
            .await?;
        self.delete_if_empty(username).await
    }

    #[instrument(skip(self), err)]
    pub async fn remove_email(&mut self, username: &str) -> Result<()> {
        sqlx::query("UPDATE users SET email = NULL WHERE username = $1")
            .bind(username)
            .execute(&mut *self.db)
            .await?;
        self.delete_if_empty(username).await
    }

    async fn delete_if_empty(&mut self, username: &str) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE username = $1 AND ssh_public_key IS NULL AND email IS NULL")
            .bind(username)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    /// Pushes the user's retention out. Users without a row are left alone.
    #[instrument(skip(self), err)]
    pub async fn refresh_retention(&mut self, username: &str, retention_until: Timestamp) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET retention_until = $2 WHERE username = $1")
            .bind(username)
            .bind(retention_until)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_retired(&mut self, now: Timestamp) -> Result<u64> {
        let result = sqlx::query("DELETE FROM users WHERE retention_until <= $1")
            .bind(now)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
