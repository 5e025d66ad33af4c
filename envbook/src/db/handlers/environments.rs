//! Database snapshot of the environment registry.
//!
//! The table is not part of the migrations. It is dropped and recreated from configuration at every
//! start so that it always mirrors the running registry.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{errors::Result, models::environments::EnvironmentRow};
use crate::environments::Registry;

pub struct Environments<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Environments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Replace the table contents with `registry`. Run inside a transaction; replicas starting at
    /// the same time take turns on a transaction-scoped advisory lock.
    #[instrument(skip(self, registry), fields(count = registry.len()), err)]
    pub async fn rebuild(&mut self, registry: &Registry) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended('environments', 0))")
            .execute(&mut *self.db)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS environments").execute(&mut *self.db).await?;
        sqlx::query(
            r#"
            CREATE TABLE environments (
                environment_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                requires_secret_material BOOLEAN NOT NULL,
                description TEXT
            )
            "#,
        )
        .execute(&mut *self.db)
        .await?;

        for environment in registry.iter() {
            sqlx::query(
                r#"
                INSERT INTO environments (environment_id, display_name, requires_secret_material, description)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&environment.id)
            .bind(&environment.display_name)
            .bind(environment.requires_secret_material)
            .bind(&environment.description)
            .execute(&mut *self.db)
            .await?;
        }

        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<EnvironmentRow>> {
        let rows = sqlx::query_as::<_, EnvironmentRow>("SELECT * FROM environments ORDER BY display_name, environment_id")
            .fetch_all(&mut *self.db)
            .await?;
        Ok(rows)
    }
}
