use thiserror::Error;

use crate::lifecycle::ReservationStatus;

/// Store failures that callers react to; everything else ends up in [`DbError::Other`].
#[derive(Error, Debug)]
pub enum DbError {
    /// A query that must return a row returned none
    #[error("Row not found")]
    NotFound,

    /// A row broke a `CHECK` constraint of the schema, e.g. a reservation ending before it starts
    #[error("Check constraint {} violated: {message}", constraint.as_deref().unwrap_or("<unnamed>"))]
    CheckViolation { constraint: Option<String>, message: String },

    /// A status write the lifecycle graph does not allow
    #[error("Illegal status transition from {from} to {to}")]
    IllegalTransition { from: ReservationStatus, to: ReservationStatus },

    /// Connection loss, failed transaction and anything else the caller can only log
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => DbError::CheckViolation {
                constraint: db_err.constraint().map(str::to_string),
                message: db_err.message().to_string(),
            },
            _ => DbError::Other(err.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
