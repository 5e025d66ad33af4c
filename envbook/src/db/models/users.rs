use sqlx::FromRow;

use crate::types::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserRecord {
    pub username: String,
    pub ssh_public_key: Option<String>,
    pub email: Option<String>,
    pub retention_until: Timestamp,
}
