use serde::{Deserialize, Serialize};

use crate::db::models::users::UserRecord;
use crate::types::display;

/// The user a request was made for, as vouched for by the upstream proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentUser {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub username: String,
    pub ssh_public_key: Option<String>,
    pub email: Option<String>,
    /// When stored attributes are forgotten unless the user shows up again; absent when nothing
    /// is stored
    pub retention_until: Option<String>,
}

impl UserResponse {
    /// A user without any stored attributes.
    pub fn empty(username: String) -> Self {
        Self {
            username,
            ssh_public_key: None,
            email: None,
            retention_until: None,
        }
    }
}

impl From<UserRecord> for UserResponse {
    fn from(record: UserRecord) -> Self {
        Self {
            username: record.username,
            ssh_public_key: record.ssh_public_key,
            email: record.email,
            retention_until: Some(display(record.retention_until)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyResponse {
    pub ssh_public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyUpdate {
    pub ssh_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailUpdate {
    pub email: String,
}
