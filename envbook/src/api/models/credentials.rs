use serde::{Deserialize, Serialize};

use crate::broker::Credentials;
use crate::types::ReservationId;

/// Credentials of one environment the user currently holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub reservation_id: ReservationId,
    pub environment_id: String,
    /// Credentials stop working at this time
    pub valid_until: String,
    /// Keyed by secrets engine name
    pub credentials: Credentials,
}
