//! Secrets broker integration.
//!
//! The lifecycle engine never mints or revokes credentials itself. It calls a [`SecretsBroker`]
//! when a reservation starts or ends, and the API reads the provisioned credentials back through
//! the same trait. [`vault::VaultBroker`] is the production implementation, talking to HashiCorp
//! Vault; tests substitute a recording fake.
//!
//! Brokers do not retry. Failures are returned to the caller, which decides whether they are fatal
//! for the reservation (activation) or only worth an error log (deactivation).

pub mod engines;
pub mod vault;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::Timestamp;

pub use vault::VaultBroker;

/// Credentials of one environment, keyed by secrets engine name.
pub type Credentials = Map<String, Value>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("request to secrets broker failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("secrets broker answered {status}: {errors}")]
    Api { status: u16, errors: String },

    #[error("malformed response from secrets broker: {0}")]
    MalformedResponse(String),

    #[error("cannot build secrets broker URL from '{0}'")]
    InvalidAddress(String),

    #[error("environment '{0}' is not known to the secrets broker")]
    UnknownEnvironment(String),

    #[error("environment '{0}' requires secret material but none was supplied")]
    MissingSecretMaterial(String),
}

#[async_trait]
pub trait SecretsBroker: Send + Sync {
    /// Provision access to `environment_id` until `expiry`.
    async fn begin_environment_access(
        &self,
        environment_id: &str,
        secret_material: Option<&str>,
        expiry: Timestamp,
    ) -> Result<(), BrokerError>;

    /// Revoke access to `environment_id`.
    async fn end_environment_access(&self, environment_id: &str) -> Result<(), BrokerError>;

    async fn read_credentials(&self, environment_id: &str) -> Result<Credentials, BrokerError>;
}
