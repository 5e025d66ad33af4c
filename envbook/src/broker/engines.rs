//! Provisioning strategies for Vault secrets engines.
//!
//! Every engine of an environment is mounted below `operate/<environment>/<name>` in Vault and has a
//! companion KV store below `store/<environment>/<name>`, where the credentials of the running
//! booking are kept for the user to read.

use reqwest::Method;
use serde_json::{Value, json};
use url::Url;

use super::BrokerError;
use super::vault::VaultClient;
use crate::config::{SecretsEngineConfig, SecretsEngineType};

const OPERATE: &str = "operate";
const STORE: &str = "store";

/// Append `segments` to the path of `base`.
pub fn vault_url(base: &Url, segments: &[&str]) -> Result<Url, BrokerError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| BrokerError::InvalidAddress(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretsEngine {
    /// `ad` and `ontap`: every read of `creds/<role>` rotates the password.
    ChangePassword { name: String, creds_url: Url, store_url: Url },
    /// `database`: credentials are leases, revoked explicitly at the end.
    Lease {
        name: String,
        creds_url: Url,
        revoke_url: Url,
        tune_url: Url,
        store_url: Url,
    },
    /// `ssh`: the user's public key is signed for the length of the booking.
    SignedKey { name: String, sign_url: Url, store_url: Url },
}

impl SecretsEngine {
    pub fn from_config(base: &Url, environment_id: &str, config: &SecretsEngineConfig) -> Result<Self, BrokerError> {
        let name = config.name.as_str();
        let role = config.role.as_str();

        let engine = match config.engine_type {
            SecretsEngineType::Ad | SecretsEngineType::Ontap => SecretsEngine::ChangePassword {
                name: name.to_string(),
                creds_url: vault_url(base, &[OPERATE, environment_id, name, "creds", role])?,
                store_url: vault_url(base, &[STORE, environment_id, name, role, "data"])?,
            },
            SecretsEngineType::Database => SecretsEngine::Lease {
                name: name.to_string(),
                creds_url: vault_url(base, &[OPERATE, environment_id, name, "creds", role])?,
                revoke_url: vault_url(
                    base,
                    &["sys", "leases", "revoke-prefix", OPERATE, environment_id, name, "creds", role],
                )?,
                tune_url: vault_url(base, &["sys", "mounts", OPERATE, environment_id, name, "tune"])?,
                store_url: vault_url(base, &[STORE, environment_id, name, role, "data"])?,
            },
            SecretsEngineType::Ssh => SecretsEngine::SignedKey {
                name: name.to_string(),
                sign_url: vault_url(base, &[OPERATE, environment_id, name, "sign", role])?,
                store_url: vault_url(base, &[STORE, environment_id, name, role, "signature"])?,
            },
        };
        Ok(engine)
    }

    pub fn name(&self) -> &str {
        match self {
            SecretsEngine::ChangePassword { name, .. } | SecretsEngine::Lease { name, .. } | SecretsEngine::SignedKey { name, .. } => name,
        }
    }

    fn store_url(&self) -> &Url {
        match self {
            SecretsEngine::ChangePassword { store_url, .. }
            | SecretsEngine::Lease { store_url, .. }
            | SecretsEngine::SignedKey { store_url, .. } => store_url,
        }
    }

    pub fn requires_secret_material(&self) -> bool {
        matches!(self, SecretsEngine::SignedKey { .. })
    }

    /// Obtain fresh credentials and put them where the user can read them.
    pub async fn begin(&self, client: &VaultClient, token: &str, secret_material: Option<&str>, ttl_secs: i64) -> Result<(), BrokerError> {
        let credentials = match self {
            SecretsEngine::ChangePassword { creds_url, .. } | SecretsEngine::Lease { creds_url, .. } => {
                client.data_request(Method::GET, creds_url, token, None).await?
            }
            SecretsEngine::SignedKey { sign_url, .. } => {
                let public_key = secret_material.ok_or_else(|| BrokerError::MissingSecretMaterial(self.name().to_string()))?;
                let payload = json!({ "public_key": public_key, "ttl": format!("{ttl_secs}s") });
                client.data_request(Method::POST, sign_url, token, Some(&payload)).await?
            }
        };

        client.empty_request(Method::POST, self.store_url(), token, Some(&credentials)).await
    }

    /// Remove the stored credentials and invalidate them where the engine allows it.
    pub async fn end(&self, client: &VaultClient, token: &str) -> Result<(), BrokerError> {
        client.empty_request(Method::DELETE, self.store_url(), token, None).await?;

        match self {
            // Rotating once more makes the handed-out password useless
            SecretsEngine::ChangePassword { creds_url, .. } => {
                client.data_request(Method::GET, creds_url, token, None).await?;
            }
            SecretsEngine::Lease { revoke_url, .. } => {
                client.empty_request(Method::POST, revoke_url, token, None).await?;
            }
            // The signature expires on its own
            SecretsEngine::SignedKey { .. } => {}
        }
        Ok(())
    }

    pub async fn read(&self, client: &VaultClient, token: &str) -> Result<Value, BrokerError> {
        client.data_request(Method::GET, self.store_url(), token, None).await
    }

    /// Cap lease lifetimes of `database` mounts to the longest possible booking. No-op for other engines.
    pub async fn tune(&self, client: &VaultClient, token: &str, max_booking_days: u32) -> Result<(), BrokerError> {
        if let SecretsEngine::Lease { tune_url, .. } = self {
            let hours = format!("{}h", u64::from(max_booking_days) * 24);
            let payload = json!({ "default_lease_ttl": hours, "max_lease_ttl": hours });
            client.empty_request(Method::POST, tune_url, token, Some(&payload)).await?;
        }
        Ok(())
    }
}
