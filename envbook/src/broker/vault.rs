//! HashiCorp Vault backed [`SecretsBroker`].
//!
//! Every operation logs in with AppRole first and uses the resulting short-lived token for the
//! engine calls. Responses follow Vault's conventions: `200` carries a JSON body whose `data` field
//! is the payload, `204` has no body, anything else carries an `errors` list.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{BrokerError, Credentials, SecretsBroker, engines::SecretsEngine, engines::vault_url};
use crate::clock::Clock;
use crate::config::VaultConfig;
use crate::environments::Registry;
use crate::types::{EnvironmentId, Timestamp};

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
}

/// Thin HTTP client for the Vault API.
#[derive(Debug, Clone)]
pub struct VaultClient {
    http: Client,
    login_url: Url,
    role_id: String,
    secret_id: String,
}

impl VaultClient {
    pub fn new(config: &VaultConfig) -> Result<Self, BrokerError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            login_url: vault_url(&config.address, &["auth", "approle", "login"])?,
            role_id: config.approle_role_id.clone(),
            secret_id: config.approle_secret_id.clone(),
        })
    }

    /// Exchange the AppRole credentials for a client token.
    #[instrument(skip(self), err)]
    pub async fn login(&self) -> Result<String, BrokerError> {
        let response = self
            .http
            .post(self.login_url.clone())
            .json(&json!({ "role_id": self.role_id, "secret_id": self.secret_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::MalformedResponse(format!("login response: {e}")))?;
        Ok(login.auth.client_token)
    }

    async fn send(&self, method: Method, url: &Url, token: &str, body: Option<&Value>) -> Result<Option<Value>, BrokerError> {
        debug!(%method, %url, "Vault request");
        let mut request = self.http.request(method, url.clone()).header("X-Vault-Token", token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| BrokerError::MalformedResponse(format!("{url}: {e}")))?;
        Ok(body.get("data").filter(|data| !data.is_null()).cloned())
    }

    /// A request whose answer must carry a `data` object.
    pub async fn data_request(&self, method: Method, url: &Url, token: &str, body: Option<&Value>) -> Result<Value, BrokerError> {
        match self.send(method, url, token, body).await? {
            Some(data) if data.is_object() => Ok(data),
            Some(other) => Err(BrokerError::MalformedResponse(format!("{url}: expected an object in 'data', got {other}"))),
            None => Err(BrokerError::MalformedResponse(format!("{url}: response has no 'data'"))),
        }
    }

    /// A request whose answer carries nothing of interest.
    pub async fn empty_request(&self, method: Method, url: &Url, token: &str, body: Option<&Value>) -> Result<(), BrokerError> {
        self.send(method, url, token, body).await.map(|_| ())
    }
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> BrokerError {
    let errors = match response.json::<Value>().await {
        Ok(body) => body.get("errors").map(|e| e.to_string()).unwrap_or_else(|| body.to_string()),
        Err(_) => "no error details".to_string(),
    };
    BrokerError::Api {
        status: status.as_u16(),
        errors,
    }
}

pub struct VaultBroker {
    client: VaultClient,
    environments: HashMap<EnvironmentId, Vec<SecretsEngine>>,
    clock: Arc<dyn Clock>,
}

impl VaultBroker {
    pub fn new(config: &VaultConfig, registry: &Registry, clock: Arc<dyn Clock>) -> Result<Self, BrokerError> {
        let client = VaultClient::new(config)?;

        let mut environments = HashMap::new();
        for environment in registry.iter() {
            let engines = environment
                .secrets_engines
                .iter()
                .map(|engine| SecretsEngine::from_config(&config.address, &environment.id, engine))
                .collect::<Result<Vec<_>, _>>()?;
            debug!(environment_id = %environment.id, engines = engines.len(), "Registered secrets engines");
            environments.insert(environment.id.clone(), engines);
        }

        Ok(Self {
            client,
            environments,
            clock,
        })
    }

    fn engines(&self, environment_id: &str) -> Result<&[SecretsEngine], BrokerError> {
        self.environments
            .get(environment_id)
            .map(Vec::as_slice)
            .ok_or_else(|| BrokerError::UnknownEnvironment(environment_id.to_string()))
    }

    /// Limit lease durations of every `database` engine. Failures are logged and skipped.
    pub async fn tune_lease_mounts(&self, max_booking_days: u32) {
        let leases: Vec<_> = self
            .environments
            .iter()
            .flat_map(|(id, engines)| engines.iter().map(move |engine| (id, engine)))
            .filter(|(_, engine)| matches!(engine, SecretsEngine::Lease { .. }))
            .collect();
        if leases.is_empty() {
            return;
        }

        let token = match self.client.login().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Could not log in to Vault to tune lease durations");
                return;
            }
        };

        for (environment_id, engine) in leases {
            if let Err(e) = engine.tune(&self.client, &token, max_booking_days).await {
                warn!(%environment_id, engine = engine.name(), error = %e, "Failed to tune lease duration");
            }
        }
    }
}

#[async_trait]
impl SecretsBroker for VaultBroker {
    #[instrument(skip(self, secret_material), err)]
    async fn begin_environment_access(
        &self,
        environment_id: &str,
        secret_material: Option<&str>,
        expiry: Timestamp,
    ) -> Result<(), BrokerError> {
        let engines = self.engines(environment_id)?;
        if secret_material.is_none() && engines.iter().any(SecretsEngine::requires_secret_material) {
            return Err(BrokerError::MissingSecretMaterial(environment_id.to_string()));
        }
        if engines.is_empty() {
            return Ok(());
        }

        let ttl_secs = (expiry - self.clock.now()).num_seconds().max(1);
        let token = self.client.login().await?;

        for (begun, engine) in engines.iter().enumerate() {
            if let Err(e) = engine.begin(&self.client, &token, secret_material, ttl_secs).await {
                // Leave nothing half-provisioned behind
                for done in &engines[..begun] {
                    if let Err(cleanup) = done.end(&self.client, &token).await {
                        warn!(environment_id, engine = done.name(), error = %cleanup, "Cleanup after failed provisioning failed");
                    }
                }
                return Err(e);
            }
        }

        info!(environment_id, ttl_secs, "Environment access provisioned");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn end_environment_access(&self, environment_id: &str) -> Result<(), BrokerError> {
        let engines = self.engines(environment_id)?;
        if engines.is_empty() {
            return Ok(());
        }

        let token = self.client.login().await?;

        let mut first_error = None;
        for engine in engines {
            if let Err(e) = engine.end(&self.client, &token).await {
                warn!(environment_id, engine = engine.name(), error = %e, "Failed to end access for secrets engine");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(environment_id, "Environment access revoked");
                Ok(())
            }
        }
    }

    #[instrument(skip(self), err)]
    async fn read_credentials(&self, environment_id: &str) -> Result<Credentials, BrokerError> {
        let engines = self.engines(environment_id)?;
        let mut credentials = Credentials::new();
        if engines.is_empty() {
            return Ok(credentials);
        }

        let token = self.client.login().await?;
        for engine in engines {
            credentials.insert(engine.name().to_string(), engine.read(&self.client, &token).await?);
        }
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{EnvironmentConfig, SecretsEngineConfig, SecretsEngineType};
    use crate::test::utils::install_crypto_provider;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine(name: &str, engine_type: SecretsEngineType) -> SecretsEngineConfig {
        SecretsEngineConfig {
            name: name.to_string(),
            engine_type,
            role: "operator".to_string(),
        }
    }

    async fn setup() -> (MockServer, VaultBroker, ManualClock) {
        install_crypto_provider();
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .and(body_json(json!({ "role_id": "role", "secret_id": "secret" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "auth": { "client_token": "s.token" } })))
            .mount(&server)
            .await;

        let mut environments = BTreeMap::new();
        environments.insert(
            "Lab".to_string(),
            EnvironmentConfig {
                secrets_engines: vec![engine("admin", SecretsEngineType::Ad), engine("jump", SecretsEngineType::Ssh)],
                ..Default::default()
            },
        );
        environments.insert(
            "Db".to_string(),
            EnvironmentConfig {
                secrets_engines: vec![engine("pg", SecretsEngineType::Database)],
                ..Default::default()
            },
        );
        environments.insert("Bare".to_string(), EnvironmentConfig::default());
        let registry = Registry::load(&environments);

        let config = VaultConfig {
            address: Url::parse(&format!("{}/v1", server.uri())).unwrap(),
            approle_role_id: "role".to_string(),
            approle_secret_id: "secret".to_string(),
            ..Default::default()
        };
        let clock = ManualClock::starting_now();
        let broker = VaultBroker::new(&config, &registry, Arc::new(clock.clone())).unwrap();
        (server, broker, clock)
    }

    #[tokio::test]
    async fn test_begin_provisions_every_engine() {
        let (server, broker, clock) = setup().await;

        Mock::given(method("GET"))
            .and(path("/v1/operate/lab/admin/creds/operator"))
            .and(header("X-Vault-Token", "s.token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "username": "admin", "password": "hunter2" } })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/store/lab/admin/operator/data"))
            .and(body_json(json!({ "username": "admin", "password": "hunter2" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/operate/lab/jump/sign/operator"))
            .and(body_json(json!({ "public_key": "ssh-ed25519 AAAA", "ttl": "7200s" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "signed_key": "ssh-ed25519-cert AAAA\n" } })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/store/lab/jump/operator/signature"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        broker
            .begin_environment_access("lab", Some("ssh-ed25519 AAAA"), clock.now() + Duration::hours(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_begin_without_material_makes_no_calls() {
        let (server, broker, clock) = setup().await;

        let result = broker.begin_environment_access("lab", None, clock.now() + Duration::hours(1)).await;

        assert!(matches!(result, Err(BrokerError::MissingSecretMaterial(_))));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_begin_failure_cleans_up_begun_engines() {
        let (server, broker, clock) = setup().await;

        Mock::given(method("GET"))
            .and(path("/v1/operate/lab/admin/creds/operator"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "password": "p" } })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/store/lab/admin/operator/data"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/operate/lab/jump/sign/operator"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "errors": ["invalid public key"] })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/store/lab/admin/operator/data"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let result = broker
            .begin_environment_access("lab", Some("garbage"), clock.now() + Duration::hours(1))
            .await;

        match result {
            Err(BrokerError::Api { status, errors }) => {
                assert_eq!(status, 400);
                assert!(errors.contains("invalid public key"));
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_end_continues_after_failing_engine() {
        let (server, broker, _clock) = setup().await;

        Mock::given(method("DELETE"))
            .and(path("/v1/store/lab/admin/operator/data"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "errors": ["sealed"] })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/store/lab/jump/operator/signature"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let result = broker.end_environment_access("lab").await;
        assert!(matches!(result, Err(BrokerError::Api { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_end_revokes_leases() {
        let (server, broker, _clock) = setup().await;

        Mock::given(method("DELETE"))
            .and(path("/v1/store/db/pg/operator/data"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/sys/leases/revoke-prefix/operate/db/pg/creds/operator"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        broker.end_environment_access("db").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_credentials_keyed_by_engine() {
        let (server, broker, _clock) = setup().await;

        Mock::given(method("GET"))
            .and(path("/v1/store/lab/admin/operator/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "password": "p" } })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/store/lab/jump/operator/signature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "signed_key": "cert" } })))
            .mount(&server)
            .await;

        let credentials = broker.read_credentials("lab").await.unwrap();

        assert_eq!(credentials["admin"], json!({ "password": "p" }));
        assert_eq!(credentials["jump"], json!({ "signed_key": "cert" }));
    }

    #[tokio::test]
    async fn test_unknown_and_engineless_environments() {
        let (server, broker, clock) = setup().await;

        assert!(matches!(
            broker.end_environment_access("nowhere").await,
            Err(BrokerError::UnknownEnvironment(_))
        ));
        broker
            .begin_environment_access("bare", None, clock.now() + Duration::hours(1))
            .await
            .unwrap();
        assert!(broker.read_credentials("bare").await.unwrap().is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tune_lease_mounts() {
        let (server, broker, _clock) = setup().await;

        Mock::given(method("POST"))
            .and(path("/v1/sys/mounts/operate/db/pg/tune"))
            .and(body_json(json!({ "default_lease_ttl": "168h", "max_lease_ttl": "168h" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        broker.tune_lease_mounts(7).await;
    }

    #[tokio::test]
    async fn test_login_failure_surfaces() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "errors": ["permission denied"] })))
            .mount(&server)
            .await;

        let config = VaultConfig {
            address: Url::parse(&format!("{}/v1", server.uri())).unwrap(),
            ..Default::default()
        };
        let client = VaultClient::new(&config).unwrap();

        assert!(matches!(client.login().await, Err(BrokerError::Api { status: 403, .. })));
    }
}
