//! Test utilities for integration testing
use std::collections::{BTreeMap, HashSet};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{Duration, NaiveDate};
use serde_json::json;
use sqlx::PgPool;

use crate::broker::{BrokerError, Credentials, SecretsBroker};
use crate::clock::ManualClock;
use crate::config::{
    Config, DatabaseConfig, EmailConfig, EmailTransportConfig, EnvironmentConfig, PoolSettings, ScannerConfig, SecretsEngineConfig,
    SecretsEngineType,
};
use crate::db::{
    handlers::{Reservations, Users},
    models::reservations::{Reservation, ReservationCreateDBRequest},
};
use crate::environments::Registry;
use crate::errors::Error;
use crate::lifecycle::retention_until;
use crate::notifications::Notifier;
use crate::types::{ReservationId, Timestamp, add_months};

pub fn install_crypto_provider() {
    // Fails when another test already installed it
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Fixed reference time for tests, a Monday morning.
pub fn test_now() -> Timestamp {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap().and_hms_opt(10, 0, 0).unwrap()
}

pub fn minutes_from(ts: Timestamp, minutes: i64) -> Timestamp {
    ts + Duration::minutes(minutes)
}

/// `demo0` and `demo1` have no secrets engines, `lab` signs SSH keys and so needs one.
pub fn test_environments() -> BTreeMap<String, EnvironmentConfig> {
    let mut environments = BTreeMap::new();
    environments.insert(
        "demo0".to_string(),
        EnvironmentConfig {
            show_name: Some("Demo 0".to_string()),
            description: Some("First demo system".to_string()),
            ..Default::default()
        },
    );
    environments.insert("demo1".to_string(), EnvironmentConfig::default());
    environments.insert(
        "Lab".to_string(),
        EnvironmentConfig {
            show_name: Some("Lab".to_string()),
            description: None,
            secrets_engines: vec![SecretsEngineConfig {
                name: "jump".to_string(),
                engine_type: SecretsEngineType::Ssh,
                role: "operator".to_string(),
            }],
        },
    );
    environments
}

pub fn test_registry() -> Arc<Registry> {
    Arc::new(Registry::load(&test_environments()))
}

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("envbook-test-emails-{}", std::process::id()));

    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database: DatabaseConfig {
            url: "Something".to_string(), // the test pool is passed in directly
            pool: PoolSettings {
                max_connections: 4,
                min_connections: 1,
                ..Default::default()
            },
        },
        // Tests drive sweeps themselves
        scanner: ScannerConfig {
            enabled: false,
            ..Default::default()
        },
        environments: test_environments(),
        email: EmailConfig {
            transport: EmailTransportConfig::File {
                path: temp_dir.to_string_lossy().to_string(),
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub broker: Arc<RecordingBroker>,
    pub clock: ManualClock,
    pub background: crate::BackgroundServices,
}

pub async fn create_test_app(pool: PgPool) -> TestApp {
    create_test_app_with_config(pool, create_test_config()).await
}

pub async fn create_test_app_with_config(pool: PgPool, config: Config) -> TestApp {
    let broker = Arc::new(RecordingBroker::default());
    let clock = ManualClock::new(test_now());
    let registry = Arc::new(Registry::load(&config.environments));

    let app = crate::Application::with_services(config, pool, registry, broker.clone(), None, Arc::new(clock.clone()))
        .await
        .expect("Failed to create application");

    let (server, background) = app.into_test_server();
    TestApp {
        server,
        broker,
        clock,
        background,
    }
}

/// Header pair the trusted proxy would add for `username`.
pub fn auth_header(username: &str) -> (String, String) {
    ("x-remote-user".to_string(), username.to_string())
}

/// Insert a reservation directly, bypassing the booking checks.
pub async fn create_test_reservation(pool: &PgPool, username: &str, environment_id: &str, start: Timestamp, end: Timestamp) -> Reservation {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Reservations::new(&mut conn)
        .insert(&ReservationCreateDBRequest {
            username: username.to_string(),
            environment_id: environment_id.to_string(),
            start_at: start,
            end_at: end,
            subject: None,
            labels: None,
            notify_on_start: false,
            notify_on_end: false,
            retention_until: retention_until(end, 1),
        })
        .await
        .expect("Failed to create test reservation")
}

/// Store an SSH key for `username` and return it.
pub async fn save_ssh_key(pool: &PgPool, username: &str) -> String {
    let key = format!("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl {username}@workstation");
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .save_ssh_key(username, &key, add_months(test_now(), 1))
        .await
        .expect("Failed to save test SSH key");
    key
}

/// Store `<username>@example.com` as contact address and return it.
pub async fn save_email(pool: &PgPool, username: &str) -> String {
    let email = format!("{username}@example.com");
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .save_email(username, &email, add_months(test_now(), 1))
        .await
        .expect("Failed to save test email");
    email
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Begin {
        environment_id: String,
        secret_material: Option<String>,
        expiry: Timestamp,
    },
    End {
        environment_id: String,
    },
    Read {
        environment_id: String,
    },
}

/// Broker fake that records every call and fails on request.
#[derive(Default)]
pub struct RecordingBroker {
    calls: Mutex<Vec<BrokerCall>>,
    failing_begin: Mutex<HashSet<String>>,
    failing_end: Mutex<HashSet<String>>,
}

impl RecordingBroker {
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_begin_on(&self, environment_id: &str) {
        self.failing_begin.lock().unwrap().insert(environment_id.to_string());
    }

    pub fn fail_end_on(&self, environment_id: &str) {
        self.failing_end.lock().unwrap().insert(environment_id.to_string());
    }

    fn unavailable() -> BrokerError {
        BrokerError::Api {
            status: 503,
            errors: "Vault is sealed".to_string(),
        }
    }
}

#[async_trait]
impl SecretsBroker for RecordingBroker {
    async fn begin_environment_access(&self, environment_id: &str, secret_material: Option<&str>, expiry: Timestamp) -> Result<(), BrokerError> {
        self.calls.lock().unwrap().push(BrokerCall::Begin {
            environment_id: environment_id.to_string(),
            secret_material: secret_material.map(str::to_string),
            expiry,
        });
        if self.failing_begin.lock().unwrap().contains(environment_id) {
            return Err(Self::unavailable());
        }
        Ok(())
    }

    async fn end_environment_access(&self, environment_id: &str) -> Result<(), BrokerError> {
        self.calls.lock().unwrap().push(BrokerCall::End {
            environment_id: environment_id.to_string(),
        });
        if self.failing_end.lock().unwrap().contains(environment_id) {
            return Err(Self::unavailable());
        }
        Ok(())
    }

    async fn read_credentials(&self, environment_id: &str) -> Result<Credentials, BrokerError> {
        self.calls.lock().unwrap().push(BrokerCall::Read {
            environment_id: environment_id.to_string(),
        });
        let mut credentials = Credentials::new();
        credentials.insert(
            "admin".to_string(),
            json!({ "username": format!("{environment_id}-admin"), "password": "hunter2" }),
        );
        Ok(credentials)
    }
}

/// Notifier fake recording `(kind, contact, reservation id)` of every delivered notification.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(&'static str, String, ReservationId)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(&'static str, String, ReservationId)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::Relaxed);
    }

    fn record(&self, kind: &'static str, contact: &str, reservation: &Reservation) -> Result<(), Error> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::Internal {
                operation: "send SMTP email: connection refused".to_string(),
            });
        }
        self.sent.lock().unwrap().push((kind, contact.to_string(), reservation.id));
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_start(&self, contact: &str, reservation: &Reservation, _environment_name: &str) -> Result<(), Error> {
        self.record("start", contact, reservation)
    }

    async fn notify_end(&self, contact: &str, reservation: &Reservation, _environment_name: &str) -> Result<(), Error> {
        self.record("end", contact, reservation)
    }
}
