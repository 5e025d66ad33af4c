//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `ENVBOOK_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `ENVBOOK_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `ENVBOOK_SCANNER__INTERVAL=1m` sets the `scanner.interval` field.
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port` - HTTP server binding configuration
//! - **Database**: `database.url`, `database.pool` - PostgreSQL connection settings
//! - **Booking rules**: `booking.*` - maximum duration, queuing horizon and record retention
//! - **Scanner**: `scanner.enabled`, `scanner.interval` - the reservation reconciliation loop
//! - **Environments**: `environments.<name>` - bookable environments and their Vault secrets engines
//! - **Vault**: `vault.*` - where and how to reach the secrets broker
//! - **Notifications**: `enable_notifications`, `email.*` - reservation start/end mails
//!
//! Environment definitions are read once at startup. Changing them requires a restart.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};
use url::Url;

use crate::environments::plain_identifier;
use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "ENVBOOK_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Overrides `database.url` when set (usually via `DATABASE_URL`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// PostgreSQL connection settings
    pub database: DatabaseConfig,
    /// Limits applied when validating new reservations
    pub booking: BookingConfig,
    /// Reservation scanner settings
    pub scanner: ScannerConfig,
    /// Leader election between replicas sharing one database
    pub leader_election: LeaderElectionConfig,
    /// Bookable environments, keyed by their free-form name
    pub environments: BTreeMap<String, EnvironmentConfig>,
    /// Vault connection used to provision and revoke environment credentials
    pub vault: VaultConfig,
    /// Send e-mails on reservation start/end when users ask for it
    pub enable_notifications: bool,
    /// Mail transport for notifications
    pub email: EmailConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Connection pool settings passed straight to sqlx.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection (seconds)
    pub acquire_timeout_secs: u64,
    /// Time before idle connections are closed (seconds, 0 = never)
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a connection (seconds, 0 = never)
    pub max_lifetime_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,  // 10 minutes
            max_lifetime_secs: 1800, // 30 minutes
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection string for the database
    pub url: String,
    pub pool: PoolSettings,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/envbook".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

/// Booking rules enforced on reservation creation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BookingConfig {
    /// Longest allowed reservation, in days
    pub max_reservation_duration_days: u32,
    /// How far ahead a reservation may start, in months
    pub max_queuing_time_months: u32,
    /// How long finished reservations and idle user records are kept, in months
    pub database_ttl_months: u32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            max_reservation_duration_days: 7,
            max_queuing_time_months: 2,
            database_ttl_months: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScannerConfig {
    /// Run the periodic scanner on this instance
    pub enabled: bool,
    /// Time between two sweeps
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Leader election configuration.
///
/// Leader election uses PostgreSQL advisory locks so that only one replica runs the scanner.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeaderElectionConfig {
    /// When false, this instance always runs the scanner (single-instance deployments and testing)
    pub enabled: bool,
}

/// One bookable environment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    /// Name shown to users; defaults to the normalized identifier
    pub show_name: Option<String>,
    /// Free-text description, may contain HTML for the presentation layer
    pub description: Option<String>,
    /// Vault secrets engines that make up access to this environment
    pub secrets_engines: Vec<SecretsEngineConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SecretsEngineConfig {
    /// Mount name of the engine below the environment's path
    pub name: String,
    #[serde(rename = "type")]
    pub engine_type: SecretsEngineType,
    /// Vault role used for credential requests
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretsEngineType {
    Ad,
    Ontap,
    Database,
    Ssh,
}

impl SecretsEngineType {
    /// Engines of this type need the booking user's SSH public key.
    pub fn requires_secret_material(self) -> bool {
        matches!(self, SecretsEngineType::Ssh)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Base URL of the Vault API, including the version prefix (e.g. `https://vault:8200/v1`)
    pub address: Url,
    /// AppRole role id used to obtain tokens for provisioning
    pub approle_role_id: String,
    /// AppRole secret id used to obtain tokens for provisioning
    pub approle_secret_id: String,
    /// Timeout applied to every Vault request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: Url::parse("http://127.0.0.1:8200/v1").expect("static URL is valid"),
            approle_role_id: String::new(),
            approle_secret_id: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Email configuration for reservation notifications.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
// Note: Cannot use deny_unknown_fields here due to #[serde(flatten)] on transport
pub struct EmailConfig {
    /// Email transport method
    #[serde(flatten)]
    pub transport: EmailTransportConfig,
    /// Sender email address
    pub from_email: String,
    /// Sender display name
    pub from_name: String,
}

/// Email transport configuration - either SMTP or file-based for testing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailTransportConfig {
    /// Send emails via SMTP server
    Smtp {
        /// SMTP server hostname
        host: String,
        /// SMTP server port
        port: u16,
        /// SMTP authentication username
        username: String,
        /// SMTP authentication password
        password: String,
        /// Use TLS encryption
        use_tls: bool,
    },
    /// Write emails to files (for development/testing)
    File {
        /// Directory path where email files will be written
        path: String,
    },
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportConfig::default(),
            from_email: "envbook@example.com".to_string(),
            from_name: "envbook".to_string(),
        }
    }
}

impl Default for EmailTransportConfig {
    fn default() -> Self {
        Self::File {
            path: "./emails".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub proxy_header: ProxyHeaderAuthConfig,
}

/// Trusted-header authentication.
///
/// Login (LDAP or otherwise) happens in an upstream proxy, which forwards the authenticated
/// username in `header_name`. Never expose the API without such a proxy in front of it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyHeaderAuthConfig {
    /// The name of the HTTP header containing the username
    pub header_name: String,
}

impl Default for ProxyHeaderAuthConfig {
    fn default() -> Self {
        Self {
            header_name: "x-remote-user".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_url: None,
            database: DatabaseConfig::default(),
            booking: BookingConfig::default(),
            scanner: ScannerConfig::default(),
            leader_election: LeaderElectionConfig::default(),
            environments: BTreeMap::new(),
            vault: VaultConfig::default(),
            enable_notifications: false,
            email: EmailConfig::default(),
            auth: AuthConfig::default(),
            enable_otel_export: false,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.scanner.interval.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: scanner.interval must be greater than zero".to_string(),
            });
        }

        if self.booking.max_reservation_duration_days == 0 {
            return Err(Error::Internal {
                operation: "Config validation: booking.max_reservation_duration_days must be at least 1".to_string(),
            });
        }

        if self.booking.max_queuing_time_months == 0 {
            return Err(Error::Internal {
                operation: "Config validation: booking.max_queuing_time_months must be at least 1".to_string(),
            });
        }

        if self.booking.database_ttl_months == 0 {
            return Err(Error::Internal {
                operation: "Config validation: booking.database_ttl_months must be at least 1".to_string(),
            });
        }

        // Identifiers are derived from the free-form names, so two names may collapse into one
        let mut seen: HashMap<String, &str> = HashMap::new();
        for (name, environment) in &self.environments {
            let id = plain_identifier(name);
            if id.is_empty() {
                return Err(Error::Internal {
                    operation: format!("Config validation: environment name '{name}' is empty"),
                });
            }
            if let Some(previous) = seen.insert(id.clone(), name) {
                return Err(Error::Internal {
                    operation: format!("Config validation: environments '{previous}' and '{name}' both map to identifier '{id}'"),
                });
            }

            for engine in &environment.secrets_engines {
                if engine.name.trim().is_empty() {
                    return Err(Error::Internal {
                        operation: format!("Config validation: environment '{name}' has a secrets engine without a name"),
                    });
                }
                if engine.role.trim().is_empty() {
                    return Err(Error::Internal {
                        operation: format!(
                            "Config validation: secrets engine '{}' of environment '{name}' has no role",
                            engine.name
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("ENVBOOK_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
