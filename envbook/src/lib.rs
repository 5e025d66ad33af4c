//! # envbook: reservation broker for shared environments
//!
//! `envbook` lets users book exclusive, time-boxed access to shared test and demo environments.
//! While a reservation is active the booking user holds credentials for the environment, minted
//! by HashiCorp Vault when the reservation starts and revoked again when it ends.
//!
//! ## Overview
//!
//! A reservation names an environment, a start and an end. Creating one runs a fixed sequence of
//! checks ([`booking`]): the window must lie in the future, respect the configured maximum length
//! and queuing horizon, the environment must exist, any SSH key or contact address the booking
//! needs must be on file, and the window must not overlap any other reservation on the same
//! environment. Accepted reservations start out `upcoming`.
//!
//! From there only the reservation [`scanner`] moves them. On every sweep it expires active
//! reservations whose end has come (revoking access through the [`broker`]), activates upcoming
//! ones whose start has come (provisioning access), and purges finished reservations and idle
//! user records once their retention has passed. The allowed status changes are encoded in
//! [`lifecycle`].
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer and
//! uses PostgreSQL for all persistence. PostgreSQL is also the only coordination point between
//! request handlers, the scanner and multiple replicas: creation serializes per environment on an
//! advisory lock, the scanner row-locks what it transitions, and an optional leader election
//! keeps a single replica sweeping.
//!
//! ### Core Components
//!
//! - **API layer** ([`api`]): thin JSON API for a presentation layer, authenticated through a
//!   trusted proxy header ([`auth`])
//! - **Booking** ([`booking`]): reservation creation and abort
//! - **Scanner** ([`scanner`]): the reconciliation loop
//! - **Secrets broker** ([`broker`]): Vault-backed provisioning and revocation
//! - **Environment registry** ([`environments`]): bookable environments from configuration
//! - **Database layer** ([`db`]): repositories over `sqlx`
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use envbook::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = envbook::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     envbook::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod booking;
pub mod broker;
pub mod clock;
pub mod config;
pub mod db;
pub mod email;
pub mod environments;
pub mod errors;
mod leader_election;
pub mod lifecycle;
pub mod notifications;
pub mod scanner;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test;

use std::sync::{Arc, atomic::AtomicBool};
use std::time::Duration;

use axum::{
    Router,
    routing::{delete, get},
};
use bon::Builder;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::booking::ReservationService;
use crate::broker::{SecretsBroker, VaultBroker};
use crate::clock::{Clock, SystemClock};
use crate::db::handlers::Environments;
use crate::email::EmailService;
use crate::environments::Registry;
use crate::notifications::{EmailNotifier, Notifier};
use crate::scanner::ReservationScanner;
pub use config::Config;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .registry(registry)
///     .reservations(service)
///     .broker(broker)
///     .clock(clock)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub registry: Arc<Registry>,
    pub reservations: ReservationService,
    pub broker: Arc<dyn SecretsBroker>,
    pub clock: Arc<dyn Clock>,
}

/// Get the envbook database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

#[instrument(skip_all)]
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let settings = &config.database.pool;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout((settings.idle_timeout_secs > 0).then(|| Duration::from_secs(settings.idle_timeout_secs)))
        .max_lifetime((settings.max_lifetime_secs > 0).then(|| Duration::from_secs(settings.max_lifetime_secs)))
        .connect(&config.database.url)
        .await?;

    migrator().run(&pool).await?;
    Ok(pool)
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/environments", get(api::handlers::environments::list_environments))
        .route(
            "/environments/{id}/reservations",
            get(api::handlers::environments::list_environment_reservations),
        )
        .route(
            "/reservations",
            get(api::handlers::reservations::list_reservations).post(api::handlers::reservations::create_reservation),
        )
        .route("/reservations/{id}", delete(api::handlers::reservations::abort_reservation))
        .route("/credentials", get(api::handlers::credentials::list_credentials))
        .route("/users/current", get(api::handlers::users::get_current_user))
        .route(
            "/users/current/ssh-key",
            get(api::handlers::users::get_ssh_key)
                .put(api::handlers::users::put_ssh_key)
                .delete(api::handlers::users::delete_ssh_key),
        )
        .route(
            "/users/current/email",
            axum::routing::put(api::handlers::users::put_email).delete(api::handlers::users::delete_email),
        )
        .with_state(state);

    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
}

/// Background tasks running alongside the HTTP server: the reservation scanner, either directly
/// or behind leader election.
///
/// When dropped, the `drop_guard` cancels the shutdown token, signaling all tasks to stop.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(pool: PgPool, config: &Config, scanner: ReservationScanner, shutdown_token: CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();
    let interval = config.scanner.interval;

    if !config.scanner.enabled {
        info!("Reservation scanner disabled on this instance");
    } else if !config.leader_election.enabled {
        info!("Launching without leader election: running the reservation scanner");
        background_tasks.push(tokio::spawn(scanner.run(interval, shutdown_token.clone())));
    } else {
        info!("Starting leader election - will attempt to acquire leadership");

        // Token of the current leadership session, cancelled when leadership is lost
        let session: Arc<tokio::sync::Mutex<Option<CancellationToken>>> = Arc::new(tokio::sync::Mutex::new(None));
        let session_gain = session.clone();
        let session_lose = session.clone();
        let parent = shutdown_token.clone();

        let handle = tokio::spawn(leader_election::leader_election_task(
            pool,
            Arc::new(AtomicBool::new(false)),
            leader_election::SCANNER_LOCK_ID,
            leader_election::LEADER_RENEW_INTERVAL,
            shutdown_token.clone(),
            move || {
                let scanner = scanner.clone();
                let session = session_gain.clone();
                let token = parent.child_token();
                async move {
                    *session.lock().await = Some(token.clone());
                    tokio::spawn(scanner.run(interval, token));
                    info!("Reservation scanner started on elected leader");
                    Ok(())
                }
            },
            move || {
                let session = session_lose.clone();
                async move {
                    if let Some(token) = session.lock().await.take() {
                        token.cancel();
                        info!("Reservation scanner stopped (lost leadership)");
                    }
                    Ok(())
                }
            },
        ));
        background_tasks.push(handle);
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects to the database, runs migrations, rebuilds the
///    environments table from configuration and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, gracefully stops all services
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        info!(
            environments = config.environments.len(),
            scanner = config.scanner.enabled,
            notifications = config.enable_notifications,
            "Starting envbook"
        );

        let pool = setup_database(&config).await?;
        let registry = Arc::new(Registry::load(&config.environments));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let vault = VaultBroker::new(&config.vault, &registry, clock.clone())?;
        vault.tune_lease_mounts(config.booking.max_reservation_duration_days).await;

        let notifier: Option<Arc<dyn Notifier>> = if config.enable_notifications {
            Some(Arc::new(EmailNotifier::new(EmailService::new(&config.email)?)))
        } else {
            None
        };

        Self::with_services(config, pool, registry, Arc::new(vault), notifier, clock).await
    }

    /// Assemble the application around an existing pool and collaborators.
    pub async fn with_services(
        config: Config,
        pool: PgPool,
        registry: Arc<Registry>,
        broker: Arc<dyn SecretsBroker>,
        notifier: Option<Arc<dyn Notifier>>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let mut tx = pool.begin().await?;
        Environments::new(&mut tx).rebuild(&registry).await?;
        tx.commit().await?;
        info!(count = registry.len(), "Environments table rebuilt from configuration");

        let reservations = ReservationService::new(
            pool.clone(),
            registry.clone(),
            clock.clone(),
            config.booking.clone(),
            config.enable_notifications,
        );
        let scanner = ReservationScanner::new(pool.clone(), registry.clone(), broker.clone(), notifier, clock.clone());
        let bg_services = setup_background_services(pool.clone(), &config, scanner, CancellationToken::new());

        let state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .registry(registry)
            .reservations(reservations)
            .broker(broker)
            .clock(clock)
            .build();

        Ok(Self {
            router: build_router(state),
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("envbook listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Shutdown background services and wait for tasks to complete
        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
