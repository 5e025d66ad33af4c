pub mod utils;

use std::sync::Arc;

use chrono::Duration;
use serde_json::{Value, json};
use sqlx::PgPool;

use crate::api::models::{credentials::CredentialsResponse, reservations::ReservationResponse};
use crate::broker::SecretsBroker;
use crate::lifecycle::ReservationStatus;
use crate::scanner::ReservationScanner;
use utils::{BrokerCall, TestApp, auth_header, create_test_app, create_test_config, create_test_app_with_config, minutes_from, test_now, test_registry};

fn scanner_for(app: &TestApp, pool: &PgPool) -> ReservationScanner {
    let broker: Arc<dyn SecretsBroker> = app.broker.clone();
    ReservationScanner::new(pool.clone(), test_registry(), broker, None, Arc::new(app.clock.clone()))
}

async fn my_reservations(app: &TestApp, username: &str) -> Vec<ReservationResponse> {
    let (name, value) = auth_header(username);
    app.server.get("/api/v1/reservations").add_header(name, value).await.json()
}

/// Book, wait for the start, use the credentials, wait for the end.
#[sqlx::test]
#[test_log::test]
async fn test_reservation_journey(pool: PgPool) {
    let app = create_test_app(pool.clone()).await;
    let scanner = scanner_for(&app, &pool);
    let now = test_now();

    let (name, value) = auth_header("alice");
    app.server
        .put("/api/v1/users/current/ssh-key")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "ssh_public_key": "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl alice@laptop" }))
        .await
        .assert_status_ok();

    let created = app
        .server
        .post("/api/v1/reservations")
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "environment_id": "lab",
            "start": minutes_from(now, 10),
            "end": minutes_from(now, 70),
            "subject": "firmware rollout",
        }))
        .await;
    created.assert_status(axum::http::StatusCode::CREATED);
    let created: ReservationResponse = created.json();
    assert_eq!(created.status, ReservationStatus::Upcoming);

    // Nothing is due yet
    assert!(scanner.scan_now().await.is_idle());
    let credentials: Vec<CredentialsResponse> = app
        .server
        .get("/api/v1/credentials")
        .add_header(name.clone(), value.clone())
        .await
        .json();
    assert!(credentials.is_empty());

    app.clock.advance(Duration::minutes(10));
    assert_eq!(scanner.scan_now().await.activated, 1);
    assert_eq!(my_reservations(&app, "alice").await[0].status, ReservationStatus::Active);

    let credentials: Vec<CredentialsResponse> = app
        .server
        .get("/api/v1/credentials")
        .add_header(name.clone(), value.clone())
        .await
        .json();
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0].reservation_id, created.id);
    assert_eq!(credentials[0].valid_until, "2030-01-07 11:10");

    // An active reservation can no longer be aborted
    app.server
        .delete(&format!("/api/v1/reservations/{}", created.id))
        .add_header(name.clone(), value.clone())
        .await
        .assert_status(axum::http::StatusCode::CONFLICT);

    app.clock.advance(Duration::minutes(60));
    assert_eq!(scanner.scan_now().await.deactivated, 1);
    assert_eq!(my_reservations(&app, "alice").await[0].status, ReservationStatus::Expired);

    let calls = app.broker.calls();
    assert!(matches!(
        &calls[0],
        BrokerCall::Begin { environment_id, secret_material: Some(key), expiry }
            if environment_id == "lab" && key.ends_with("alice@laptop") && *expiry == minutes_from(now, 70)
    ));
    assert_eq!(
        calls.last(),
        Some(&BrokerCall::End {
            environment_id: "lab".to_string()
        })
    );
}

#[sqlx::test]
#[test_log::test]
async fn test_environment_schedule_is_public(pool: PgPool) {
    let app = create_test_app(pool.clone()).await;
    let now = test_now();

    let (alice, alice_value) = auth_header("alice");
    app.server
        .post("/api/v1/reservations")
        .add_header(alice, alice_value)
        .json(&json!({ "environment_id": "demo0", "start": minutes_from(now, 30), "end": minutes_from(now, 90) }))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    // Bob sees alice's slot on the environment but not among his own reservations
    let (bob, bob_value) = auth_header("bob");
    let schedule: Vec<ReservationResponse> = app
        .server
        .get("/api/v1/environments/demo0/reservations")
        .add_header(bob.clone(), bob_value.clone())
        .await
        .json();
    assert_eq!(schedule.len(), 1);
    assert_eq!(schedule[0].username, "alice");
    assert_eq!(schedule[0].start, "2030-01-07 10:30");
    assert!(my_reservations(&app, "bob").await.is_empty());

    // Bob can't take an overlapping slot
    let response = app
        .server
        .post("/api/v1/reservations")
        .add_header(bob, bob_value)
        .json(&json!({ "environment_id": "demo0", "start": minutes_from(now, 60), "end": minutes_from(now, 120) }))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["conflict"]["end"], "2030-01-07 11:30");
}

#[sqlx::test]
#[test_log::test]
async fn test_environments_table_follows_configuration(pool: PgPool) {
    let app = create_test_app(pool.clone()).await;
    let (name, value) = auth_header("alice");
    let environments: Vec<Value> = app.server.get("/api/v1/environments").add_header(name.clone(), value.clone()).await.json();
    assert_eq!(environments.len(), 3);
    drop(app);

    // A restart with fewer environments drops the others
    let mut config = create_test_config();
    config.environments.remove("demo1");
    let app = create_test_app_with_config(pool, config).await;
    let environments: Vec<Value> = app.server.get("/api/v1/environments").add_header(name, value).await.json();
    let ids: Vec<&str> = environments.iter().filter_map(|e| e["id"].as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(!ids.contains(&"demo1"));
}

#[sqlx::test]
#[test_log::test]
async fn test_healthz_needs_no_identity(pool: PgPool) {
    let app = create_test_app(pool).await;

    let response = app.server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("OK");

    app.server.get("/api/v1/reservations").await.assert_status_unauthorized();
}

#[sqlx::test]
#[test_log::test]
async fn test_background_scanner_runs_when_enabled(pool: PgPool) {
    let mut config = create_test_config();
    config.scanner.enabled = true;
    config.scanner.interval = std::time::Duration::from_millis(20);
    let app = create_test_app_with_config(pool.clone(), config).await;

    let reservation = utils::create_test_reservation(&pool, "alice", "demo1", minutes_from(test_now(), 1), minutes_from(test_now(), 61)).await;
    app.clock.advance(Duration::minutes(1));

    let mut activated = false;
    for _ in 0..100 {
        let status: ReservationStatus = sqlx::query_scalar("SELECT status FROM reservations WHERE id = $1")
            .bind(reservation.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        if status == ReservationStatus::Active {
            activated = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(activated);

    app.background.shutdown().await;
}
