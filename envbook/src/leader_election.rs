use sqlx::{Connection, PgPool};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Advisory lock key held by the replica that runs the reservation scanner ("ENVBSCAN")
pub const SCANNER_LOCK_ID: i64 = 0x454E_5642_5343_414E_i64;

/// How often leadership is attempted or renewed
pub const LEADER_RENEW_INTERVAL: Duration = Duration::from_secs(30);

/// Background task for leader election
/// Runs periodically to maintain leadership or attempt to acquire it
///
/// Only the leader runs the reservation scanner. Concurrent sweeps are safe, since due rows are
/// locked with `SKIP LOCKED`, but a single scanner keeps broker traffic and logs sane.
///
/// PostgreSQL advisory locks are session-based, so we need to maintain a dedicated connection
/// for the entire duration we want to hold the lock.
#[instrument(skip(pool, is_leader, on_gain_leadership, on_lose_leadership, shutdown))]
pub async fn leader_election_task<F1, F2, Fut1, Fut2>(
    pool: PgPool,
    is_leader: Arc<AtomicBool>,
    lock_id: i64,
    renew_interval: Duration,
    shutdown: CancellationToken,
    on_gain_leadership: F1,
    on_lose_leadership: F2,
) where
    F1: Fn() -> Fut1 + Send + 'static,
    F2: Fn() -> Fut2 + Send + 'static,
    Fut1: std::future::Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    Fut2: std::future::Future<Output = Result<(), anyhow::Error>> + Send + 'static,
{
    let mut interval = tokio::time::interval(renew_interval);
    let mut leader_conn: Option<sqlx::pool::PoolConnection<sqlx::Postgres>> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if is_leader.swap(false, Ordering::Relaxed) {
                    info!("Giving up leadership (shutting down)");
                    if let Err(e) = on_lose_leadership().await {
                        tracing::error!("Failed to execute on_lose_leadership callback: {}", e);
                    }
                }
                // Dropping the connection returns it to the pool; close it so the lock is released
                if let Some(conn) = leader_conn.take() {
                    let _ = conn.detach().close().await;
                }
                return;
            }
            _ = interval.tick() => {}
        }

        // If we're not leader, try to acquire the lock
        if !is_leader.load(Ordering::Relaxed) {
            match pool.acquire().await {
                Ok(mut conn) => {
                    match sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
                        .bind(lock_id)
                        .fetch_one(&mut *conn)
                        .await
                    {
                        Ok(true) => {
                            info!("Gained leadership");
                            is_leader.store(true, Ordering::Relaxed);
                            leader_conn = Some(conn); // Keep connection alive

                            if let Err(e) = on_gain_leadership().await {
                                tracing::error!("Failed to execute on_gain_leadership callback: {}", e);
                            }
                        }
                        Ok(false) => {
                            // Someone else has the lock
                            debug!("Following - will retry");
                        }
                        Err(e) => {
                            tracing::error!("Failed to check leader lock: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to acquire connection for leader election: {}", e);
                }
            }
        } else if let Some(ref mut conn) = leader_conn {
            // Ping the connection to keep it alive
            match sqlx::query("SELECT 1").execute(&mut **conn).await {
                Ok(_) => {
                    debug!("Leadership renewed (connection alive)");
                }
                Err(e) => {
                    // Connection died, which will drop the advisory lock, we lost leadership
                    tracing::warn!("Lost leadership (connection died): {}", e);
                    is_leader.store(false, Ordering::Relaxed);
                    leader_conn = None;

                    if let Err(e) = on_lose_leadership().await {
                        tracing::error!("Failed to execute on_lose_leadership callback: {}", e);
                    }
                }
            }
        } else {
            tracing::error!("Inconsistent state: is_leader=true but no connection");
            is_leader.store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn spawn_candidate(
        pool: &PgPool,
        shutdown: &CancellationToken,
        gained: Arc<AtomicUsize>,
        lost: Arc<AtomicUsize>,
    ) -> (Arc<AtomicBool>, tokio::task::JoinHandle<()>) {
        let is_leader = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(leader_election_task(
            pool.clone(),
            is_leader.clone(),
            SCANNER_LOCK_ID,
            Duration::from_millis(20),
            shutdown.clone(),
            move || {
                let gained = gained.clone();
                async move {
                    gained.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            move || {
                let lost = lost.clone();
                async move {
                    lost.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ));
        (is_leader, handle)
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_single_leader_and_release_on_shutdown(pool: PgPool) {
        let first_shutdown = CancellationToken::new();
        let (first_gained, first_lost) = (counter(), counter());
        let (first, first_handle) = spawn_candidate(&pool, &first_shutdown, first_gained.clone(), first_lost.clone());

        for _ in 0..100 {
            if first.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(first.load(Ordering::Relaxed));
        assert_eq!(first_gained.load(Ordering::SeqCst), 1);

        let second_shutdown = CancellationToken::new();
        let second_gained = counter();
        let (second, second_handle) = spawn_candidate(&pool, &second_shutdown, second_gained.clone(), counter());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!second.load(Ordering::Relaxed));
        assert_eq!(second_gained.load(Ordering::SeqCst), 0);

        first_shutdown.cancel();
        first_handle.await.unwrap();
        assert!(!first.load(Ordering::Relaxed));
        assert_eq!(first_lost.load(Ordering::SeqCst), 1);

        for _ in 0..100 {
            if second.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(second.load(Ordering::Relaxed));

        second_shutdown.cancel();
        second_handle.await.unwrap();
    }
}
