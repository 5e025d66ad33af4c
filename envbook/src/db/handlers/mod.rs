//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection`, which may be a pooled connection or an open
//! transaction, and exposes strongly-typed queries returning models from [`crate::db::models`].
//!
//! # Available Repositories
//!
//! - [`Reservations`]: bookings, conflict checks and the scanner's due-row locking
//! - [`Users`]: SSH keys, contact addresses and user retention
//! - [`Environments`]: the configuration snapshot table
//!
//! # Common Pattern
//!
//! ```ignore
//! use envbook::db::handlers::Reservations;
//!
//! async fn example(pool: &sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!     let mut repo = Reservations::new(&mut tx);
//!
//!     repo.lock_environment("demo0").await?;
//!     let conflict = repo.find_conflict("demo0", start, end).await?;
//!
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

pub mod environments;
pub mod reservations;
pub mod users;

pub use environments::Environments;
pub use reservations::Reservations;
pub use users::Users;
