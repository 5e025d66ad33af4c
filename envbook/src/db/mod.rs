//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with PostgreSQL. PostgreSQL is the only
//! shared mutable state in the service: booking requests and the reservation scanner coordinate
//! exclusively through transactions, advisory locks and row locks taken here.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐
//! │ booking / scanner / api │
//! └───────────┬─────────────┘
//!             │
//!             ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//!
//! # Migrations
//!
//! Migrations for `reservations` and `users` live in the `migrations/` directory and are exposed
//! through [`crate::migrator`]. The `environments` table is rebuilt from configuration instead,
//! see [`handlers::Environments::rebuild`].

pub mod errors;
pub mod handlers;
pub mod models;
