//! API layer for HTTP request handling and data models.
//!
//! This module contains the JSON API, organized into:
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! Everything below `/api/v1` requires the trusted proxy header (see [`crate::auth`]):
//!
//! - **Environments** (`/api/v1/environments/*`): catalogue and per-environment calendar
//! - **Reservations** (`/api/v1/reservations/*`): the user's bookings, create and abort
//! - **Credentials** (`/api/v1/credentials`): secrets of currently held environments
//! - **Users** (`/api/v1/users/current/*`): SSH public key and contact address
//!
//! `/healthz` is unauthenticated.

pub mod handlers;
pub mod models;
