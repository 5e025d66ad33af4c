//! HTTP request handlers for all API endpoints.
//!
//! This module contains Axum route handlers organized by resource type.
//! Each handler is responsible for:
//! - Request deserialization
//! - Requiring an authenticated user via the [`CurrentUser`](crate::api::models::users::CurrentUser) extractor
//! - Calling the booking service, repositories or secrets broker
//! - Response serialization
//!
//! # Handler Modules
//!
//! - [`environments`]: environment catalogue and per-environment calendar
//! - [`reservations`]: the user's reservations, booking and aborting
//! - [`credentials`]: secrets for environments the user currently holds
//! - [`users`]: the user's SSH key and contact address
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`] which automatically converts to
//! appropriate HTTP status codes and error responses.

pub mod credentials;
pub mod environments;
pub mod reservations;
pub mod users;
