//! API request and response data models.
//!
//! This module contains the data structures used for HTTP request deserialization
//! and response serialization. These models define the public API contract.
//!
//! API models are distinct from database models, allowing independent evolution of API and
//! storage representations. Timestamps are serialized in the `YYYY-MM-DD HH:MM` display layout
//! on the way out; requests accept ISO 8601 local date-times.
//!
//! - [`users`]: the authenticated user and their stored booking attributes
//! - [`environments`]: the environment catalogue
//! - [`reservations`]: bookings as shown to users
//! - [`credentials`]: secrets of environments the user currently holds

pub mod credentials;
pub mod environments;
pub mod reservations;
pub mod users;
