//! Database record models matching table schemas.
//!
//! These structs correspond directly to table rows and derive `sqlx::FromRow`. They are kept
//! separate from the API models in [`crate::api::models`] so that storage and wire formats can
//! evolve independently.
//!
//! - [`reservations`]: bookings and the conflicting-window projection used for rejections
//! - [`users`]: per-user SSH key and contact address
//! - [`environments`]: the configuration snapshot written at startup

pub mod environments;
pub mod reservations;
pub mod users;
