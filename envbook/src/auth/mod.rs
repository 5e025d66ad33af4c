//! Authentication.
//!
//! Login happens upstream: a reverse proxy authenticates the user (LDAP or otherwise) and forwards
//! the username in a trusted header, configured as `auth.proxy_header.header_name`. Handlers take a
//! [`CurrentUser`](crate::api::models::users::CurrentUser) argument to require it.
//!
//! There is no authorization beyond ownership: any authenticated user may book any environment,
//! and users can only abort their own reservations.

pub mod current_user;
