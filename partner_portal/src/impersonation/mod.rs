//! Impersonation: an admin temporarily acting as another user.
//!
//! Two states, layered on the [`SessionManager`](crate::auth::SessionManager):
//!
//! ```text
//!            start_impersonation(uuid)
//!   Normal ----------------------------> Impersonating
//!     ^  ^                                  |     |
//!     |  +------- stop_impersonation() -----+     |
//!     +-------------- logout() -------------------+
//! ```
//!
//! While impersonating, the live token is the impersonation token and the current
//! user mirrors the impersonated user. The real admin identity is kept in the
//! [`ImpersonationContext`] and persisted as an [`ImpersonationRecord`]. Nested
//! impersonation is rejected with `AuthError::AlreadyImpersonating`.

pub mod models;
pub mod session;

pub use models::{
    ImpersonationContext, ImpersonationRecord, MAX_IMPERSONATION_LIFETIME_SECS, format_elapsed,
};
pub use session::Reconciliation;
