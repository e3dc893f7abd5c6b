//! # Partner Portal
//!
//! Client-side session logic for the partner portal: who is signed in, with which
//! credential, whether an admin is currently viewing the portal as another user,
//! which locations the session may visit, and when an idle session is closed.
//!
//! ## Architecture
//!
//! - **Session store** ([`store`]): durable key/value storage for the token, the
//!   user and the impersonation record, written in atomic batches
//! - **Session manager** ([`auth`]): login, registration, profile refresh, logout and
//!   the global 401 path; the single owner of session state
//! - **Impersonation** ([`impersonation`]): admin "view as" overlay on the session
//! - **Route guards** ([`guard`]): pure decisions over a session snapshot
//! - **Timeouts** ([`timeout`]): idle logout and warned session expiry on
//!   cancellable timers
//!
//! The backend is reached through the [`api::PortalApi`] trait; the `portal_client`
//! crate provides the HTTP implementation.
//!
//! ## Example
//!
//! ```
//! use partner_portal::guard::{GuardDecision, RouteTable};
//! use partner_portal::SessionSnapshot;
//!
//! let routes = RouteTable::portal();
//! let booting = SessionSnapshot::default();
//!
//! // Nothing is decided until the session has been restored
//! assert_eq!(routes.check(&booting, "/dashboard"), GuardDecision::Pending);
//! ```

/// Backend collaborator contract and wire types.
pub mod api;

/// Security event logging.
pub mod audit;

/// Session manager, user model and errors.
pub mod auth;
pub use auth::{
    AuthError, AuthOutcome, AuthResult, PortalUser, Role, SessionConfig, SessionManager,
    SessionSnapshot,
};

/// Route guards.
pub mod guard;

/// Admin impersonation.
pub mod impersonation;
pub use impersonation::{ImpersonationContext, Reconciliation};

/// Persisted session storage.
pub mod store;
pub use store::{FileStore, MemoryStore, SessionStore};

/// Idle and session timeouts.
pub mod timeout;
