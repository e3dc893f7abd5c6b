//! Authentication module: login, registration, profile refresh and logout.
//!
//! The [`SessionManager`] owns the session: the identity currently in control, its
//! bearer token, and the flags guards depend on. It:
//! - rehydrates from a [`SessionStore`](crate::store::SessionStore) once per process
//! - writes every transition through to storage before updating memory
//! - treats a 401 on an authenticated call as fatal to the session
//! - reports credential and network failures as values, never panics
//!
//! ## Example
//!
//! ```no_run
//! use partner_portal::auth::SessionManager;
//! use partner_portal::store::MemoryStore;
//! # use partner_portal::api::PortalApi;
//! use std::sync::Arc;
//!
//! # async fn example(api: Arc<dyn PortalApi>) {
//! let manager = Arc::new(SessionManager::new(api, Arc::new(MemoryStore::new())));
//! manager.initialize();
//!
//! match manager.login("a@b.com", "secret").await {
//!     Ok(message) => println!("{}", message),
//!     Err(e) => println!("Login failed: {}", e.client_message()),
//! }
//! # }
//! ```

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{AuthError, AuthResult};
pub use manager::{SessionConfig, SessionManager};
pub use models::{
    AuthGrant, AuthOutcome, LoginRequest, PortalUser, RegisterRequest, Role, SessionSnapshot,
    UserUuid,
};
