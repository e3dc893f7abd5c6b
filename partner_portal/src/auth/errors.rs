//! Authentication error types.

use crate::api::ApiError;
use crate::store::StoreError;
use thiserror::Error;

/// Authentication and session errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// The backend refused the request and explained why
    #[error("{0}")]
    Rejected(String),

    /// Input failed local validation before any request was sent
    #[error("{0}")]
    Validation(String),

    /// The credential was not accepted (expired or revoked)
    #[error("Your session has expired. Please log in again")]
    Unauthorized,

    /// Connectivity loss, timeout or server failure
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with something that could not be understood
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Persisted session state could not be written
    #[error("Session storage error: {0}")]
    Persistence(#[from] StoreError),

    /// Operation requires a signed-in user
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Session changed while the request was in flight
    #[error("Session changed while the request was in progress")]
    SessionChanged,

    /// Nested impersonation is not allowed
    #[error("Already impersonating {0}. Exit the current impersonation first")]
    AlreadyImpersonating(String),

    /// No impersonation is active
    #[error("Not currently impersonating")]
    NotImpersonating,

    /// Admin tried to impersonate their own account
    #[error("You cannot impersonate yourself")]
    SelfImpersonation,

    /// Impersonation response violated the session invariants
    #[error("Invalid impersonation response: {0}")]
    InvalidImpersonation(String),

    /// Administrative action attempted while viewing the portal as another user
    #[error("You cannot perform {0} while impersonating another user")]
    RestrictedDuringImpersonation(String),
}

impl AuthError {
    /// Get a client-safe error message that doesn't leak internal details
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Persistence(_) => "Could not save your session on this device".to_string(),
            AuthError::Decode(_) => "Unexpected response from the server".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether this error means the current credential is dead
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AuthError::Unauthorized)
    }
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => AuthError::Unauthorized,
            ApiError::Rejected { message, .. } => AuthError::Rejected(message),
            ApiError::Transport(message) => AuthError::Network(message),
            ApiError::Decode(message) => AuthError::Decode(message),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
