//! Collaborator interface to the portal REST API.
//!
//! The session manager never talks HTTP itself. It is handed a [`PortalApi`]
//! implementation at construction time, which keeps the state machine testable
//! with scripted fakes and lets the transport live in the client crate.
//!
//! Wire shapes follow the backend's `{status, message, data}` envelope; see
//! [`ApiEnvelope`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{AuthGrant, LoginRequest, PortalUser, RegisterRequest};

/// Errors reported by a [`PortalApi`] implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// HTTP 401: the bearer credential is expired or revoked
    #[error("Unauthorized")]
    Unauthorized,

    /// The backend answered but refused the operation
    #[error("{message}")]
    Rejected {
        status: Option<u16>,
        message: String,
    },

    /// No usable answer: connection failure, timeout or 5xx
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Result type for API calls
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard response envelope used by every portal endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload of a `"success"` envelope, or turn the envelope into a rejection
    pub fn into_result(self) -> ApiResult<T> {
        if self.status != "success" {
            return Err(ApiError::Rejected {
                status: None,
                message: self
                    .message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            });
        }

        self.data
            .ok_or_else(|| ApiError::Decode("success response without data".to_string()))
    }
}

/// Payload of `POST /admin/impersonate/{uuid}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationGrant {
    pub impersonation_token: String,
    pub target_user: PortalUser,
    pub admin_user: PortalUser,
    pub session_id: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Payload of `POST /admin/stop-impersonation`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopImpersonationGrant {
    pub original_token: String,
}

/// Payload of `GET /admin/impersonation-status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationStatus {
    pub is_impersonating: bool,
    #[serde(default)]
    pub admin_user: Option<PortalUser>,
    #[serde(default)]
    pub target_user: Option<PortalUser>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

/// Remote operations the session manager depends on.
///
/// Authenticated calls take the bearer token explicitly so the caller decides which
/// credential (own or impersonation) is live.
#[async_trait]
pub trait PortalApi: Send + Sync {
    /// `POST /users/login`
    async fn login(&self, request: &LoginRequest) -> ApiResult<AuthGrant>;

    /// `POST /users/register`
    async fn register(&self, request: &RegisterRequest) -> ApiResult<AuthGrant>;

    /// Fetch the identity bound to `token`
    async fn fetch_profile(&self, token: &str) -> ApiResult<PortalUser>;

    /// `POST /admin/impersonate/{uuid}`
    async fn start_impersonation(
        &self,
        token: &str,
        target_uuid: &str,
    ) -> ApiResult<ImpersonationGrant>;

    /// `POST /admin/stop-impersonation`
    async fn stop_impersonation(&self, token: &str) -> ApiResult<StopImpersonationGrant>;

    /// `GET /admin/impersonation-status`
    async fn impersonation_status(&self, token: &str) -> ApiResult<ImpersonationStatus>;
}
