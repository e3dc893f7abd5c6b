//! HTTP implementation of the portal backend.

use crate::config::ClientConfig;
use async_trait::async_trait;
use log::{debug, warn};
use partner_portal::{
    PortalUser,
    api::{
        ApiEnvelope, ApiError, ApiResult, ImpersonationGrant, ImpersonationStatus, PortalApi,
        StopImpersonationGrant,
    },
    auth::{AuthGrant, LoginRequest, RegisterRequest},
};
use reqwest::{RequestBuilder, StatusCode, header};
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;

pub const LOGIN_ENDPOINT: &str = "/users/login";
pub const REGISTER_ENDPOINT: &str = "/users/register";
pub const PROFILE_ENDPOINT: &str = "/users/profile";
pub const IMPERSONATE_ENDPOINT: &str = "/admin/impersonate";
pub const STOP_IMPERSONATION_ENDPOINT: &str = "/admin/stop-impersonation";
pub const IMPERSONATION_STATUS_ENDPOINT: &str = "/admin/impersonation-status";

/// The profile endpoint answers with either the user or `{ "user": ... }`
#[derive(Deserialize)]
#[serde(untagged)]
enum ProfilePayload {
    Wrapped { user: PortalUser },
    Bare(PortalUser),
}

impl From<ProfilePayload> for PortalUser {
    fn from(payload: ProfilePayload) -> Self {
        match payload {
            ProfilePayload::Wrapped { user } | ProfilePayload::Bare(user) => user,
        }
    }
}

/// API client for the portal REST backend
pub struct HttpPortalApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPortalApi {
    /// Create a new API client
    ///
    /// # Arguments
    ///
    /// * `base_url` - Backend base URL, e.g. `https://host/api/v1`
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &ClientConfig) -> ApiResult<Self> {
        Self::new(config.api_url.clone(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send `request` and unwrap the `{status, message, data}` envelope.
    ///
    /// 401 maps to `Unauthorized`, 5xx and connection failures to `Transport`, other
    /// non-success statuses to `Rejected` with the server's message when it sent one.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = request
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(format!("Failed to read response: {}", e)))?;

        if status.is_server_error() {
            warn!("Server error {}: {}", status, body);
            return Err(ApiError::Transport(format!("Server error ({})", status)));
        }

        if !status.is_success() {
            let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or_else(|| format!("Request failed ({})", status));
            debug!("Request rejected with {}: {}", status, message);
            return Err(ApiError::Rejected {
                status: Some(status.as_u16()),
                message,
            });
        }

        let envelope: ApiEnvelope<T> = serde_json::from_str(&body)
            .map_err(|e| ApiError::Decode(format!("Failed to parse response: {}", e)))?;
        envelope.into_result()
    }
}

#[async_trait]
impl PortalApi for HttpPortalApi {
    async fn login(&self, request: &LoginRequest) -> ApiResult<AuthGrant> {
        self.send(self.client.post(self.url(LOGIN_ENDPOINT)).json(request))
            .await
    }

    async fn register(&self, request: &RegisterRequest) -> ApiResult<AuthGrant> {
        self.send(self.client.post(self.url(REGISTER_ENDPOINT)).json(request))
            .await
    }

    async fn fetch_profile(&self, token: &str) -> ApiResult<PortalUser> {
        let payload: ProfilePayload = self
            .send(self.client.get(self.url(PROFILE_ENDPOINT)).bearer_auth(token))
            .await?;
        Ok(payload.into())
    }

    async fn start_impersonation(
        &self,
        token: &str,
        target_uuid: &str,
    ) -> ApiResult<ImpersonationGrant> {
        let url = self.url(&format!("{}/{}", IMPERSONATE_ENDPOINT, target_uuid));
        self.send(self.client.post(url).bearer_auth(token)).await
    }

    async fn stop_impersonation(&self, token: &str) -> ApiResult<StopImpersonationGrant> {
        self.send(
            self.client
                .post(self.url(STOP_IMPERSONATION_ENDPOINT))
                .bearer_auth(token),
        )
        .await
    }

    async fn impersonation_status(&self, token: &str) -> ApiResult<ImpersonationStatus> {
        self.send(
            self.client
                .get(self.url(IMPERSONATION_STATUS_ENDPOINT))
                .bearer_auth(token),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = HttpPortalApi::new("http://localhost:5000/api/v1/", Duration::from_secs(1)).unwrap();
        assert_eq!(api.base_url(), "http://localhost:5000/api/v1");
        assert_eq!(api.url(LOGIN_ENDPOINT), "http://localhost:5000/api/v1/users/login");
    }

    #[test]
    fn test_profile_payload_shapes() {
        let bare = r#"{"uuid":"u1","full_name":"A B","email":"a@b.com","role":"user"}"#;
        let wrapped = format!(r#"{{"user":{}}}"#, bare);

        let from_bare: PortalUser = serde_json::from_str::<ProfilePayload>(bare).unwrap().into();
        let from_wrapped: PortalUser = serde_json::from_str::<ProfilePayload>(&wrapped)
            .unwrap()
            .into();
        assert_eq!(from_bare, from_wrapped);
        assert_eq!(from_bare.uuid, "u1");
    }
}
