//! Client configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use chrono::Duration as ChronoDuration;
use partner_portal::{
    SessionConfig,
    timeout::{InactivityConfig, SessionTimeoutConfig},
};
use std::path::PathBuf;
use std::time::Duration;

/// Default backend base URL
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api/v1";

/// Default location of the persisted session
pub const DEFAULT_SESSION_FILE: &str = "portal_session.json";

/// Longest idle or session timeout accepted (24 hours)
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Complete client configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every endpoint path is appended to
    pub api_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Where the session is persisted between runs
    pub session_file: PathBuf,
    /// Session manager behavior
    pub session: SessionConfig,
    /// Hard idle timeout
    pub inactivity: InactivityConfig,
    /// Warned session timeout
    pub session_timeout: SessionTimeoutConfig,
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `api_url_override` - Optional API URL override (from CLI args)
    /// * `session_file_override` - Optional session file override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but invalid
    pub fn from_env(
        api_url_override: Option<String>,
        session_file_override: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let api_url = api_url_override
            .or_else(|| std::env::var("PORTAL_API_URL").ok())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let session_file = session_file_override
            .or_else(|| std::env::var("PORTAL_SESSION_FILE").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));

        let session = SessionConfig {
            end_impersonation_on_logout: parse_env_or("PORTAL_STOP_IMPERSONATION_ON_LOGOUT", false),
            ..SessionConfig::default()
        };

        let inactivity = InactivityConfig {
            idle_timeout: Duration::from_secs(parse_env_or("PORTAL_INACTIVITY_TIMEOUT_SECS", 300)),
        };

        let session_timeout = SessionTimeoutConfig {
            session_timeout: minutes(parse_env_or("PORTAL_SESSION_TIMEOUT_MINUTES", 30)),
            warning_window: minutes(parse_env_or("PORTAL_SESSION_WARNING_MINUTES", 5)),
        };

        let config = ClientConfig {
            api_url,
            request_timeout: Duration::from_secs(parse_env_or("PORTAL_REQUEST_TIMEOUT_SECS", 10)),
            session_file,
            session,
            inactivity,
            session_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "PORTAL_API_URL".to_string(),
                reason: "Must start with http:// or https://".to_string(),
            });
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "PORTAL_REQUEST_TIMEOUT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        for (var, timeout) in [
            ("PORTAL_INACTIVITY_TIMEOUT_SECS", self.inactivity.idle_timeout),
            ("PORTAL_SESSION_TIMEOUT_MINUTES", self.session_timeout.session_timeout),
        ] {
            if timeout > MAX_TIMEOUT {
                return Err(ConfigError::Invalid {
                    var: var.to_string(),
                    reason: format!("Must not exceed {} hours", MAX_TIMEOUT.as_secs() / 3600),
                });
            }
        }

        self.inactivity
            .validate()
            .map_err(|e| ConfigError::Invalid {
                var: "PORTAL_INACTIVITY_TIMEOUT_SECS".to_string(),
                reason: e.to_string(),
            })?;

        self.session_timeout
            .validate()
            .map_err(|e| ConfigError::Invalid {
                var: "PORTAL_SESSION_TIMEOUT_MINUTES".to_string(),
                reason: e.to_string(),
            })?;

        if self.session.max_impersonation_lifetime <= ChronoDuration::zero() {
            return Err(ConfigError::Invalid {
                var: "max_impersonation_lifetime".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
