//! Security event logging.
//!
//! Session transitions that matter for an audit trail (sign-in, forced sign-out,
//! impersonation start and end) are logged under the `security` target so they can
//! be routed separately, e.g. `RUST_LOG=security=info`.

use log::{info, warn};

/// Security-relevant session events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    Login,
    LoginFailed,
    Registered,
    Logout,
    SessionExpired,
    ImpersonationStarted,
    ImpersonationStopped,
    ImpersonationEnded,
}

impl SecurityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEvent::Login => "login",
            SecurityEvent::LoginFailed => "login_failed",
            SecurityEvent::Registered => "registered",
            SecurityEvent::Logout => "logout",
            SecurityEvent::SessionExpired => "session_expired",
            SecurityEvent::ImpersonationStarted => "impersonation_started",
            SecurityEvent::ImpersonationStopped => "impersonation_stopped",
            SecurityEvent::ImpersonationEnded => "impersonation_ended",
        }
    }

    fn is_warning(&self) -> bool {
        matches!(
            self,
            SecurityEvent::LoginFailed
                | SecurityEvent::SessionExpired
                | SecurityEvent::ImpersonationEnded
        )
    }
}

/// Log a security event
///
/// # Arguments
///
/// * `event` - What happened
/// * `user_uuid` - Identity the event concerns, if known
/// * `message` - Free-form detail
pub fn log_security_event(event: SecurityEvent, user_uuid: Option<&str>, message: &str) {
    let user = user_uuid.unwrap_or("-");
    if event.is_warning() {
        warn!(target: "security", "SECURITY [{}] user={}: {}", event.as_str(), user, message);
    } else {
        info!(target: "security", "SECURITY [{}] user={}: {}", event.as_str(), user, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_security_event() {
        // Just ensure it doesn't panic
        log_security_event(SecurityEvent::Login, Some("u1"), "Login successful");
        log_security_event(SecurityEvent::SessionExpired, None, "Token rejected");
    }

    #[test]
    fn test_event_names() {
        assert_eq!(SecurityEvent::ImpersonationStarted.as_str(), "impersonation_started");
        assert!(SecurityEvent::LoginFailed.is_warning());
        assert!(!SecurityEvent::Logout.is_warning());
    }
}
