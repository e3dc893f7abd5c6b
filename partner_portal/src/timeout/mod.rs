//! Idle and absolute session timeouts.
//!
//! Two policies share the same activity events:
//! - [`InactivityMonitor`]: a fixed idle period, then forced logout
//! - [`SessionTimeoutMonitor`]: a longer session window whose last minutes show a
//!   countdown the user can extend or cut short
//!
//! Monitors talk to the session through [`SessionControl`] and move the user through
//! [`Navigator`]; timers come from a [`Scheduler`]. Each monitor forces at most one
//! logout per run and cancels every timer it owns when stopped or dropped.

pub mod inactivity;
pub mod scheduler;
pub mod session_timeout;

pub use inactivity::InactivityMonitor;
pub use scheduler::{Scheduler, TimerHandle, TimerTask, TokioScheduler, VirtualScheduler};
pub use session_timeout::{SessionTimeoutMonitor, TimeoutHooks, TimeoutStatus};

use crate::auth::SessionManager;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// User input that counts as activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityEvent {
    PointerDown,
    PointerMove,
    KeyPress,
    Scroll,
    TouchStart,
    Click,
}

impl ActivityEvent {
    pub const ALL: [ActivityEvent; 6] = [
        ActivityEvent::PointerDown,
        ActivityEvent::PointerMove,
        ActivityEvent::KeyPress,
        ActivityEvent::Scroll,
        ActivityEvent::TouchStart,
        ActivityEvent::Click,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityEvent::PointerDown => "pointer_down",
            ActivityEvent::PointerMove => "pointer_move",
            ActivityEvent::KeyPress => "key_press",
            ActivityEvent::Scroll => "scroll",
            ActivityEvent::TouchStart => "touch_start",
            ActivityEvent::Click => "click",
        }
    }
}

impl fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The part of the session a timeout monitor needs
pub trait SessionControl: Send + Sync {
    /// Token for the live sign-in, `None` when signed out.
    ///
    /// Must change whenever a session ends or a new one starts. Monitors compare it
    /// against the value taken at `start` and stand down on a mismatch.
    fn current_session(&self) -> Option<u64>;

    fn is_authenticated(&self) -> bool {
        self.current_session().is_some()
    }

    /// Force the session closed; must be idempotent
    fn logout(&self);
}

impl SessionControl for SessionManager {
    fn current_session(&self) -> Option<u64> {
        self.sign_in_generation()
    }

    fn is_authenticated(&self) -> bool {
        SessionManager::is_authenticated(self)
    }

    fn logout(&self) {
        SessionManager::logout(self);
    }
}

/// Moves the user to another location
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Timeout configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Warning window ({warning:?}) must be shorter than the session timeout ({timeout:?})")]
    WarningTooLong { warning: Duration, timeout: Duration },
}

/// Idle timeout policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InactivityConfig {
    pub idle_timeout: Duration,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl InactivityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Zero("idle_timeout"));
        }
        Ok(())
    }
}

/// Warned session timeout policy
///
/// A zero `warning_window` disables the countdown; the session then simply ends
/// after `session_timeout` without activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTimeoutConfig {
    pub session_timeout: Duration,
    pub warning_window: Duration,
}

impl Default for SessionTimeoutConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30 * 60),
            warning_window: Duration::from_secs(5 * 60),
        }
    }
}

impl SessionTimeoutConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_timeout.is_zero() {
            return Err(ConfigError::Zero("session_timeout"));
        }
        if self.warning_window >= self.session_timeout {
            return Err(ConfigError::WarningTooLong {
                warning: self.warning_window,
                timeout: self.session_timeout,
            });
        }
        Ok(())
    }

    /// Delay from the last activity until the warning shows
    pub fn warning_delay(&self) -> Duration {
        self.session_timeout.saturating_sub(self.warning_window)
    }
}
