//! Impersonation data models.

use crate::auth::PortalUser;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default upper bound on one impersonation session, in seconds
pub const MAX_IMPERSONATION_LIFETIME_SECS: i64 = 2 * 60 * 60;

/// Persisted form of an active impersonation.
///
/// The impersonated identity is not stored here: it is whatever sits under the
/// `user` key while the record exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationRecord {
    pub original_admin_user: PortalUser,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Overlay on the session while an admin views the portal as another user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpersonationContext {
    pub impersonated_user: PortalUser,
    pub original_admin_user: PortalUser,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ImpersonationContext {
    /// Rebuild the overlay from its persisted record and the stored identity
    pub fn from_record(record: ImpersonationRecord, impersonated_user: PortalUser) -> Self {
        Self {
            impersonated_user,
            original_admin_user: record.original_admin_user,
            session_id: record.session_id,
            started_at: record.started_at,
            expires_at: record.expires_at,
        }
    }

    pub fn to_record(&self) -> ImpersonationRecord {
        ImpersonationRecord {
            original_admin_user: self.original_admin_user.clone(),
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            expires_at: self.expires_at,
        }
    }

    /// Admin must be an admin and must not be the impersonated user
    pub fn is_consistent(&self) -> bool {
        self.original_admin_user.is_admin()
            && self.original_admin_user.uuid != self.impersonated_user.uuid
            && !self.session_id.trim().is_empty()
    }

    /// Time since the impersonation started, never negative
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).max(Duration::zero())
    }

    /// Earliest of the server expiry and `started_at + max_lifetime`
    pub fn deadline(&self, max_lifetime: Duration) -> DateTime<Utc> {
        let local = self.started_at + max_lifetime;
        match self.expires_at {
            Some(server) if server < local => server,
            _ => local,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, max_lifetime: Duration) -> bool {
        now >= self.deadline(max_lifetime)
    }
}

/// Render an elapsed duration as `"1h 2m 3s"`, `"2m 3s"` or `"3s"`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
