//! Authentication data models.

use serde::{Deserialize, Serialize};
use std::fmt;

/// User UUID type
pub type UserUuid = String;

/// Portal role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Contact,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Contact => "contact",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity record of a portal user, as served by the profile and login endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalUser {
    pub uuid: UserUuid,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    #[serde(default)]
    pub compensation_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl PortalUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether every field a session depends on is present
    pub fn is_well_formed(&self) -> bool {
        !self.uuid.trim().is_empty() && !self.email.trim().is_empty()
    }
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// Token and identity returned by a successful login or registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthGrant {
    pub user: PortalUser,
    pub token: String,
}

/// Presentation form of an auth result: a success flag and a message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthOutcome {
    pub success: bool,
    pub message: String,
}

impl<E> From<Result<String, E>> for AuthOutcome
where
    E: Into<super::AuthError>,
{
    fn from(result: Result<String, E>) -> Self {
        match result {
            Ok(message) => Self {
                success: true,
                message,
            },
            Err(e) => Self {
                success: false,
                message: e.into().client_message(),
            },
        }
    }
}

/// Snapshot of the session as seen by guards, monitors and views
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub current_user: Option<PortalUser>,
    pub token: Option<String>,
    pub is_authenticated: bool,
    pub is_initialized: bool,
    pub impersonation: Option<crate::impersonation::ImpersonationContext>,
}

impl SessionSnapshot {
    pub fn role(&self) -> Option<Role> {
        self.current_user.as_ref().map(|u| u.role)
    }

    pub fn is_impersonating(&self) -> bool {
        self.impersonation.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_deserializes_api_shape() {
        let json = r#"{"uuid":"u1","role":"user","full_name":"A B","email":"a@b.com","compensation_link":null}"#;
        let user: PortalUser = serde_json::from_str(json).expect("valid user");

        assert_eq!(user.uuid, "u1");
        assert_eq!(user.role, Role::User);
        assert!(user.partner_id.is_none());
        assert!(user.compensation_link.is_none());
        assert!(user.is_well_formed());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let json = r#"{"uuid":"u1","role":"owner","full_name":"A","email":"a@b.com"}"#;
        assert!(serde_json::from_str::<PortalUser>(json).is_err());
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: AuthOutcome = Ok::<_, super::super::AuthError>("Login successful".to_string()).into();
        assert!(ok.success);
        assert_eq!(ok.message, "Login successful");

        let err: AuthOutcome =
            Err::<String, _>(super::super::AuthError::Rejected("Invalid password".into())).into();
        assert!(!err.success);
        assert_eq!(err.message, "Invalid password");
    }
}
