//! Route guards.
//!
//! Guards are pure functions of a [`SessionSnapshot`]: they allow a navigation,
//! hold it until the session has been rehydrated, or redirect it. Nothing is cached
//! between calls.
//!
//! | Guard | Not signed in | Signed in, wrong role | Signed in, allowed |
//! |-------|---------------|-----------------------|--------------------|
//! | [`require_authenticated`] | login (with `from`) | - | allow |
//! | [`require_role`] | login (with `from`) | role landing page | allow |
//! | [`public_only`] | allow | - | role landing page |
//!
//! [`RouteTable`] binds the portal's paths to these guards.

use crate::auth::{Role, SessionSnapshot};

/// Login entry point
pub const LOGIN_PATH: &str = "/login";

/// Landing page for admins
pub const ADMIN_HOME: &str = "/admin";

/// Landing page for everyone else
pub const USER_HOME: &str = "/dashboard";

/// Pages that only make sense while signed out
pub const PUBLIC_AUTH_PATHS: [&str; 4] = ["/login", "/register", "/forgot-password", "/reset-password"];

/// Where a navigation should go instead
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub to: String,
    /// Originally requested location, kept for the post-login redirect
    pub from: Option<String>,
}

impl Redirect {
    pub fn to(path: &str) -> Self {
        Self {
            to: path.to_string(),
            from: None,
        }
    }

    fn to_login(from: &str) -> Self {
        Self {
            to: LOGIN_PATH.to_string(),
            from: Some(from.to_string()),
        }
    }
}

/// Result of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Session not rehydrated yet; render nothing and ask again
    Pending,
    Redirect(Redirect),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }

    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            GuardDecision::Redirect(redirect) => Some(&redirect.to),
            _ => None,
        }
    }
}

/// Default landing page for `role`
pub fn landing_page(role: Role) -> &'static str {
    match role {
        Role::Admin => ADMIN_HOME,
        Role::User | Role::Contact => USER_HOME,
    }
}

fn landing_for(session: &SessionSnapshot) -> &'static str {
    session.role().map(landing_page).unwrap_or(USER_HOME)
}

/// Allow only signed-in sessions; send everyone else to login
pub fn require_authenticated(session: &SessionSnapshot, requested: &str) -> GuardDecision {
    if !session.is_initialized {
        return GuardDecision::Pending;
    }
    if !session.is_authenticated {
        return GuardDecision::Redirect(Redirect::to_login(requested));
    }
    GuardDecision::Allow
}

/// Allow only signed-in sessions whose role is exactly `required`.
///
/// A signed-in user with another role goes to their own landing page, not to login.
pub fn require_role(session: &SessionSnapshot, required: Role, requested: &str) -> GuardDecision {
    require_any_role(session, &[required], requested)
}

/// Like [`require_role`] but accepting any role in `allowed`
pub fn require_any_role(
    session: &SessionSnapshot,
    allowed: &[Role],
    requested: &str,
) -> GuardDecision {
    match require_authenticated(session, requested) {
        GuardDecision::Allow => {}
        other => return other,
    }

    match session.role() {
        Some(role) if allowed.contains(&role) => GuardDecision::Allow,
        _ => GuardDecision::Redirect(Redirect::to(landing_for(session))),
    }
}

/// Allow only signed-out sessions; signed-in users go to their landing page
pub fn public_only(session: &SessionSnapshot) -> GuardDecision {
    if !session.is_initialized {
        return GuardDecision::Pending;
    }
    if session.is_authenticated {
        return GuardDecision::Redirect(Redirect::to(landing_for(session)));
    }
    GuardDecision::Allow
}

/// Target of `/` and unknown paths
pub fn default_redirect(session: &SessionSnapshot) -> &'static str {
    if !session.is_authenticated {
        return LOGIN_PATH;
    }
    landing_for(session)
}

/// Where to go after a successful login.
///
/// The location the user was bounced from is honored when their role may visit it.
pub fn post_login_target(table: &RouteTable, session: &SessionSnapshot, from: Option<&str>) -> String {
    if let Some(from) = from {
        if table.check(session, from).is_allowed() && !is_public_auth_path(from) {
            return from.to_string();
        }
    }
    default_redirect(session).to_string()
}

/// Global 401 path: where to send the user after their credential was rejected
pub fn unauthorized_redirect(current_path: &str) -> Option<Redirect> {
    if is_public_auth_path(current_path) {
        return None;
    }
    Some(Redirect::to(LOGIN_PATH))
}

pub fn is_public_auth_path(path: &str) -> bool {
    PUBLIC_AUTH_PATHS.contains(&normalize(path))
}

fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Access rule for a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Anyone, signed in or not
    Open,
    /// Only signed-out visitors
    PublicOnly,
    /// Any signed-in user
    Authenticated,
    /// Signed-in users with one of these roles
    Roles(Vec<Role>),
}

#[derive(Debug, Clone)]
struct RouteEntry {
    segments: Vec<String>,
    access: Access,
}

impl RouteEntry {
    fn matches(&self, path: &str) -> bool {
        let requested: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        requested.len() == self.segments.len()
            && self
                .segments
                .iter()
                .zip(requested)
                .all(|(pattern, segment)| pattern.starts_with(':') || pattern == segment)
    }
}

/// Path patterns and the guard protecting each
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pattern` (segments starting with `:` match anything)
    pub fn route(mut self, pattern: &str, access: Access) -> Self {
        self.routes.push(RouteEntry {
            segments: pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            access,
        });
        self
    }

    /// The partner portal's routes
    pub fn portal() -> Self {
        // Contacts share the partner pages; a role check of exactly `user` would
        // bounce them back to their own landing page forever.
        let partner = Access::Roles(vec![Role::User, Role::Contact]);
        let admin = Access::Roles(vec![Role::Admin]);

        Self::new()
            .route("/login", Access::PublicOnly)
            .route("/register", Access::PublicOnly)
            .route("/forgot-password", Access::PublicOnly)
            .route("/reset-password", Access::PublicOnly)
            .route("/referral/:uuid", Access::Open)
            .route("/admin", admin.clone())
            .route("/admin/users", admin.clone())
            .route("/admin/tutorials", admin.clone())
            .route("/admin/settings", admin)
            .route("/dashboard", partner.clone())
            .route("/submit", partner.clone())
            .route("/tutorials", partner.clone())
            .route("/compensation", partner.clone())
            .route("/settings", partner)
    }

    /// Access rule for `path`, if it is a known route
    pub fn access(&self, path: &str) -> Option<&Access> {
        let path = normalize(path);
        self.routes
            .iter()
            .find(|route| route.matches(path))
            .map(|route| &route.access)
    }

    /// Decide a navigation to `path`.
    ///
    /// `/` and unknown paths redirect to the session's default destination.
    pub fn check(&self, session: &SessionSnapshot, path: &str) -> GuardDecision {
        let Some(access) = self.access(path) else {
            if !session.is_initialized {
                return GuardDecision::Pending;
            }
            return GuardDecision::Redirect(Redirect::to(default_redirect(session)));
        };

        match access {
            Access::Open => GuardDecision::Allow,
            Access::PublicOnly => public_only(session),
            Access::Authenticated => require_authenticated(session, path),
            Access::Roles(roles) => require_any_role(session, roles, path),
        }
    }
}
