//! Session manager implementation.

use super::{
    errors::{AuthError, AuthResult},
    models::{AuthGrant, LoginRequest, PortalUser, RegisterRequest, SessionSnapshot},
};
use crate::{
    api::{ApiError, PortalApi},
    audit::{SecurityEvent, log_security_event},
    impersonation::{ImpersonationContext, MAX_IMPERSONATION_LIFETIME_SECS},
    store::{PersistedSession, SessionStore, StoreError, USER_KEY, load_session},
};
use chrono::{Duration, Utc};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on one impersonation session, regardless of server expiry
    pub max_impersonation_lifetime: Duration,
    /// Close the server-side impersonation session when logging out mid-impersonation
    pub end_impersonation_on_logout: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_impersonation_lifetime: Duration::seconds(MAX_IMPERSONATION_LIFETIME_SECS),
            end_impersonation_on_logout: false,
        }
    }
}

/// In-memory session state
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) current_user: Option<PortalUser>,
    pub(crate) token: Option<String>,
    pub(crate) is_authenticated: bool,
    pub(crate) is_initialized: bool,
    pub(crate) impersonation: Option<ImpersonationContext>,
    /// Bumped by every transition that changes who is in control
    pub(crate) epoch: u64,
    /// Bumped when a sign-in is established or a session ends; impersonation
    /// and profile refreshes keep it
    pub(crate) sign_in: u64,
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            current_user: self.current_user.clone(),
            token: self.token.clone(),
            is_authenticated: self.is_authenticated,
            is_initialized: self.is_initialized,
            impersonation: self.impersonation.clone(),
        }
    }

    /// Live credential and the epoch it belongs to
    pub(crate) fn live_credential(&self) -> Option<(String, u64)> {
        match (&self.token, self.is_authenticated) {
            (Some(token), true) => Some((token.clone(), self.epoch)),
            _ => None,
        }
    }

    fn install(
        &mut self,
        token: String,
        user: PortalUser,
        impersonation: Option<ImpersonationContext>,
    ) {
        self.token = Some(token);
        self.current_user = Some(user);
        self.impersonation = impersonation;
        self.is_authenticated = true;
        self.epoch += 1;
    }

    fn reset(&mut self) -> Option<(ImpersonationContext, String)> {
        let token = self.token.take();
        let impersonation = self.impersonation.take();
        self.current_user = None;
        self.is_authenticated = false;
        self.epoch += 1;
        self.sign_in += 1;
        impersonation.zip(token)
    }
}

/// Owner of the client-side session.
///
/// One instance exists per running application; guards and timeout monitors are
/// handed a reference to it. Every mutating transition writes through to the
/// [`SessionStore`] before the in-memory state changes, and both happen while the
/// state lock is held, so observers never see a half-applied transition.
pub struct SessionManager {
    api: Arc<dyn PortalApi>,
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    state: Mutex<SessionState>,
}

impl SessionManager {
    /// Create a new session manager
    ///
    /// # Arguments
    ///
    /// * `api` - Portal REST collaborator
    /// * `store` - Durable storage for the session
    pub fn new(api: Arc<dyn PortalApi>, store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(api, store, SessionConfig::default())
    }

    pub fn with_config(
        api: Arc<dyn PortalApi>,
        store: Arc<dyn SessionStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            api,
            store,
            config,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Rehydrate the session from storage.
    ///
    /// Runs once per manager; later calls are no-ops. A usable stored session makes
    /// the manager authenticated immediately and schedules a background profile
    /// refresh on the current tokio runtime, whose handle is returned. Anything
    /// malformed or expired is cleared and leaves the manager logged out. The
    /// manager is marked initialized in every case.
    pub fn initialize(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        {
            let mut state = self.state();
            if state.is_initialized {
                debug!("Session already initialized");
                return None;
            }
            state.is_initialized = true;

            let Some(PersistedSession {
                token,
                user,
                impersonation,
            }) = load_session(self.store.as_ref())
            else {
                info!("No stored session found");
                return None;
            };

            let impersonation =
                impersonation.map(|record| ImpersonationContext::from_record(record, user.clone()));

            if let Some(ctx) = &impersonation {
                if !ctx.is_consistent() {
                    warn!("Stored impersonation record is inconsistent, clearing session");
                    self.clear_session(&mut state);
                    return None;
                }
                if ctx.is_expired(Utc::now(), self.config.max_impersonation_lifetime) {
                    log_security_event(
                        SecurityEvent::ImpersonationEnded,
                        Some(&ctx.original_admin_user.uuid),
                        "Stored impersonation session has expired",
                    );
                    self.clear_session(&mut state);
                    return None;
                }
            }

            info!("Restored session for user {}", user.uuid);
            state.install(token, user, impersonation);
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime available, skipping profile refresh");
            return None;
        };

        let manager = Arc::clone(self);
        Some(runtime.spawn(async move {
            if let Err(e) = manager.refresh_profile().await {
                warn!("Failed to refresh user profile: {}", e);
            }
        }))
    }

    /// Log in with email and password
    ///
    /// # Returns
    ///
    /// * `AuthResult<String>` - Success message, or the reason the login failed
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - Missing email or password
    /// * `AuthError::Rejected` - Credentials refused by the backend
    /// * `AuthError::Network` - Backend unreachable
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<String> {
        let request = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };

        if request.email.is_empty() || request.password.is_empty() {
            return Err(AuthError::Validation(
                "Email and password are required".to_string(),
            ));
        }

        let grant = match self.api.login(&request).await {
            Ok(grant) => grant,
            Err(e) => {
                log_security_event(
                    SecurityEvent::LoginFailed,
                    None,
                    &format!("Login failed for {}: {}", request.email, e),
                );
                return Err(match e {
                    ApiError::Unauthorized => {
                        AuthError::Rejected("Invalid email or password".to_string())
                    }
                    other => other.into(),
                });
            }
        };

        self.establish(grant, SecurityEvent::Login)?;
        Ok("Login successful".to_string())
    }

    /// Create an account and sign in to it
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - Missing fields or mismatched passwords
    /// * `AuthError::Rejected` - Registration refused by the backend
    /// * `AuthError::Network` - Backend unreachable
    pub async fn register(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> AuthResult<String> {
        let request = RegisterRequest {
            full_name: full_name.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
            confirm_password: confirm_password.to_string(),
        };

        if request.full_name.is_empty() || request.email.is_empty() || request.password.is_empty()
        {
            return Err(AuthError::Validation(
                "Full name, email and password are required".to_string(),
            ));
        }

        if request.password != request.confirm_password {
            return Err(AuthError::Validation("Passwords do not match".to_string()));
        }

        let grant = self.api.register(&request).await.map_err(|e| match e {
            ApiError::Unauthorized => AuthError::Rejected("Registration was refused".to_string()),
            other => other.into(),
        })?;

        self.establish(grant, SecurityEvent::Registered)?;
        Ok("Registration successful".to_string())
    }

    /// Re-fetch the identity behind the live credential.
    ///
    /// On success only the user changes; the token is untouched. A 401 is fatal to
    /// the session and clears it. Any other failure leaves the session as it was.
    /// A response for a session that has changed in the meantime is discarded.
    pub async fn refresh_profile(&self) -> AuthResult<PortalUser> {
        let (token, epoch) = self
            .state()
            .live_credential()
            .ok_or(AuthError::NotAuthenticated)?;

        let result = self.api.fetch_profile(&token).await;

        let mut state = self.state();
        if state.epoch != epoch {
            debug!("Discarding profile fetched for a session that has since changed");
            return Err(AuthError::SessionChanged);
        }

        match result {
            Ok(user) => {
                if !user.is_well_formed() {
                    return Err(AuthError::Decode(
                        "profile is missing required fields".to_string(),
                    ));
                }
                if let Some(ctx) = &state.impersonation {
                    if ctx.impersonated_user.uuid != user.uuid {
                        return Err(AuthError::Decode(
                            "profile does not match the impersonated user".to_string(),
                        ));
                    }
                }

                let serialized = serde_json::to_string(&user).map_err(StoreError::from)?;
                self.store.write(USER_KEY, &serialized)?;

                if let Some(ctx) = state.impersonation.as_mut() {
                    ctx.impersonated_user = user.clone();
                }
                state.current_user = Some(user.clone());
                Ok(user)
            }
            Err(ApiError::Unauthorized) => {
                self.expire_locked(&mut state, "Profile refresh rejected the stored credential");
                Err(AuthError::Unauthorized)
            }
            Err(e) => {
                warn!("Failed to refresh user profile: {}", e);
                Err(e.into())
            }
        }
    }

    /// Clear the session, in memory and in storage.
    ///
    /// Synchronous and idempotent. Logging out while impersonating abandons the
    /// impersonation; see [`SessionConfig::end_impersonation_on_logout`].
    pub fn logout(&self) {
        let (uuid, abandoned) = {
            let mut state = self.state();
            let uuid = state.current_user.as_ref().map(|u| u.uuid.clone());
            (uuid, self.clear_session(&mut state))
        };

        if let Some(uuid) = &uuid {
            log_security_event(SecurityEvent::Logout, Some(uuid), "User logged out");
        }

        if let Some((ctx, token)) = abandoned {
            self.abandon_impersonation(ctx, token);
        }
    }

    /// Global 401 path: the live credential was rejected by some authenticated call
    pub fn handle_unauthorized(&self) {
        let mut state = self.state();
        if state.is_authenticated {
            self.expire_locked(&mut state, "Request rejected with 401");
        }
    }

    /// Copy of the current session
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state().snapshot()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated
    }

    pub fn is_initialized(&self) -> bool {
        self.state().is_initialized
    }

    /// Identifies the current sign-in while authenticated.
    ///
    /// Changes on logout, on any forced session end and on every login or
    /// registration, so a value captured earlier no longer matches once the session
    /// it was taken from is gone.
    pub fn sign_in_generation(&self) -> Option<u64> {
        let state = self.state();
        state.is_authenticated.then_some(state.sign_in)
    }

    pub fn current_user(&self) -> Option<PortalUser> {
        self.state().current_user.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.state().token.clone()
    }

    pub fn impersonation(&self) -> Option<ImpersonationContext> {
        self.state().impersonation.clone()
    }

    pub(crate) fn api(&self) -> &dyn PortalApi {
        self.api.as_ref()
    }

    pub(crate) fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `session` through to storage, then install it in memory
    pub(crate) fn commit(
        &self,
        state: &mut SessionState,
        session: PersistedSession,
    ) -> AuthResult<()> {
        self.store.apply(session.to_batch()?)?;

        let PersistedSession {
            token,
            user,
            impersonation,
        } = session;
        let impersonation =
            impersonation.map(|record| ImpersonationContext::from_record(record, user.clone()));
        state.install(token, user, impersonation);
        Ok(())
    }

    /// Fatal credential failure: clear everything and record why
    pub(crate) fn expire_locked(&self, state: &mut SessionState, reason: &str) {
        let uuid = state.current_user.as_ref().map(|u| u.uuid.clone());
        if self.clear_session(state).is_some() {
            debug!("Impersonation discarded along with an expired credential");
        }
        log_security_event(SecurityEvent::SessionExpired, uuid.as_deref(), reason);
    }

    fn clear_session(&self, state: &mut SessionState) -> Option<(ImpersonationContext, String)> {
        if let Err(e) = self.store.clear_all() {
            warn!("Failed to clear stored session: {}", e);
        }
        state.reset()
    }

    fn establish(&self, grant: AuthGrant, event: SecurityEvent) -> AuthResult<()> {
        if grant.token.trim().is_empty() || !grant.user.is_well_formed() {
            return Err(AuthError::Decode(
                "response is missing the token or user".to_string(),
            ));
        }

        let uuid = grant.user.uuid.clone();
        {
            let mut state = self.state();
            self.commit(
                &mut state,
                PersistedSession {
                    token: grant.token,
                    user: grant.user,
                    impersonation: None,
                },
            )?;
            state.sign_in += 1;
        }

        log_security_event(event, Some(&uuid), "Session established");
        Ok(())
    }

    fn abandon_impersonation(&self, ctx: ImpersonationContext, token: String) {
        if !self.config.end_impersonation_on_logout {
            log_security_event(
                SecurityEvent::ImpersonationEnded,
                Some(&ctx.original_admin_user.uuid),
                &format!(
                    "Logout abandoned impersonation session {} without closing it on the server",
                    ctx.session_id
                ),
            );
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No async runtime available, impersonation session {} left open",
                ctx.session_id
            );
            return;
        };

        let api = Arc::clone(&self.api);
        runtime.spawn(async move {
            match api.stop_impersonation(&token).await {
                Ok(_) => log_security_event(
                    SecurityEvent::ImpersonationStopped,
                    Some(&ctx.original_admin_user.uuid),
                    &format!("Impersonation session {} closed on logout", ctx.session_id),
                ),
                Err(e) => warn!(
                    "Failed to close impersonation session {} on logout: {}",
                    ctx.session_id, e
                ),
            }
        });
    }
}
