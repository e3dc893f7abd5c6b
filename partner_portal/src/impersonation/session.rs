//! Impersonation transitions on the session manager.

use super::models::{ImpersonationContext, ImpersonationRecord, format_elapsed};
use crate::{
    api::ApiError,
    audit::{SecurityEvent, log_security_event},
    auth::{AuthError, AuthResult, SessionManager},
    store::{IMPERSONATION_KEY, PersistedSession, StoreError, WriteBatch},
};
use chrono::Utc;
use log::{debug, info, warn};

/// Outcome of comparing local impersonation state with the server's view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Local and server state agree
    InSync,
    /// Local record was updated from the server
    Updated,
    /// Impersonation overlay was rebuilt from the server
    Restored,
    /// Server no longer knows the impersonation; the session was cleared
    Ended,
}

impl SessionManager {
    /// Start viewing the portal as `target_uuid`.
    ///
    /// Rejected locally when not signed in, when already impersonating, or when the
    /// target is the signed-in user. The real admin identity is captured from the
    /// live session at commit time, so a profile refresh that completed while the
    /// request was in flight is reflected in the restored identity.
    ///
    /// # Errors
    ///
    /// * `AuthError::AlreadyImpersonating` - An impersonation is already active
    /// * `AuthError::SelfImpersonation` - Target is the signed-in user
    /// * `AuthError::Rejected` - Backend refused (not an admin, target not found, ...)
    /// * `AuthError::SessionChanged` - Session switched while the request was in flight
    /// * `AuthError::InvalidImpersonation` - Response contradicts the live session
    pub async fn start_impersonation(&self, target_uuid: &str) -> AuthResult<String> {
        let target_uuid = target_uuid.trim();
        if target_uuid.is_empty() {
            return Err(AuthError::Validation("A user must be selected".to_string()));
        }

        let (token, epoch) = {
            let state = self.state();
            if let Some(ctx) = &state.impersonation {
                return Err(AuthError::AlreadyImpersonating(
                    ctx.impersonated_user.full_name.clone(),
                ));
            }
            if state
                .current_user
                .as_ref()
                .is_some_and(|u| u.uuid == target_uuid)
            {
                return Err(AuthError::SelfImpersonation);
            }
            state.live_credential().ok_or(AuthError::NotAuthenticated)?
        };

        let result = self.api().start_impersonation(&token, target_uuid).await;

        let mut state = self.state();
        if state.epoch != epoch {
            warn!("Session changed while starting impersonation of {}", target_uuid);
            return Err(AuthError::SessionChanged);
        }

        let grant = match result {
            Ok(grant) => grant,
            Err(ApiError::Unauthorized) => {
                self.expire_locked(&mut state, "Impersonation request rejected with 401");
                return Err(AuthError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        };

        let admin = state
            .current_user
            .clone()
            .ok_or(AuthError::NotAuthenticated)?;

        if !admin.is_admin() {
            return Err(AuthError::InvalidImpersonation(
                "signed-in user is not an admin".to_string(),
            ));
        }
        if grant.admin_user.uuid != admin.uuid {
            return Err(AuthError::InvalidImpersonation(
                "admin identity does not match the signed-in user".to_string(),
            ));
        }
        if grant.target_user.uuid == admin.uuid {
            return Err(AuthError::SelfImpersonation);
        }
        if grant.impersonation_token.trim().is_empty()
            || !grant.target_user.is_well_formed()
            || grant.session_id.trim().is_empty()
        {
            return Err(AuthError::Decode(
                "impersonation response is incomplete".to_string(),
            ));
        }

        let target_name = grant.target_user.full_name.clone();
        let target = grant.target_user.uuid.clone();
        let session_id = grant.session_id.clone();
        let admin_uuid = admin.uuid.clone();

        self.commit(
            &mut state,
            PersistedSession {
                token: grant.impersonation_token,
                user: grant.target_user,
                impersonation: Some(ImpersonationRecord {
                    original_admin_user: admin,
                    session_id: grant.session_id,
                    started_at: Utc::now(),
                    expires_at: grant.expires_at,
                }),
            },
        )?;
        drop(state);

        log_security_event(
            SecurityEvent::ImpersonationStarted,
            Some(&admin_uuid),
            &format!("Impersonating {} (session {})", target, session_id),
        );
        Ok(format!("Now viewing the portal as {}", target_name))
    }

    /// Return to the admin's own session.
    ///
    /// The server closes the audit session and issues a fresh admin token. If it
    /// cannot confirm, the impersonation stays active so the audit trail is not lost.
    ///
    /// # Errors
    ///
    /// * `AuthError::NotImpersonating` - No impersonation is active
    /// * `AuthError::Rejected` / `AuthError::Network` - Server did not confirm; still impersonating
    /// * `AuthError::Unauthorized` - Impersonation token is dead; the session was cleared
    pub async fn stop_impersonation(&self) -> AuthResult<String> {
        let (token, epoch) = {
            let state = self.state();
            if state.impersonation.is_none() {
                return Err(AuthError::NotImpersonating);
            }
            state.live_credential().ok_or(AuthError::NotAuthenticated)?
        };

        let result = self.api().stop_impersonation(&token).await;

        let mut state = self.state();
        if state.epoch != epoch {
            warn!("Session changed while stopping impersonation");
            return Err(AuthError::SessionChanged);
        }

        let grant = match result {
            Ok(grant) => grant,
            Err(ApiError::Unauthorized) => {
                self.expire_locked(&mut state, "Stop-impersonation rejected with 401");
                return Err(AuthError::Unauthorized);
            }
            Err(e) => {
                warn!("Server did not confirm end of impersonation: {}", e);
                return Err(e.into());
            }
        };

        if grant.original_token.trim().is_empty() {
            return Err(AuthError::Decode(
                "stop-impersonation response has no token".to_string(),
            ));
        }

        let ctx = state
            .impersonation
            .clone()
            .ok_or(AuthError::NotImpersonating)?;
        let admin = ctx.original_admin_user;
        let message = format!("Returned to your admin account ({})", admin.full_name);
        let admin_uuid = admin.uuid.clone();

        self.commit(
            &mut state,
            PersistedSession {
                token: grant.original_token,
                user: admin,
                impersonation: None,
            },
        )?;
        drop(state);

        log_security_event(
            SecurityEvent::ImpersonationStopped,
            Some(&admin_uuid),
            &format!(
                "Stopped impersonating {} (session {})",
                ctx.impersonated_user.uuid, ctx.session_id
            ),
        );
        Ok(message)
    }

    /// Compare local impersonation state with `GET /admin/impersonation-status`
    pub async fn reconcile_impersonation(&self) -> AuthResult<Reconciliation> {
        let (token, epoch) = self
            .state()
            .live_credential()
            .ok_or(AuthError::NotAuthenticated)?;

        let result = self.api().impersonation_status(&token).await;

        let mut state = self.state();
        if state.epoch != epoch {
            return Err(AuthError::SessionChanged);
        }

        let status = match result {
            Ok(status) => status,
            Err(ApiError::Unauthorized) => {
                self.expire_locked(&mut state, "Impersonation status rejected with 401");
                return Err(AuthError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        };

        match (state.impersonation.clone(), status.is_impersonating) {
            (None, false) => Ok(Reconciliation::InSync),
            (Some(_), false) => {
                // The stored token is the impersonation token and the admin's own
                // token is gone, so there is nothing to fall back to.
                self.expire_locked(&mut state, "Server reports no active impersonation");
                Ok(Reconciliation::Ended)
            }
            (Some(mut ctx), true) => match status.session_id {
                Some(session_id) if session_id != ctx.session_id => {
                    ctx.session_id = session_id;
                    if let Some(start) = status.start_time {
                        ctx.started_at = start;
                    }
                    let record = serde_json::to_string(&ctx.to_record()).map_err(StoreError::from)?;
                    self.store()
                        .apply(WriteBatch::new().put(IMPERSONATION_KEY, record))?;
                    state.impersonation = Some(ctx);
                    Ok(Reconciliation::Updated)
                }
                _ => Ok(Reconciliation::InSync),
            },
            (None, true) => {
                let (Some(admin), Some(target), Some(session_id)) =
                    (status.admin_user, status.target_user, status.session_id)
                else {
                    debug!("Server reports impersonation without details, leaving session as is");
                    return Ok(Reconciliation::InSync);
                };

                let Some(current) = state.current_user.clone() else {
                    return Ok(Reconciliation::InSync);
                };
                if current.uuid != target.uuid {
                    debug!("Server impersonation target is not the current user, ignoring");
                    return Ok(Reconciliation::InSync);
                }

                let ctx = ImpersonationContext {
                    impersonated_user: current,
                    original_admin_user: admin,
                    session_id,
                    started_at: status.start_time.unwrap_or_else(Utc::now),
                    expires_at: None,
                };
                if !ctx.is_consistent() {
                    return Err(AuthError::InvalidImpersonation(
                        "server status violates impersonation invariants".to_string(),
                    ));
                }

                let record = serde_json::to_string(&ctx.to_record()).map_err(StoreError::from)?;
                self.store()
                    .apply(WriteBatch::new().put(IMPERSONATION_KEY, record))?;
                info!("Restored impersonation overlay from server status");
                state.impersonation = Some(ctx);
                Ok(Reconciliation::Restored)
            }
        }
    }

    /// End an impersonation that outlived its time box.
    ///
    /// Returns `true` when the session was cleared.
    pub fn check_impersonation_expiry(&self) -> bool {
        let mut state = self.state();
        let expired = state.impersonation.as_ref().is_some_and(|ctx| {
            ctx.is_expired(Utc::now(), self.config().max_impersonation_lifetime)
        });

        if expired {
            self.expire_locked(&mut state, "Impersonation exceeded its maximum lifetime");
        }
        expired
    }

    /// Elapsed impersonation time formatted for display, while impersonating
    pub fn impersonation_elapsed(&self) -> Option<String> {
        self.state()
            .impersonation
            .as_ref()
            .map(|ctx| format_elapsed(ctx.elapsed(Utc::now())))
    }

    /// Refuse an administrative `action` while viewing the portal as another user
    pub fn ensure_not_impersonating(&self, action: &str) -> AuthResult<()> {
        if self.state().impersonation.is_some() {
            return Err(AuthError::RestrictedDuringImpersonation(action.to_string()));
        }
        Ok(())
    }
}
