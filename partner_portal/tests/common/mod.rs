//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use partner_portal::{
    PortalUser, Role, SessionManager,
    api::{ApiError, ApiResult, ImpersonationGrant, ImpersonationStatus, PortalApi, StopImpersonationGrant},
    auth::{AuthGrant, LoginRequest, RegisterRequest},
    store::MemoryStore,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Scripted backend: each call pops the next queued response for its endpoint
#[derive(Default)]
pub struct FakeApi {
    login: Mutex<VecDeque<ApiResult<AuthGrant>>>,
    register: Mutex<VecDeque<ApiResult<AuthGrant>>>,
    profile: Mutex<VecDeque<ApiResult<PortalUser>>>,
    start: Mutex<VecDeque<ApiResult<ImpersonationGrant>>>,
    stop: Mutex<VecDeque<ApiResult<StopImpersonationGrant>>>,
    status: Mutex<VecDeque<ApiResult<ImpersonationStatus>>>,
    calls: Mutex<Vec<String>>,
    /// When set, profile and impersonation calls wait for a notification before answering
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_login(&self, response: ApiResult<AuthGrant>) {
        self.login.lock().unwrap().push_back(response);
    }

    pub fn push_register(&self, response: ApiResult<AuthGrant>) {
        self.register.lock().unwrap().push_back(response);
    }

    pub fn push_profile(&self, response: ApiResult<PortalUser>) {
        self.profile.lock().unwrap().push_back(response);
    }

    pub fn push_start(&self, response: ApiResult<ImpersonationGrant>) {
        self.start.lock().unwrap().push_back(response);
    }

    pub fn push_stop(&self, response: ApiResult<StopImpersonationGrant>) {
        self.stop.lock().unwrap().push_back(response);
    }

    pub fn push_status(&self, response: ApiResult<ImpersonationStatus>) {
        self.status.lock().unwrap().push_back(response);
    }

    /// Hold authenticated responses until the returned handle is notified
    pub fn hold(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    /// Endpoints called so far, with the token used where there is one
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, endpoint: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(' ').next() == Some(endpoint))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn wait_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn next<T>(queue: &Mutex<VecDeque<ApiResult<T>>>) -> ApiResult<T> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Transport("no scripted response".to_string())))
    }
}

#[async_trait]
impl PortalApi for FakeApi {
    async fn login(&self, request: &LoginRequest) -> ApiResult<AuthGrant> {
        self.record(format!("login {}", request.email));
        Self::next(&self.login)
    }

    async fn register(&self, request: &RegisterRequest) -> ApiResult<AuthGrant> {
        self.record(format!("register {}", request.email));
        Self::next(&self.register)
    }

    async fn fetch_profile(&self, token: &str) -> ApiResult<PortalUser> {
        self.record(format!("profile {}", token));
        self.wait_gate().await;
        Self::next(&self.profile)
    }

    async fn start_impersonation(
        &self,
        token: &str,
        target_uuid: &str,
    ) -> ApiResult<ImpersonationGrant> {
        self.record(format!("start {} {}", token, target_uuid));
        self.wait_gate().await;
        Self::next(&self.start)
    }

    async fn stop_impersonation(&self, token: &str) -> ApiResult<StopImpersonationGrant> {
        self.record(format!("stop {}", token));
        Self::next(&self.stop)
    }

    async fn impersonation_status(&self, token: &str) -> ApiResult<ImpersonationStatus> {
        self.record(format!("status {}", token));
        Self::next(&self.status)
    }
}

pub fn user(uuid: &str, role: Role) -> PortalUser {
    PortalUser {
        uuid: uuid.to_string(),
        full_name: format!("User {}", uuid),
        email: format!("{}@example.com", uuid),
        role,
        partner_id: None,
        compensation_link: None,
        created_at: None,
    }
}

pub fn admin() -> PortalUser {
    PortalUser {
        full_name: "Ada Admin".to_string(),
        ..user("admin1", Role::Admin)
    }
}

pub fn partner() -> PortalUser {
    PortalUser {
        full_name: "A B".to_string(),
        email: "a@b.com".to_string(),
        ..user("u1", Role::User)
    }
}

pub fn grant(user: PortalUser, token: &str) -> ApiResult<AuthGrant> {
    Ok(AuthGrant {
        user,
        token: token.to_string(),
    })
}

pub fn impersonation_grant(
    admin: PortalUser,
    target: PortalUser,
    token: &str,
    expires_at: Option<DateTime<Utc>>,
) -> ApiResult<ImpersonationGrant> {
    Ok(ImpersonationGrant {
        impersonation_token: token.to_string(),
        target_user: target,
        admin_user: admin,
        session_id: "s1".to_string(),
        expires_at,
    })
}

pub fn manager_with(api: &Arc<FakeApi>, store: &Arc<MemoryStore>) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(api.clone(), store.clone()))
}

/// Manager restored from `store` as a fresh process would do it, with its
/// background profile refresh already finished
pub async fn restart(api: &Arc<FakeApi>, store: &Arc<MemoryStore>) -> Arc<SessionManager> {
    let manager = manager_with(api, store);
    if let Some(refresh) = manager.initialize() {
        refresh.await.unwrap();
    }
    manager
}

/// Signed-in admin with token `admin-tok`
pub async fn signed_in_admin(api: &Arc<FakeApi>, store: &Arc<MemoryStore>) -> Arc<SessionManager> {
    let manager = manager_with(api, store);
    let _ = manager.initialize();
    api.push_login(grant(admin(), "admin-tok"));
    manager.login("admin1@example.com", "secret").await.unwrap();
    manager
}
