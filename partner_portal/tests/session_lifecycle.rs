//! Integration tests for the session lifecycle.
//!
//! Covers login, registration, rehydration, profile refresh, logout, the global
//! 401 path and discarding of responses that arrive after the session changed.

mod common;

use common::{FakeApi, admin, grant, manager_with, partner, restart};
use partner_portal::{
    AuthError, AuthOutcome, FileStore, PortalUser, Role, SessionManager, SessionStore,
    api::ApiError,
    guard::{ADMIN_HOME, GuardDecision, LOGIN_PATH, RouteTable, USER_HOME, post_login_target},
    store::{MemoryStore, TOKEN_KEY, USER_KEY},
};
use proptest::prelude::*;
use std::sync::Arc;

fn stored(store: &MemoryStore, key: &str) -> Option<String> {
    store.read(key).unwrap()
}

#[tokio::test]
async fn test_login_establishes_session() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;
    assert!(manager.is_initialized());
    assert!(!manager.is_authenticated());

    api.push_login(grant(partner(), "tok1"));
    let message = manager.login("a@b.com", "x").await.unwrap();

    assert_eq!(message, "Login successful");
    let session = manager.snapshot();
    assert!(session.is_authenticated);
    assert_eq!(session.role(), Some(Role::User));
    assert_eq!(session.token.as_deref(), Some("tok1"));
    assert_eq!(stored(&store, TOKEN_KEY).as_deref(), Some("tok1"));

    let user: PortalUser = serde_json::from_str(&stored(&store, USER_KEY).unwrap()).unwrap();
    assert_eq!(user, partner());
}

#[tokio::test]
async fn test_login_rejected_credentials() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;

    api.push_login(Err(ApiError::Unauthorized));
    let err = manager.login("a@b.com", "wrong").await.unwrap_err();

    assert_eq!(err.client_message(), "Invalid email or password");
    assert!(!manager.is_authenticated());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_login_backend_message_is_surfaced() {
    let api = FakeApi::new();
    let manager = restart(&api, &Arc::new(MemoryStore::new())).await;

    api.push_login(Err(ApiError::Rejected {
        status: Some(403),
        message: "Account disabled".to_string(),
    }));
    let outcome = AuthOutcome::from(manager.login("a@b.com", "x").await);

    assert!(!outcome.success);
    assert_eq!(outcome.message, "Account disabled");
}

#[tokio::test]
async fn test_login_network_failure() {
    let api = FakeApi::new();
    let manager = restart(&api, &Arc::new(MemoryStore::new())).await;

    api.push_login(Err(ApiError::Transport("connection refused".to_string())));
    let err = manager.login("a@b.com", "x").await.unwrap_err();

    assert!(matches!(err, AuthError::Network(_)));
    assert!(!manager.is_authenticated());
}

#[tokio::test]
async fn test_missing_credentials_never_reach_backend() {
    let api = FakeApi::new();
    let manager = restart(&api, &Arc::new(MemoryStore::new())).await;

    let err = manager.login("  ", "x").await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
    let err = manager.login("a@b.com", "").await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));

    assert_eq!(api.call_count("login"), 0);
}

#[tokio::test]
async fn test_login_response_without_token_is_rejected() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;

    api.push_login(grant(partner(), ""));
    let err = manager.login("a@b.com", "x").await.unwrap_err();

    assert!(matches!(err, AuthError::Decode(_)));
    assert!(!manager.is_authenticated());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_register_signs_in() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;

    api.push_register(grant(partner(), "tok-new"));
    let message = manager
        .register("A B", "a@b.com", "secret", "secret")
        .await
        .unwrap();

    assert_eq!(message, "Registration successful");
    assert!(manager.is_authenticated());
    assert_eq!(stored(&store, TOKEN_KEY).as_deref(), Some("tok-new"));
}

#[tokio::test]
async fn test_register_password_mismatch() {
    let api = FakeApi::new();
    let manager = restart(&api, &Arc::new(MemoryStore::new())).await;

    let err = manager
        .register("A B", "a@b.com", "secret", "secreT")
        .await
        .unwrap_err();

    assert_eq!(err.client_message(), "Passwords do not match");
    assert_eq!(api.call_count("register"), 0);
}

#[tokio::test]
async fn test_reload_restores_session() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;
    api.push_login(grant(partner(), "tok1"));
    manager.login("a@b.com", "x").await.unwrap();

    api.push_profile(Ok(partner()));
    let reloaded = restart(&api, &store).await;

    assert!(reloaded.is_initialized());
    assert!(reloaded.is_authenticated());
    assert_eq!(reloaded.current_user(), Some(partner()));
    assert_eq!(reloaded.token().as_deref(), Some("tok1"));
    // Rehydration refreshes the profile in the background
    assert!(api.calls().contains(&"profile tok1".to_string()));
}

#[tokio::test]
async fn test_reload_survives_unreachable_backend() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;
    api.push_login(grant(partner(), "tok1"));
    manager.login("a@b.com", "x").await.unwrap();

    // No scripted profile response: the background refresh fails with a transport error
    let reloaded = restart(&api, &store).await;

    assert!(reloaded.is_authenticated());
    assert_eq!(reloaded.token().as_deref(), Some("tok1"));
}

#[tokio::test]
async fn test_initialize_runs_once() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = manager_with(&api, &store);

    assert!(manager.initialize().is_none());
    api.push_login(grant(partner(), "tok1"));
    manager.login("a@b.com", "x").await.unwrap();

    // A second call must not rehydrate over the live session
    assert!(manager.initialize().is_none());
    assert!(manager.is_authenticated());
    assert_eq!(api.call_count("profile"), 0);
}

#[tokio::test]
async fn test_logout_clears_everything() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;
    api.push_login(grant(partner(), "tok1"));
    manager.login("a@b.com", "x").await.unwrap();

    manager.logout();
    manager.logout();

    let session = manager.snapshot();
    assert!(!session.is_authenticated);
    assert!(session.current_user.is_none());
    assert!(session.token.is_none());
    assert!(session.is_initialized);
    assert!(store.is_empty());

    let reloaded = restart(&api, &store).await;
    assert!(!reloaded.is_authenticated());
    assert!(reloaded.is_initialized());
}

#[tokio::test]
async fn test_corrupted_storage_is_discarded() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    store.write(TOKEN_KEY, "tok1").unwrap();
    store.write(USER_KEY, "{not json").unwrap();

    let manager = restart(&api, &store).await;

    assert!(manager.is_initialized());
    assert!(!manager.is_authenticated());
    assert!(store.is_empty());
    assert_eq!(api.call_count("profile"), 0);
}

#[tokio::test]
async fn test_token_without_user_is_discarded() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    store.write(TOKEN_KEY, "tok1").unwrap();

    let manager = restart(&api, &store).await;

    assert!(!manager.is_authenticated());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_refresh_updates_user_only() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;
    api.push_login(grant(partner(), "tok1"));
    manager.login("a@b.com", "x").await.unwrap();

    let renamed = PortalUser {
        full_name: "Alice B".to_string(),
        compensation_link: Some("https://pay.example.com/u1".to_string()),
        ..partner()
    };
    api.push_profile(Ok(renamed.clone()));
    let user = manager.refresh_profile().await.unwrap();

    assert_eq!(user, renamed);
    assert_eq!(manager.current_user(), Some(renamed.clone()));
    assert_eq!(manager.token().as_deref(), Some("tok1"));

    let persisted: PortalUser = serde_json::from_str(&stored(&store, USER_KEY).unwrap()).unwrap();
    assert_eq!(persisted, renamed);
}

#[tokio::test]
async fn test_refresh_unauthorized_logs_out() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;
    api.push_login(grant(partner(), "tok1"));
    manager.login("a@b.com", "x").await.unwrap();

    api.push_profile(Err(ApiError::Unauthorized));
    let err = manager.refresh_profile().await.unwrap_err();

    assert!(err.is_unauthorized());
    assert!(!manager.is_authenticated());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_refresh_transient_failure_keeps_session() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;
    api.push_login(grant(partner(), "tok1"));
    manager.login("a@b.com", "x").await.unwrap();

    api.push_profile(Err(ApiError::Transport("timed out".to_string())));
    let err = manager.refresh_profile().await.unwrap_err();

    assert!(matches!(err, AuthError::Network(_)));
    assert!(manager.is_authenticated());
    assert_eq!(manager.current_user(), Some(partner()));
    assert_eq!(stored(&store, TOKEN_KEY).as_deref(), Some("tok1"));
}

#[tokio::test]
async fn test_refresh_requires_session() {
    let api = FakeApi::new();
    let manager = restart(&api, &Arc::new(MemoryStore::new())).await;

    let err = manager.refresh_profile().await.unwrap_err();
    assert!(matches!(err, AuthError::NotAuthenticated));
    assert_eq!(api.call_count("profile"), 0);
}

#[tokio::test]
async fn test_stale_profile_is_discarded_after_logout() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;
    api.push_login(grant(partner(), "tok1"));
    manager.login("a@b.com", "x").await.unwrap();

    let gate = api.hold();
    let refreshing = Arc::clone(&manager);
    let refresh = tokio::spawn(async move { refreshing.refresh_profile().await });
    while api.call_count("profile") == 0 {
        tokio::task::yield_now().await;
    }

    manager.logout();
    api.push_profile(Ok(partner()));
    gate.notify_one();

    let result = refresh.await.unwrap();
    assert!(matches!(result, Err(AuthError::SessionChanged)));
    assert!(!manager.is_authenticated());
    assert!(manager.current_user().is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_stale_profile_is_discarded_after_relogin() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;
    api.push_login(grant(partner(), "tok1"));
    manager.login("a@b.com", "x").await.unwrap();

    let gate = api.hold();
    let refreshing = Arc::clone(&manager);
    let refresh = tokio::spawn(async move { refreshing.refresh_profile().await });
    while api.call_count("profile") == 0 {
        tokio::task::yield_now().await;
    }

    manager.logout();
    api.push_login(grant(admin(), "admin-tok"));
    manager.login("admin1@example.com", "x").await.unwrap();

    // The partner profile arrives for a session that no longer exists
    api.push_profile(Ok(partner()));
    gate.notify_one();

    assert!(matches!(refresh.await.unwrap(), Err(AuthError::SessionChanged)));
    assert_eq!(manager.current_user(), Some(admin()));
}

#[tokio::test]
async fn test_global_unauthorized_path() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let manager = restart(&api, &store).await;
    api.push_login(grant(partner(), "tok1"));
    manager.login("a@b.com", "x").await.unwrap();

    manager.handle_unauthorized();

    assert!(!manager.is_authenticated());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_guards_follow_the_session() {
    let api = FakeApi::new();
    let store = Arc::new(MemoryStore::new());
    let routes = RouteTable::portal();
    let manager = manager_with(&api, &store);

    assert_eq!(routes.check(&manager.snapshot(), "/admin"), GuardDecision::Pending);

    let _ = manager.initialize();
    let anonymous = routes.check(&manager.snapshot(), "/dashboard");
    assert_eq!(anonymous.redirect_target(), Some(LOGIN_PATH));

    api.push_login(grant(partner(), "tok1"));
    manager.login("a@b.com", "x").await.unwrap();
    let session = manager.snapshot();

    assert!(routes.check(&session, "/dashboard").is_allowed());
    // Wrong role goes to the role's own landing page, never to login
    assert_eq!(routes.check(&session, "/admin/users").redirect_target(), Some(USER_HOME));
    assert_eq!(routes.check(&session, "/login").redirect_target(), Some(USER_HOME));
    assert_eq!(post_login_target(&routes, &session, Some("/compensation")), "/compensation");
    assert_eq!(post_login_target(&routes, &session, Some("/admin")), USER_HOME);

    manager.logout();
    api.push_login(grant(admin(), "admin-tok"));
    manager.login("admin1@example.com", "x").await.unwrap();
    assert_eq!(routes.check(&manager.snapshot(), "/login").redirect_target(), Some(ADMIN_HOME));
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let api = FakeApi::new();

    let first = Arc::new(SessionManager::new(api.clone(), Arc::new(FileStore::new(&path))));
    let _ = first.initialize();
    api.push_login(grant(partner(), "tok1"));
    first.login("a@b.com", "x").await.unwrap();
    assert!(path.exists());

    api.push_profile(Ok(partner()));
    let second = Arc::new(SessionManager::new(api.clone(), Arc::new(FileStore::new(&path))));
    if let Some(refresh) = second.initialize() {
        refresh.await.unwrap();
    }
    assert!(second.is_authenticated());
    assert_eq!(second.token().as_deref(), Some("tok1"));

    second.logout();
    assert!(!path.exists());
}

fn user_strategy() -> impl Strategy<Value = PortalUser> {
    (
        "[a-z0-9]{1,16}",
        "[A-Za-z ]{0,24}",
        "[a-z]{1,8}@[a-z]{1,8}\\.com",
        prop_oneof![Just(Role::Admin), Just(Role::User), Just(Role::Contact)],
    )
        .prop_map(|(uuid, full_name, email, role)| PortalUser {
            uuid,
            full_name,
            email,
            role,
            partner_id: None,
            compensation_link: None,
            created_at: None,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever identity a login establishes is exactly what a reload restores
    #[test]
    fn prop_login_then_reload_restores_identity(
        user in user_strategy(),
        token in "[A-Za-z0-9._-]{1,48}",
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (restored_user, restored_token) = runtime.block_on(async {
            let api = FakeApi::new();
            let store = Arc::new(MemoryStore::new());
            let manager = restart(&api, &store).await;
            api.push_login(grant(user.clone(), &token));
            manager.login(&user.email, "pw").await.unwrap();

            api.push_profile(Ok(user.clone()));
            let reloaded = restart(&api, &store).await;
            (reloaded.current_user(), reloaded.token())
        });

        prop_assert_eq!(restored_user, Some(user));
        prop_assert_eq!(restored_token, Some(token));
    }
}
