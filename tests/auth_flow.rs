//! End-to-end flows against an in-process credential worker.
//!
//! The real axum router is served on an ephemeral port with a temporary
//! SQLite store; the real client, session manager, and orchestrator run
//! against it.

use authdesk::auth::{AuthClient, AuthService};
use authdesk::config::Config;
use authdesk::gateway::store::CredentialStore;
use authdesk::gateway::{router, AppState};
use std::sync::Arc;
use tempfile::TempDir;

/// Serve a fresh worker, returning its base URL.
async fn spawn_worker(dir: &TempDir) -> String {
    let store = Arc::new(
        CredentialStore::open(&dir.path().join("users.db"), 1800, 3600).unwrap(),
    );
    let app = router(AppState::new(store, true));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn test_config(dir: &TempDir, base_url: &str) -> Config {
    let mut config = Config::default();
    config.data_dir = dir.path().join("client");
    config.api.base_url = base_url.to_string();
    config.network.timeout_secs = 5;
    config.network.max_retries = 1;
    config.network.retry_delay_ms = 50;
    config
}

#[tokio::test]
async fn register_then_login_yields_tokens() {
    let dir = TempDir::new().unwrap();
    let base_url = spawn_worker(&dir).await;
    let config = test_config(&dir, &base_url);
    let service = AuthService::new(&config).unwrap();

    let registered = service
        .register("alice", "alice@example.com", "Passw0rd!1", "Passw0rd!1")
        .await;
    assert!(registered.success, "register failed: {}", registered.message);
    let user = registered.user.expect("registration returns the user");
    assert_eq!(user.username.as_deref(), Some("alice"));
    assert!(user.is_active);

    let logged_in = service.login("alice", "Passw0rd!1", false).await;
    assert!(logged_in.success, "login failed: {}", logged_in.message);
    assert!(logged_in
        .access_token
        .as_deref()
        .is_some_and(|t| !t.is_empty()));
    assert!(logged_in.refresh_token.is_some());
    assert_eq!(logged_in.expires_in, Some(1800));
    assert!(service.is_logged_in());
    assert_eq!(
        service.current_user().and_then(|u| u.username).as_deref(),
        Some("alice")
    );
}

#[tokio::test]
async fn login_by_email_works_too() {
    let dir = TempDir::new().unwrap();
    let base_url = spawn_worker(&dir).await;
    let config = test_config(&dir, &base_url);
    let service = AuthService::new(&config).unwrap();

    service
        .register("alice", "alice@example.com", "Passw0rd!1", "Passw0rd!1")
        .await;
    let logged_in = service.login("alice@example.com", "Passw0rd!1", false).await;
    assert!(logged_in.success);
}

#[tokio::test]
async fn wrong_password_failure_is_indistinguishable_from_unknown_user() {
    let dir = TempDir::new().unwrap();
    let base_url = spawn_worker(&dir).await;
    let config = test_config(&dir, &base_url);
    let service = AuthService::new(&config).unwrap();

    service
        .register("alice", "alice@example.com", "Passw0rd!1", "Passw0rd!1")
        .await;

    let wrong_password = service.login("alice", "wrongpassword1", false).await;
    let unknown_user = service.login("charlie", "wrongpassword1", false).await;

    assert!(!wrong_password.success);
    assert!(!unknown_user.success);
    assert_eq!(wrong_password.message, unknown_user.message);
    assert!(!wrong_password.message.to_lowercase().contains("exist"));
    assert!(!service.is_logged_in());
}

#[tokio::test]
async fn forgot_password_response_shape_never_reveals_accounts() {
    let dir = TempDir::new().unwrap();
    let base_url = spawn_worker(&dir).await;
    let config = test_config(&dir, &base_url);
    let service = AuthService::new(&config).unwrap();

    service
        .register("alice", "alice@example.com", "Passw0rd!1", "Passw0rd!1")
        .await;

    let known = service.forgot_password("alice@example.com").await;
    let unknown = service.forgot_password("nonexistent@example.com").await;

    assert!(known.success);
    assert!(unknown.success);
    assert_eq!(known.message, unknown.message);
}

#[tokio::test]
async fn remembered_session_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    let base_url = spawn_worker(&dir).await;
    let config = test_config(&dir, &base_url);

    // First run: sign in with remember-me.
    {
        let service = AuthService::new(&config).unwrap();
        service
            .register("alice", "alice@example.com", "Passw0rd!1", "Passw0rd!1")
            .await;
        let logged_in = service.login("alice", "Passw0rd!1", true).await;
        assert!(logged_in.success);
        assert!(config.session_file().exists());
    }

    // Second run: the session restores through worker verification.
    let (service, restored) = AuthService::bootstrap(&config).await.unwrap();
    assert!(restored, "persisted session should restore");
    assert!(service.is_logged_in());
    assert_eq!(
        service.current_user().and_then(|u| u.username).as_deref(),
        Some("alice")
    );

    // Logout tears everything down, including the file.
    let logout = service.logout().await;
    assert!(logout.success);
    assert!(!service.is_logged_in());
    assert!(!config.session_file().exists());

    let (_, restored_again) = AuthService::bootstrap(&config).await.unwrap();
    assert!(!restored_again);
}

#[tokio::test]
async fn transient_sessions_do_not_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let base_url = spawn_worker(&dir).await;
    let config = test_config(&dir, &base_url);

    {
        let service = AuthService::new(&config).unwrap();
        service
            .register("alice", "alice@example.com", "Passw0rd!1", "Passw0rd!1")
            .await;
        assert!(service.login("alice", "Passw0rd!1", false).await.success);
        assert!(!config.session_file().exists());
    }

    let (_, restored) = AuthService::bootstrap(&config).await.unwrap();
    assert!(!restored);
}

#[tokio::test]
async fn verify_and_refresh_flow_via_client() {
    let dir = TempDir::new().unwrap();
    let base_url = spawn_worker(&dir).await;
    let config = test_config(&dir, &base_url);
    let client = AuthClient::new(&config).unwrap();

    client
        .register(&authdesk::auth::RegisterRequest {
            username: "alice".into(),
            email: "alice@example.com".into(),
            password: "Passw0rd!1".into(),
            confirm_password: "Passw0rd!1".into(),
        })
        .await;
    let login = client
        .login(&authdesk::auth::LoginRequest {
            username_or_email: "alice".into(),
            password: "Passw0rd!1".into(),
            remember_me: false,
        })
        .await;
    assert!(login.success);

    // Held token verifies.
    let verified = client.verify_token(None).await;
    assert!(verified.success);
    assert_eq!(
        verified.user.and_then(|u| u.username).as_deref(),
        Some("alice")
    );

    // Refresh rotates the pair; the old access token dies with it.
    let old_access = client.access_token().unwrap();
    let refreshed = client.refresh_access_token().await;
    assert!(refreshed.success);
    assert_ne!(client.access_token().unwrap(), old_access);
    assert!(!client.verify_token(Some(&old_access)).await.success);
    assert!(client.verify_token(None).await.success);

    // Garbage tokens are cleanly rejected.
    assert!(!client.verify_token(Some("garbage")).await.success);
}

#[tokio::test]
async fn password_reset_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        CredentialStore::open(&dir.path().join("users.db"), 1800, 3600).unwrap(),
    );
    let app = router(AppState::new(Arc::clone(&store), true));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let config = test_config(&dir, &format!("http://{addr}"));
    let service = AuthService::new(&config).unwrap();

    service
        .register("alice", "alice@example.com", "Passw0rd!1", "Passw0rd!1")
        .await;
    assert!(service.forgot_password("alice@example.com").await.success);

    // The worker would deliver this by email; pull it from the store.
    let token = store
        .create_reset_token("alice@example.com")
        .unwrap()
        .expect("account exists");

    let reset = service.reset_password(&token, "Fresh0Pass!").await;
    assert!(reset.success, "reset failed: {}", reset.message);

    assert!(!service.login("alice", "Passw0rd!1", false).await.success);
    assert!(service.login("alice", "Fresh0Pass!", false).await.success);

    // The token was consumed by the successful reset.
    let again = service.reset_password(&token, "Another1Pw!").await;
    assert!(!again.success);
}

#[tokio::test]
async fn change_password_round_trip() {
    let dir = TempDir::new().unwrap();
    let base_url = spawn_worker(&dir).await;
    let config = test_config(&dir, &base_url);
    let service = AuthService::new(&config).unwrap();

    service
        .register("alice", "alice@example.com", "Passw0rd!1", "Passw0rd!1")
        .await;
    assert!(service.login("alice", "Passw0rd!1", false).await.success);

    let changed = service
        .change_password("Passw0rd!1", "Brand2New!", "Brand2New!")
        .await;
    assert!(changed.success, "change failed: {}", changed.message);

    assert!(service.logout().await.success);
    assert!(service.login("alice", "Brand2New!", false).await.success);
}
