//! Auth orchestrator: the single entry point UI surfaces talk to.
//!
//! Each public operation validates input locally, delegates to the gateway
//! client, updates the session manager, and broadcasts an [`AuthEvent`].
//! Events fire only after the triggering state change is fully committed.
//! Nothing here returns an error to the caller; failures become failure
//! responses plus a failure event.
//!
//! Token refresh runs on two tiers: an eager refresh scheduled here after
//! every login (default every 25 minutes), and the session manager's
//! reactive expiry check as fallback.

use crate::auth::client::AuthClient;
use crate::auth::types::{AuthResponse, LoginRequest, RegisterRequest, User};
use crate::auth::validator::AuthValidator;
use crate::config::Config;
use crate::session::SessionManager;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Notifications for UI consumers, emitted after state changes commit.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    LoginSucceeded(User),
    LoginFailed(String),
    RegistrationSucceeded(String),
    RegistrationFailed(String),
    LoggedOut,
    PasswordChanged,
    PasswordChangeFailed(String),
}

struct ServiceInner {
    client: Arc<AuthClient>,
    session: SessionManager,
    validator: AuthValidator,
    events: broadcast::Sender<AuthEvent>,
    auto_refresh_interval: Duration,
    auto_refresh: Mutex<Option<JoinHandle<()>>>,
}

/// Orchestrates validation, network calls, and session state.
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AuthService {
    inner: Arc<ServiceInner>,
}

impl AuthService {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Arc::new(AuthClient::new(config)?);
        let session = SessionManager::new(config, Arc::clone(&client));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(ServiceInner {
                client,
                session,
                validator: AuthValidator::new(),
                events,
                auto_refresh_interval: Duration::from_secs(
                    config.auth.auto_refresh_interval_secs,
                ),
                auto_refresh: Mutex::new(None),
            }),
        })
    }

    /// Construct the service and attempt the automatic login once.
    /// Returns the service and whether a persisted session was restored.
    pub async fn bootstrap(config: &Config) -> anyhow::Result<(Self, bool)> {
        let service = Self::new(config)?;
        let restored = service.try_auto_login().await;
        if restored {
            tracing::info!("automatic login succeeded");
        } else {
            tracing::debug!("no session to restore");
        }
        Ok((service, restored))
    }

    /// Subscribe to orchestrator notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// The session manager backing this service (session events live there).
    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    // ── Operations ──────────────────────────────────────────────────

    pub async fn login(&self, username: &str, password: &str, remember_me: bool) -> AuthResponse {
        if let Err(e) = self
            .inner
            .validator
            .validate_login_input(username, password)
        {
            let message = e.user_message();
            self.emit(AuthEvent::LoginFailed(message.clone()));
            return AuthResponse::failure(message);
        }

        let request = LoginRequest {
            username_or_email: username.trim().to_string(),
            password: password.to_string(),
            remember_me,
        };
        let response = self.inner.client.login(&request).await;

        if !response.success {
            self.emit(AuthEvent::LoginFailed(response.message.clone()));
            return response;
        }

        let (Some(user), Some(access)) = (response.user.clone(), response.access_token.clone())
        else {
            let message = "login response was incomplete".to_string();
            tracing::warn!("{message}");
            self.emit(AuthEvent::LoginFailed(message.clone()));
            return AuthResponse::failure(message);
        };

        self.inner.session.start_session(
            user.clone(),
            access,
            response.refresh_token.clone().unwrap_or_default(),
            remember_me,
        );
        self.schedule_auto_refresh();
        self.emit(AuthEvent::LoginSucceeded(user));
        response
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> AuthResponse {
        if let Err(e) =
            self.inner
                .validator
                .validate_register_input(username, email, password, confirm_password)
        {
            let message = e.user_message();
            self.emit(AuthEvent::RegistrationFailed(message.clone()));
            return AuthResponse::failure(message);
        }

        let request = RegisterRequest {
            username: username.trim().to_string(),
            email: email.trim().to_lowercase(),
            password: password.to_string(),
            confirm_password: confirm_password.to_string(),
        };
        let response = self.inner.client.register(&request).await;

        if response.success {
            self.emit(AuthEvent::RegistrationSucceeded(response.message.clone()));
        } else {
            self.emit(AuthEvent::RegistrationFailed(response.message.clone()));
        }
        response
    }

    /// Log out. The remote call is best-effort; local state is always
    /// cleared, and the operation always reports success.
    pub async fn logout(&self) -> AuthResponse {
        self.cancel_auto_refresh();
        let response = self.inner.client.logout().await;
        self.inner.session.end_session();
        self.emit(AuthEvent::LoggedOut);
        response
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.session.is_active()
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.session.current_user()
    }

    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> AuthResponse {
        if !self.is_logged_in() {
            return AuthResponse::failure("not logged in");
        }
        if let Err(e) = self.inner.validator.validate_password_change(
            old_password,
            new_password,
            confirm_password,
        ) {
            let message = e.user_message();
            self.emit(AuthEvent::PasswordChangeFailed(message.clone()));
            return AuthResponse::failure(message);
        }

        let response = self
            .inner
            .client
            .change_password(old_password, new_password)
            .await;
        if response.success {
            self.emit(AuthEvent::PasswordChanged);
        } else {
            self.emit(AuthEvent::PasswordChangeFailed(response.message.clone()));
        }
        response
    }

    pub async fn forgot_password(&self, email: &str) -> AuthResponse {
        if let Err(e) = self.inner.validator.validate_email(email) {
            return AuthResponse::failure(e.user_message());
        }
        self.inner.client.forgot_password(email).await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResponse {
        if let Err(e) = self.inner.validator.validate_password(new_password) {
            return AuthResponse::failure(e.user_message());
        }
        self.inner.client.reset_password(token, new_password).await
    }

    /// Attempt to restore a persisted session. Any failure collapses to
    /// `false`; this never raises.
    pub async fn try_auto_login(&self) -> bool {
        let restored = self.inner.session.restore_session().await;
        if restored {
            self.schedule_auto_refresh();
        }
        restored
    }

    // ── Eager token refresh ─────────────────────────────────────────

    fn schedule_auto_refresh(&self) {
        let mut slot = self.inner.auto_refresh.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
        }

        let service = self.clone();
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(service.inner.auto_refresh_interval);
            interval.tick().await; // the first tick fires immediately
            loop {
                interval.tick().await;
                service.refresh_tokens().await;
            }
        }));
    }

    fn cancel_auto_refresh(&self) {
        if let Some(handle) = self.inner.auto_refresh.lock().take() {
            handle.abort();
        }
    }

    async fn refresh_tokens(&self) {
        if !self.inner.session.is_active() {
            return;
        }
        let response = self.inner.client.refresh_access_token().await;
        match response.access_token.filter(|_| response.success) {
            Some(access) => {
                self.inner
                    .session
                    .update_tokens(access, response.refresh_token);
                tracing::debug!("eager token refresh succeeded");
            }
            None => tracing::warn!(
                "eager token refresh failed ({}); the reactive expiry check remains",
                response.message
            ),
        }
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.inner.events.send(event);
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        // Unroutable host: any network use in these tests is a bug or an
        // expected failure path.
        config.api.base_url = "http://127.0.0.1:9".into();
        config.network.max_retries = 0;
        config.network.retry_delay_ms = 10;
        config.network.timeout_secs = 1;
        config
    }

    fn sample_user() -> User {
        User {
            id: Some(1),
            username: Some("alice".into()),
            email: Some("alice@example.com".into()),
            ..User::default()
        }
    }

    #[tokio::test]
    async fn login_rejects_invalid_input_before_any_network_call() {
        let dir = TempDir::new().unwrap();
        let service = AuthService::new(&test_config(&dir)).unwrap();
        let mut events = service.subscribe();

        let resp = service.login("ab", "secret1", false).await;
        assert!(!resp.success);
        assert!(resp.message.contains("3 characters"));
        assert!(matches!(events.try_recv(), Ok(AuthEvent::LoginFailed(_))));
    }

    #[tokio::test]
    async fn register_rejects_mismatched_confirmation() {
        let dir = TempDir::new().unwrap();
        let service = AuthService::new(&test_config(&dir)).unwrap();
        let mut events = service.subscribe();

        let resp = service
            .register("alice", "alice@example.com", "Passw0rd", "Different1")
            .await;
        assert!(!resp.success);
        assert!(matches!(
            events.try_recv(),
            Ok(AuthEvent::RegistrationFailed(_))
        ));
    }

    #[tokio::test]
    async fn logout_clears_local_state_even_when_remote_call_fails() {
        let dir = TempDir::new().unwrap();
        let service = AuthService::new(&test_config(&dir)).unwrap();

        service
            .session()
            .start_session(sample_user(), "acc".into(), "ref".into(), false);
        assert!(service.is_logged_in());

        let resp = service.logout().await;
        assert!(resp.success);
        assert!(!service.is_logged_in());
        assert!(service.current_user().is_none());
    }

    #[tokio::test]
    async fn change_password_requires_login() {
        let dir = TempDir::new().unwrap();
        let service = AuthService::new(&test_config(&dir)).unwrap();

        let resp = service
            .change_password("oldpass1", "newpass1", "newpass1")
            .await;
        assert!(!resp.success);
        assert!(resp.message.contains("not logged in"));
    }

    #[tokio::test]
    async fn forgot_password_validates_email_locally() {
        let dir = TempDir::new().unwrap();
        let service = AuthService::new(&test_config(&dir)).unwrap();

        let resp = service.forgot_password("nope").await;
        assert!(!resp.success);
    }

    #[tokio::test]
    async fn reset_password_validates_new_password_locally() {
        let dir = TempDir::new().unwrap();
        let service = AuthService::new(&test_config(&dir)).unwrap();

        let resp = service.reset_password("token", "short").await;
        assert!(!resp.success);
    }

    #[tokio::test]
    async fn bootstrap_without_persisted_session_reports_no_restore() {
        let dir = TempDir::new().unwrap();
        let (service, restored) = AuthService::bootstrap(&test_config(&dir)).await.unwrap();
        assert!(!restored);
        assert!(!service.is_logged_in());
    }
}
