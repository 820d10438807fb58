//! HTTP client for the credential worker API.
//!
//! Every public operation returns an [`AuthResponse`]; expected failure
//! modes (unreachable host, rejected credentials, malformed bodies) are
//! folded into `success == false` rather than surfaced as errors.
//!
//! ## Retry policy
//! Transport failures (connect, timeout, dropped connection) are retried up
//! to `max_retries` with a linearly growing delay of `retry_delay × attempt`.
//! HTTP status errors and JSON decode failures are terminal: the server
//! answered, retrying would not change the outcome.

use crate::auth::error::AuthError;
use crate::auth::types::{AuthResponse, LoginRequest, RegisterRequest, User};
use crate::auth::validator::AuthValidator;
use crate::config::Config;
use parking_lot::RwLock;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// The access/refresh pair currently held by the client.
#[derive(Debug, Clone, Default)]
struct TokenPair {
    access: Option<String>,
    refresh: Option<String>,
}

/// Client for the credential worker's HTTP API.
pub struct AuthClient {
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
    http: reqwest::Client,
    validator: AuthValidator,
    tokens: RwLock<TokenPair>,
}

impl AuthClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::with_settings(
            config.api.base_url.clone(),
            Duration::from_secs(config.network.timeout_secs),
            config.network.max_retries,
            Duration::from_millis(config.network.retry_delay_ms),
        )
    }

    pub fn with_settings(
        base_url: String,
        timeout: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            max_retries,
            retry_delay,
            http,
            validator: AuthValidator::new(),
            tokens: RwLock::new(TokenPair::default()),
        })
    }

    // ── Token state ─────────────────────────────────────────────────

    pub fn access_token(&self) -> Option<String> {
        self.tokens.read().access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.tokens.read().refresh.clone()
    }

    /// Replace the held token pair. `None` clears the corresponding slot.
    pub fn set_tokens(&self, access: Option<String>, refresh: Option<String>) {
        let mut tokens = self.tokens.write();
        tokens.access = access;
        tokens.refresh = refresh;
    }

    pub fn clear_tokens(&self) {
        *self.tokens.write() = TokenPair::default();
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.read().access.is_some()
    }

    // ── Request plumbing ────────────────────────────────────────────

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Issue one logical request, retrying transport failures.
    /// Returns the status and parsed JSON body, or a terminal error.
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<(StatusCode, Value), AuthError> {
        let url = self.endpoint_url(endpoint);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let mut request = self.http.request(method.clone(), &url);
            if let Some(payload) = body {
                request = request.json(payload);
            }
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let value: Value = match response.json().await {
                        Ok(v) => v,
                        Err(e) if status.is_success() => {
                            return Err(AuthError::Protocol {
                                status: status.as_u16(),
                                message: format!("malformed response body: {e}"),
                            });
                        }
                        // Error bodies are allowed to be empty or non-JSON.
                        Err(_) => Value::Object(serde_json::Map::new()),
                    };

                    if status.is_client_error() || status.is_server_error() {
                        let message = error_message(&value, &format!("HTTP {}", status.as_u16()));
                        tracing::warn!(%url, status = status.as_u16(), "request rejected: {message}");
                        return Err(AuthError::Protocol {
                            status: status.as_u16(),
                            message,
                        });
                    }

                    tracing::debug!(%url, status = status.as_u16(), "request succeeded");
                    return Ok((status, value));
                }
                Err(e) => {
                    if attempt > self.max_retries {
                        tracing::error!(%url, attempts = attempt, "request failed: {e}");
                        return Err(AuthError::Network(format!(
                            "request failed after {attempt} attempts: {e}"
                        )));
                    }
                    tracing::warn!(%url, attempt, "transport error: {e} — retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
            }
        }
    }

    // ── Operations ──────────────────────────────────────────────────

    /// POST /login. On success the returned tokens are also held by the
    /// client for subsequent authenticated calls.
    pub async fn login(&self, request: &LoginRequest) -> AuthResponse {
        tracing::info!(user = %request.username_or_email, "attempting login");

        let payload = json!({
            "username": request.username_or_email,
            "password": request.password,
            "rememberMe": request.remember_me,
        });

        match self.request(Method::POST, "/login", Some(&payload), None).await {
            Ok((status, body)) if status == StatusCode::OK && body.get("user").is_some() => {
                let user = parse_user(&body);
                // Older worker builds call the access token `sessionToken`.
                let access = string_field(&body, "sessionToken")
                    .or_else(|| string_field(&body, "accessToken"));
                let refresh = string_field(&body, "refreshToken");
                self.set_tokens(access.clone(), refresh.clone());

                tracing::info!(user = %request.username_or_email, "login succeeded");
                AuthResponse::ok(message_or(&body, "login succeeded"))
                    .with_user(user)
                    .with_tokens(access, refresh, u64_field(&body, "expiresIn"))
            }
            Ok((_, body)) => {
                let message = error_message(&body, "login failed");
                tracing::warn!(user = %request.username_or_email, "login failed: {message}");
                AuthResponse::failure(message)
            }
            Err(e) => AuthResponse::failure(e.user_message()),
        }
    }

    /// POST /register. Accepts 200 or 201 with an explicit `success` flag.
    pub async fn register(&self, request: &RegisterRequest) -> AuthResponse {
        tracing::info!(user = %request.username, "attempting registration");

        let payload = json!({
            "username": request.username,
            "email": request.email,
            "password": request.password,
        });

        match self.request(Method::POST, "/register", Some(&payload), None).await {
            Ok((status, body))
                if (status == StatusCode::OK || status == StatusCode::CREATED)
                    && bool_field(&body, "success") =>
            {
                let user = parse_user(&body);
                let access = string_field(&body, "accessToken");
                let refresh = string_field(&body, "refreshToken");
                if access.is_some() {
                    self.set_tokens(access.clone(), refresh.clone());
                }

                tracing::info!(user = %request.username, "registration succeeded");
                AuthResponse::ok(message_or(&body, "registration succeeded"))
                    .with_user(user)
                    .with_tokens(access, refresh, u64_field(&body, "expiresIn"))
            }
            Ok((_, body)) => AuthResponse::failure(error_message(&body, "registration failed")),
            Err(e) => AuthResponse::failure(e.user_message()),
        }
    }

    /// GET /api/auth/verify with a bearer token. Uses the held access token
    /// when none is supplied. Absent or rejected tokens are a plain failure.
    pub async fn verify_token(&self, token: Option<&str>) -> AuthResponse {
        let token = match token.map(ToOwned::to_owned).or_else(|| self.access_token()) {
            Some(t) => t,
            None => return AuthResponse::failure("no token to verify"),
        };

        match self
            .request(Method::GET, "/api/auth/verify", None, Some(&token))
            .await
        {
            Ok((status, body)) if status == StatusCode::OK && bool_field(&body, "success") => {
                AuthResponse::ok(message_or(&body, "token is valid")).with_user(parse_user(&body))
            }
            Ok((_, body)) => AuthResponse::failure(error_message(&body, "token is invalid")),
            Err(e) => {
                tracing::debug!("token verification failed: {e}");
                AuthResponse::failure("token verification failed")
            }
        }
    }

    /// POST /api/auth/refresh with the held refresh token. On success the
    /// held pair is updated (the refresh token only when the worker rotates
    /// it).
    pub async fn refresh_access_token(&self) -> AuthResponse {
        let refresh = match self.refresh_token() {
            Some(t) => t,
            None => return AuthResponse::failure("no refresh token"),
        };

        let payload = json!({ "refreshToken": refresh });
        match self
            .request(Method::POST, "/api/auth/refresh", Some(&payload), None)
            .await
        {
            Ok((status, body)) if status == StatusCode::OK && bool_field(&body, "success") => {
                let access = string_field(&body, "accessToken");
                let new_refresh = string_field(&body, "refreshToken").or(Some(refresh));
                self.set_tokens(access.clone(), new_refresh.clone());

                tracing::debug!("access token refreshed");
                AuthResponse::ok(message_or(&body, "token refreshed")).with_tokens(
                    access,
                    new_refresh,
                    u64_field(&body, "expiresIn"),
                )
            }
            Ok((_, body)) => AuthResponse::failure(error_message(&body, "token refresh failed")),
            Err(e) => {
                tracing::warn!("token refresh failed: {e}");
                AuthResponse::failure("token refresh failed")
            }
        }
    }

    /// POST /api/auth/logout. Always reports success and always clears the
    /// held tokens; a dead network must not keep a user logged in locally.
    pub async fn logout(&self) -> AuthResponse {
        let access = match self.access_token() {
            Some(t) => t,
            None => return AuthResponse::ok("already logged out"),
        };

        let message = match self
            .request(Method::POST, "/api/auth/logout", None, Some(&access))
            .await
        {
            Ok((_, body)) => message_or(&body, "logged out"),
            Err(e) => {
                tracing::warn!("remote logout failed, clearing local tokens anyway: {e}");
                "logged out (local clear)".to_string()
            }
        };

        self.clear_tokens();
        tracing::info!("logged out");
        AuthResponse::ok(message)
    }

    /// POST /forgot-password. The worker answers with the same generic
    /// message whether or not the account exists.
    pub async fn forgot_password(&self, email: &str) -> AuthResponse {
        if let Err(e) = self.validator.validate_email(email) {
            return AuthResponse::failure(e.user_message());
        }

        let payload = json!({ "email": email.trim().to_lowercase() });
        match self
            .request(Method::POST, "/forgot-password", Some(&payload), None)
            .await
        {
            Ok((status, body)) if status == StatusCode::OK => {
                AuthResponse::ok(message_or(&body, "reset email sent"))
            }
            Ok((_, body)) => {
                AuthResponse::failure(error_message(&body, "password reset request failed"))
            }
            Err(e) => AuthResponse::failure(e.user_message()),
        }
    }

    /// POST /reset-password with a token from the reset email.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResponse {
        if token.trim().is_empty() {
            return AuthResponse::failure("please enter a reset token");
        }
        if new_password.len() < 6 {
            return AuthResponse::failure("password must be at least 6 characters");
        }

        let payload = json!({ "token": token, "newPassword": new_password });
        match self
            .request(Method::POST, "/reset-password", Some(&payload), None)
            .await
        {
            Ok((status, body)) if status == StatusCode::OK => {
                AuthResponse::ok(message_or(&body, "password reset"))
            }
            Ok((_, body)) => AuthResponse::failure(error_message(&body, "password reset failed")),
            Err(e) => AuthResponse::failure(e.user_message()),
        }
    }

    /// POST /api/auth/change-password for the logged-in user.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> AuthResponse {
        let access = match self.access_token() {
            Some(t) => t,
            None => return AuthResponse::failure("not logged in"),
        };

        let payload = json!({ "oldPassword": old_password, "newPassword": new_password });
        match self
            .request(
                Method::POST,
                "/api/auth/change-password",
                Some(&payload),
                Some(&access),
            )
            .await
        {
            Ok((status, body)) if status == StatusCode::OK => {
                AuthResponse::ok(message_or(&body, "password changed"))
            }
            Ok((_, body)) => AuthResponse::failure(error_message(&body, "password change failed")),
            Err(e) => AuthResponse::failure(e.user_message()),
        }
    }

    /// GET /status — worker diagnostics, shown by the CLI.
    pub async fn service_status(&self) -> AuthResponse {
        match self.request(Method::GET, "/status", None, None).await {
            Ok((status, body)) if status == StatusCode::OK => AuthResponse::ok(body.to_string()),
            Ok((status, _)) => {
                AuthResponse::failure(format!("unexpected status {}", status.as_u16()))
            }
            Err(e) => AuthResponse::failure(e.user_message()),
        }
    }
}

// ── Response body helpers ───────────────────────────────────────────

fn string_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(ToOwned::to_owned)
}

fn bool_field(body: &Value, key: &str) -> bool {
    body.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn u64_field(body: &Value, key: &str) -> Option<u64> {
    body.get(key).and_then(Value::as_u64)
}

fn parse_user(body: &Value) -> Option<User> {
    body.get("user")
        .cloned()
        .and_then(|u| serde_json::from_value(u).ok())
}

/// Server-provided message under `error` or `message`, else the fallback.
fn error_message(body: &Value, fallback: &str) -> String {
    string_field(body, "error")
        .or_else(|| string_field(body, "message"))
        .unwrap_or_else(|| fallback.to_string())
}

fn message_or(body: &Value, fallback: &str) -> String {
    string_field(body, "message").unwrap_or_else(|| fallback.to_string())
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_client(base_url: &str, max_retries: u32) -> AuthClient {
        AuthClient::with_settings(
            base_url.to_string(),
            Duration::from_millis(500),
            max_retries,
            Duration::from_millis(10),
        )
        .unwrap()
    }

    #[test]
    fn endpoint_url_joins_cleanly() {
        let client = test_client("http://127.0.0.1:9/", 0);
        assert_eq!(
            client.endpoint_url("/login"),
            "http://127.0.0.1:9/login"
        );
        assert_eq!(
            client.endpoint_url("api/auth/verify"),
            "http://127.0.0.1:9/api/auth/verify"
        );
    }

    #[test]
    fn token_cell_set_and_clear() {
        let client = test_client("http://127.0.0.1:9", 0);
        assert!(!client.is_authenticated());

        client.set_tokens(Some("acc".into()), Some("ref".into()));
        assert!(client.is_authenticated());
        assert_eq!(client.access_token().as_deref(), Some("acc"));
        assert_eq!(client.refresh_token().as_deref(), Some("ref"));

        client.clear_tokens();
        assert!(!client.is_authenticated());
        assert!(client.refresh_token().is_none());
    }

    #[test]
    fn error_message_prefers_error_key() {
        let body = serde_json::json!({"error": "boom", "message": "other"});
        assert_eq!(error_message(&body, "fallback"), "boom");
        let body = serde_json::json!({"message": "other"});
        assert_eq!(error_message(&body, "fallback"), "other");
        let body = serde_json::json!({});
        assert_eq!(error_message(&body, "fallback"), "fallback");
    }

    #[tokio::test]
    async fn verify_without_token_fails_without_network() {
        let client = test_client("http://127.0.0.1:9", 0);
        let resp = client.verify_token(None).await;
        assert!(!resp.success);
        assert!(resp.message.contains("no token"));
    }

    #[tokio::test]
    async fn refresh_without_token_fails_without_network() {
        let client = test_client("http://127.0.0.1:9", 0);
        let resp = client.refresh_access_token().await;
        assert!(!resp.success);
    }

    #[tokio::test]
    async fn logout_succeeds_and_clears_tokens_when_host_unreachable() {
        // Port 9 (discard) is not listening; the request errors out.
        let client = test_client("http://127.0.0.1:9", 0);
        client.set_tokens(Some("acc".into()), Some("ref".into()));

        let resp = client.logout().await;
        assert!(resp.success);
        assert!(!client.is_authenticated());
        assert!(client.refresh_token().is_none());
    }

    #[tokio::test]
    async fn forgot_password_rejects_bad_email_locally() {
        let client = test_client("http://127.0.0.1:9", 0);
        let resp = client.forgot_password("not-an-email").await;
        assert!(!resp.success);
        assert!(resp.message.contains("valid email"));
    }

    #[tokio::test]
    async fn reset_password_rejects_short_password_locally() {
        let client = test_client("http://127.0.0.1:9", 0);
        let resp = client.reset_password("some-token", "ab1").await;
        assert!(!resp.success);
        assert!(resp.message.contains("6 characters"));
    }

    #[tokio::test]
    async fn retry_bound_is_max_retries_plus_one() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));

        // Accept and immediately drop every connection so each attempt
        // fails at the transport layer.
        let seen = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                if let Ok((stream, _)) = listener.accept().await {
                    seen.fetch_add(1, Ordering::SeqCst);
                    drop(stream);
                }
            }
        });

        let client = test_client(&format!("http://{addr}"), 2);
        let resp = client.verify_token(Some("token")).await;

        assert!(!resp.success);
        assert_eq!(connections.load(Ordering::SeqCst), 3);
    }
}
