//! Axum-based credential worker with body limits and request timeouts.
//!
//! This is the server half of the system: a stateless request handler over
//! the SQLite credential store, normally deployed behind an edge runtime and
//! runnable locally with `authdesk serve`. Design rules:
//! - an empty request body parses as an empty JSON object, never an error
//! - every handler answers `(StatusCode, Json)`; store failures become a
//!   500 JSON body, no exception escapes a request
//! - CORS is permissive so browser-hosted clients can call it directly
//! - login and forgot-password answer generically, revealing nothing about
//!   which accounts exist

pub mod store;

use crate::auth::validator::AuthValidator;
use crate::config::Config;
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use store::CredentialStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB) — prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout — credential operations are short
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// How often expired sessions and reset tokens are swept from the store.
const STORE_SWEEP_INTERVAL_SECS: u64 = 300;

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identical answer for every forgot-password request, known account or not.
const FORGOT_PASSWORD_MESSAGE: &str =
    "If that email address is registered, a reset link has been sent";

type ApiResponse = (StatusCode, Json<Value>);

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CredentialStore>,
    pub validator: Arc<AuthValidator>,
    pub allow_registration: bool,
}

impl AppState {
    pub fn new(store: Arc<CredentialStore>, allow_registration: bool) -> Self {
        Self {
            store,
            validator: Arc::new(AuthValidator::new()),
            allow_registration,
        }
    }
}

/// Build the worker router. Separated from [`run_gateway`] so tests can
/// serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    // ── CORS — allow desktop/web clients to connect from any origin ──
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/test", get(handle_test))
        .route("/status", get(handle_status))
        .route("/register", post(handle_register))
        .route("/login", post(handle_login))
        .route("/forgot-password", post(handle_forgot_password))
        .route("/reset-password", post(handle_reset_password))
        .route("/api/auth/verify", get(handle_verify))
        .route("/api/auth/refresh", post(handle_refresh))
        .route("/api/auth/logout", post(handle_logout))
        .route("/api/auth/change-password", post(handle_change_password))
        .fallback(handle_welcome)
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Run the credential worker on the configured address.
pub async fn run_gateway(host: &str, port: u16, config: &Config) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let display_addr = listener.local_addr()?;

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(CredentialStore::open(
        &db_path,
        config.gateway.access_ttl_secs,
        config.gateway.refresh_ttl_secs,
    )?);
    tracing::info!("credential store opened at {}", db_path.display());

    // Periodic sweep of expired sessions and reset tokens.
    let store_for_sweep = Arc::clone(&store);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(STORE_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match store_for_sweep.cleanup_expired() {
                Ok(removed) if removed > 0 => {
                    tracing::debug!(removed, "swept expired credentials");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("credential sweep failed: {e}"),
            }
        }
    });

    println!("🔐 authdesk worker listening on http://{display_addr}");
    println!("  GET  /test             — diagnostic payload");
    println!("  GET  /status           — service metadata");
    println!("  POST /register         — create an account");
    println!("  POST /login            — authenticate, get a token pair");
    println!("  POST /forgot-password  — request a reset token");
    println!("  POST /reset-password   — consume a reset token");
    println!("  GET  /api/auth/verify  — validate an access token");
    println!("  POST /api/auth/refresh — rotate a token pair");
    println!("  POST /api/auth/logout  — revoke a session");
    println!("  Press Ctrl+C to stop.\n");

    let app = router(AppState::new(store, config.gateway.allow_registration));
    axum::serve(listener, app).await?;
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /test — diagnostic payload, always public.
async fn handle_test() -> ApiResponse {
    (
        StatusCode::OK,
        Json(json!({
            "message": "Greetings from the authdesk worker!",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": SERVICE_VERSION,
            "worker_info": {
                "language": "Rust",
                "runtime": "axum",
                "status": "running",
            },
        })),
    )
}

/// GET /status — service/endpoint metadata.
async fn handle_status(State(state): State<AppState>) -> ApiResponse {
    let users = state.store.user_count().unwrap_or(0);
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "version": SERVICE_VERSION,
            "registered_users": users,
            "registration_open": state.allow_registration,
            "endpoints": [
                {"path": "/test", "method": "GET", "description": "diagnostic payload"},
                {"path": "/status", "method": "GET", "description": "service metadata"},
                {"path": "/register", "method": "POST", "description": "create an account"},
                {"path": "/login", "method": "POST", "description": "authenticate"},
                {"path": "/forgot-password", "method": "POST", "description": "request a password reset"},
                {"path": "/reset-password", "method": "POST", "description": "consume a reset token"},
                {"path": "/api/auth/verify", "method": "GET", "description": "validate an access token"},
                {"path": "/api/auth/refresh", "method": "POST", "description": "rotate a token pair"},
                {"path": "/api/auth/logout", "method": "POST", "description": "revoke a session"},
            ],
        })),
    )
}

/// Fallback — friendly pointer at the real endpoints.
async fn handle_welcome() -> ApiResponse {
    (
        StatusCode::OK,
        Json(json!({
            "message": "Welcome to the authdesk worker",
            "available_endpoints": ["/test", "/status", "/register", "/login"],
        })),
    )
}

/// POST /register — create a new user account.
async fn handle_register(State(state): State<AppState>, body: Bytes) -> ApiResponse {
    if !state.allow_registration {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"success": false, "error": "Registration is disabled"})),
        );
    }

    let body = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let username = text_field(&body, "username");
    let email = text_field(&body, "email");
    let password = text_field(&body, "password");

    // Same rules the client enforces; the worker cannot trust the client.
    for check in [
        state.validator.validate_username(username),
        state.validator.validate_email(email),
        state.validator.validate_password(password),
    ] {
        if let Err(e) = check {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "error": e.user_message()})),
            );
        }
    }

    match state.store.create_user(username, email, password) {
        Ok(record) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": "registration succeeded",
                "user": record.to_user(),
            })),
        ),
        Err(e) => {
            let message = e.to_string();
            if message.contains("already registered") {
                (
                    StatusCode::CONFLICT,
                    Json(json!({"success": false, "error": message})),
                )
            } else {
                internal_error(&e)
            }
        }
    }
}

/// POST /login — authenticate and issue a token pair. The failure message
/// never distinguishes a wrong password from an unknown account.
async fn handle_login(State(state): State<AppState>, body: Bytes) -> ApiResponse {
    let body = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let username = text_field(&body, "username");
    let password = text_field(&body, "password");

    if username.trim().is_empty() || password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "username and password are required"})),
        );
    }

    let record = match state.store.authenticate(username, password) {
        Ok(record) => record,
        Err(e) => {
            tracing::debug!("login rejected: {e}");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Invalid username or password"})),
            );
        }
    };

    match state.store.create_session(record.id) {
        Ok(tokens) => (
            StatusCode::OK,
            Json(json!({
                "message": "login succeeded",
                "user": record.to_user(),
                // `sessionToken` mirrors `accessToken` for older clients.
                "sessionToken": tokens.access_token,
                "accessToken": tokens.access_token,
                "refreshToken": tokens.refresh_token,
                "expiresIn": tokens.expires_in,
            })),
        ),
        Err(e) => internal_error(&e),
    }
}

/// GET /api/auth/verify — validate the bearer access token.
async fn handle_verify(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "message": "Missing Authorization header"})),
        );
    };

    match state.store.verify_access(token) {
        Some(record) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "token is valid",
                "user": record.to_user(),
            })),
        ),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "message": "Invalid or expired token"})),
        ),
    }
}

/// POST /api/auth/refresh — rotate a token pair.
async fn handle_refresh(State(state): State<AppState>, body: Bytes) -> ApiResponse {
    let body = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let refresh_token = text_field(&body, "refreshToken");
    if refresh_token.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "refreshToken is required"})),
        );
    }

    match state.store.refresh_session(refresh_token) {
        Ok(Some(tokens)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "token refreshed",
                "accessToken": tokens.access_token,
                "refreshToken": tokens.refresh_token,
                "expiresIn": tokens.expires_in,
            })),
        ),
        Ok(None) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "message": "Invalid or expired refresh token"})),
        ),
        Err(e) => internal_error(&e),
    }
}

/// POST /api/auth/logout — revoke the bearer session.
async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Missing Authorization header"})),
        );
    };

    match state.store.revoke_session(token) {
        Ok(true) => (StatusCode::OK, Json(json!({"message": "logged out"}))),
        Ok(false) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid session"})),
        ),
        Err(e) => internal_error(&e),
    }
}

/// POST /api/auth/change-password — bearer-authenticated password change.
async fn handle_change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Missing Authorization header"})),
        );
    };
    let Some(record) = state.store.verify_access(token) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid or expired token"})),
        );
    };

    let body = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let old_password = text_field(&body, "oldPassword");
    let new_password = text_field(&body, "newPassword");
    if let Err(e) = state.validator.validate_password(new_password) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.user_message()})),
        );
    }

    match state
        .store
        .change_password(record.id, old_password, new_password)
    {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({"message": "password changed"})),
        ),
        Ok(false) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Current password is incorrect"})),
        ),
        Err(e) => internal_error(&e),
    }
}

/// POST /forgot-password — uniform response, no account enumeration.
async fn handle_forgot_password(State(state): State<AppState>, body: Bytes) -> ApiResponse {
    let body = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = text_field(&body, "email");
    if let Err(e) = state.validator.validate_email(email) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.user_message()})),
        );
    }

    match state.store.create_reset_token(email) {
        Ok(Some(token)) => {
            // No mail integration here: the token surfaces through logs so
            // an operator (or a test) can complete the flow.
            tracing::debug!(email, token = %token, "password reset token issued");
        }
        Ok(None) => {
            tracing::debug!(email, "password reset requested for unknown email");
        }
        Err(e) => {
            // Still answer generically; a store hiccup must not leak state.
            tracing::warn!("reset token creation failed: {e}");
        }
    }

    (
        StatusCode::OK,
        Json(json!({"message": FORGOT_PASSWORD_MESSAGE})),
    )
}

/// POST /reset-password — consume a reset token.
async fn handle_reset_password(State(state): State<AppState>, body: Bytes) -> ApiResponse {
    let body = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let token = text_field(&body, "token");
    let new_password = text_field(&body, "newPassword");

    if token.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "reset token is required"})),
        );
    }
    if let Err(e) = state.validator.validate_password(new_password) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.user_message()})),
        );
    }

    match state.store.reset_password(token, new_password) {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({"message": "password has been reset"})),
        ),
        Ok(false) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid or expired reset token"})),
        ),
        Err(e) => internal_error(&e),
    }
}

// ── Request helpers ─────────────────────────────────────────────────

/// Parse a JSON request body. An empty body is an empty object; anything
/// else malformed is a 400 with details.
fn parse_body(body: &Bytes) -> Result<Value, ApiResponse> {
    if body.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Invalid request body: {e}")})),
        )
    })
}

/// Fetch a string field, defaulting to empty so validators report the
/// missing value instead of a JSON shape error.
fn text_field<'a>(body: &'a Value, key: &str) -> &'a str {
    body.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Store failures become an opaque 500 body; details go to the log only.
fn internal_error(e: &anyhow::Error) -> ApiResponse {
    tracing::error!("request failed: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        AppState::new(
            Arc::new(CredentialStore::open_in_memory(1800, 3600).unwrap()),
            true,
        )
    }

    fn bytes(raw: &str) -> Bytes {
        Bytes::copy_from_slice(raw.as_bytes())
    }

    #[test]
    fn empty_body_parses_as_empty_object() {
        let parsed = parse_body(&Bytes::new()).unwrap();
        assert!(parsed.as_object().unwrap().is_empty());
    }

    #[test]
    fn malformed_body_is_a_bad_request() {
        let err = parse_body(&bytes("{nope")).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), Some("abc123"));

        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_none());
    }

    #[tokio::test]
    async fn register_then_login_roundtrip() {
        let state = test_state();

        let (status, _) = handle_register(
            State(state.clone()),
            bytes(r#"{"username":"alice","email":"alice@example.com","password":"Passw0rd1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, Json(body)) = handle_login(
            State(state.clone()),
            bytes(r#"{"username":"alice","password":"Passw0rd1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["accessToken"].as_str().is_some_and(|t| !t.is_empty()));
        assert_eq!(body["sessionToken"], body["accessToken"]);
        assert_eq!(body["user"]["username"], "alice");
    }

    #[tokio::test]
    async fn register_rejects_duplicates_with_conflict() {
        let state = test_state();
        let payload =
            r#"{"username":"alice","email":"alice@example.com","password":"Passw0rd1"}"#;

        let (status, _) = handle_register(State(state.clone()), bytes(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, Json(body)) = handle_register(State(state.clone()), bytes(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn register_validates_fields() {
        let state = test_state();
        let (status, Json(body)) = handle_register(
            State(state.clone()),
            bytes(r#"{"username":"1bad","email":"alice@example.com","password":"Passw0rd1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("digit"));
    }

    #[tokio::test]
    async fn login_failure_is_generic_for_unknown_and_wrong_password() {
        let state = test_state();
        handle_register(
            State(state.clone()),
            bytes(r#"{"username":"alice","email":"alice@example.com","password":"Passw0rd1"}"#),
        )
        .await;

        let (s1, Json(b1)) = handle_login(
            State(state.clone()),
            bytes(r#"{"username":"alice","password":"wrongpass1"}"#),
        )
        .await;
        let (s2, Json(b2)) = handle_login(
            State(state.clone()),
            bytes(r#"{"username":"ghost","password":"wrongpass1"}"#),
        )
        .await;

        assert_eq!(s1, StatusCode::UNAUTHORIZED);
        assert_eq!(s2, StatusCode::UNAUTHORIZED);
        assert_eq!(b1["error"], b2["error"]);
    }

    #[tokio::test]
    async fn verify_and_logout_flow() {
        let state = test_state();
        handle_register(
            State(state.clone()),
            bytes(r#"{"username":"alice","email":"alice@example.com","password":"Passw0rd1"}"#),
        )
        .await;
        let (_, Json(login)) = handle_login(
            State(state.clone()),
            bytes(r#"{"username":"alice","password":"Passw0rd1"}"#),
        )
        .await;
        let token = login["accessToken"].as_str().unwrap().to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );

        let (status, Json(body)) = handle_verify(State(state.clone()), headers.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) = handle_logout(State(state.clone()), headers.clone()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = handle_verify(State(state.clone()), headers).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn forgot_password_answers_identically_for_any_email() {
        let state = test_state();
        handle_register(
            State(state.clone()),
            bytes(r#"{"username":"alice","email":"alice@example.com","password":"Passw0rd1"}"#),
        )
        .await;

        let (s1, Json(b1)) = handle_forgot_password(
            State(state.clone()),
            bytes(r#"{"email":"alice@example.com"}"#),
        )
        .await;
        let (s2, Json(b2)) = handle_forgot_password(
            State(state.clone()),
            bytes(r#"{"email":"nonexistent@example.com"}"#),
        )
        .await;

        assert_eq!(s1, StatusCode::OK);
        assert_eq!(s2, StatusCode::OK);
        assert_eq!(b1, b2);
    }

    #[tokio::test]
    async fn reset_password_with_bad_token_fails() {
        let state = test_state();
        let (status, Json(body)) = handle_reset_password(
            State(state.clone()),
            bytes(r#"{"token":"bogus","newPassword":"NewPassw0rd1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Invalid or expired"));
    }

    #[tokio::test]
    async fn refresh_rotates_and_invalidates_the_old_pair() {
        let state = test_state();
        handle_register(
            State(state.clone()),
            bytes(r#"{"username":"alice","email":"alice@example.com","password":"Passw0rd1"}"#),
        )
        .await;
        let (_, Json(login)) = handle_login(
            State(state.clone()),
            bytes(r#"{"username":"alice","password":"Passw0rd1"}"#),
        )
        .await;
        let refresh = login["refreshToken"].as_str().unwrap().to_string();

        let (status, Json(body)) = handle_refresh(
            State(state.clone()),
            bytes(&format!(r#"{{"refreshToken":"{refresh}"}}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_ne!(body["refreshToken"].as_str().unwrap(), refresh);

        // The consumed refresh token is dead.
        let (status, _) = handle_refresh(
            State(state.clone()),
            bytes(&format!(r#"{{"refreshToken":"{refresh}"}}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn change_password_requires_valid_bearer_and_old_password() {
        let state = test_state();
        handle_register(
            State(state.clone()),
            bytes(r#"{"username":"alice","email":"alice@example.com","password":"Passw0rd1"}"#),
        )
        .await;
        let (_, Json(login)) = handle_login(
            State(state.clone()),
            bytes(r#"{"username":"alice","password":"Passw0rd1"}"#),
        )
        .await;
        let token = login["accessToken"].as_str().unwrap().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );

        let (status, _) = handle_change_password(
            State(state.clone()),
            headers.clone(),
            bytes(r#"{"oldPassword":"wrong1pw","newPassword":"NewPassw0rd1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = handle_change_password(
            State(state.clone()),
            headers,
            bytes(r#"{"oldPassword":"Passw0rd1","newPassword":"NewPassw0rd1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn registration_can_be_disabled() {
        let state = AppState::new(
            Arc::new(CredentialStore::open_in_memory(1800, 3600).unwrap()),
            false,
        );
        let (status, _) = handle_register(
            State(state),
            bytes(r#"{"username":"alice","email":"alice@example.com","password":"Passw0rd1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn status_lists_endpoints() {
        let (status, Json(body)) = handle_status(State(test_state())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["endpoints"].as_array().unwrap().len() >= 6);
    }
}
