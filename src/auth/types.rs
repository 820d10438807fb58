//! Core data types shared by the client, session manager, and orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user account as returned by the credential worker.
///
/// Password material never appears here; the worker strips it before
/// responding. All fields are optional or defaulted so that partial
/// responses from older worker versions still deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub verified: bool,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: None,
            username: None,
            email: None,
            verified: false,
            is_active: true,
            last_login_at: None,
            metadata: serde_json::Value::Null,
            created_at: None,
            updated_at: None,
        }
    }
}

impl User {
    /// Minimal well-formedness check used before trusting a restored record.
    pub fn is_valid(&self) -> bool {
        self.username
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
            && self.email.as_deref().is_some_and(|email| email.contains('@'))
    }
}

/// Credentials entered on the login form. Ephemeral, never persisted.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    /// Either a username or an email address; the worker resolves both.
    pub username_or_email: String,
    pub password: String,
    pub remember_me: bool,
}

/// Fields entered on the registration form.
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// Outcome of any gateway-client operation.
///
/// Invariant: `success == false` implies no tokens and no user. Use the
/// constructors rather than building the struct by hand.
#[derive(Debug, Clone, Default)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Access-token lifetime in seconds, when the worker reports one.
    pub expires_in: Option<u64>,
}

impl AuthResponse {
    /// A successful response carrying only a message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    /// A failed response. Tokens and user are always absent.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: Option<User>) -> Self {
        self.user = user;
        self
    }

    pub fn with_tokens(
        mut self,
        access_token: Option<String>,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
    ) -> Self {
        self.access_token = access_token;
        self.refresh_token = refresh_token;
        self.expires_in = expires_in;
        self
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_deserializes_from_partial_json() {
        let user: User =
            serde_json::from_str(r#"{"id": 7, "username": "alice", "email": "a@b.io"}"#).unwrap();
        assert_eq!(user.id, Some(7));
        assert!(user.is_active);
        assert!(!user.verified);
        assert!(user.is_valid());
    }

    #[test]
    fn user_without_email_is_invalid() {
        let user = User {
            username: Some("alice".into()),
            ..User::default()
        };
        assert!(!user.is_valid());
    }

    #[test]
    fn user_round_trips() {
        let user = User {
            id: Some(1),
            username: Some("alice".into()),
            email: Some("alice@example.com".into()),
            verified: true,
            ..User::default()
        };
        let json = serde_json::to_string(&user).unwrap();
        let back: User = serde_json::from_str(&json).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn failure_response_carries_no_tokens() {
        let resp = AuthResponse::failure("nope");
        assert!(!resp.success);
        assert!(resp.user.is_none());
        assert!(resp.access_token.is_none());
        assert!(resp.refresh_token.is_none());
        assert!(resp.expires_in.is_none());
    }

    #[test]
    fn ok_response_builders_attach_fields() {
        let resp = AuthResponse::ok("welcome")
            .with_user(Some(User::default()))
            .with_tokens(Some("a".into()), Some("r".into()), Some(1800));
        assert!(resp.success);
        assert_eq!(resp.expires_in, Some(1800));
        assert!(resp.access_token.is_some());
    }
}
