//! Local input validation for authentication forms.
//!
//! Rules match what the worker enforces server-side, so bad input is
//! rejected before any network call:
//! - username: 3–20 chars of `[A-Za-z0-9_-]`, not starting with a digit
//! - email: common mailbox pattern, max 254 chars, lowercased for checks
//! - password: 6–128 chars, at least one letter and one digit, no spaces

use crate::auth::error::AuthError;
use regex::Regex;

/// Compiled validation patterns. Construct once and share.
#[derive(Debug)]
pub struct AuthValidator {
    username_pattern: Regex,
    email_pattern: Regex,
}

impl Default for AuthValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthValidator {
    pub fn new() -> Self {
        Self {
            username_pattern: Regex::new(r"^[A-Za-z_-][A-Za-z0-9_-]{2,19}$")
                .expect("username pattern is valid"),
            email_pattern: Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
                .expect("email pattern is valid"),
        }
    }

    /// Login accepts either a username or an email, so only length and
    /// presence are checked here.
    pub fn validate_login_input(
        &self,
        username_or_email: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        let name = username_or_email.trim();
        if name.is_empty() {
            return Err(AuthError::Validation(
                "please enter a username or email".into(),
            ));
        }
        if name.len() < 3 {
            return Err(AuthError::Validation(
                "username or email must be at least 3 characters".into(),
            ));
        }
        if name.len() > 50 {
            return Err(AuthError::Validation(
                "username or email must be at most 50 characters".into(),
            ));
        }
        if password.trim().is_empty() {
            return Err(AuthError::Validation("please enter a password".into()));
        }
        if password.len() < 6 {
            return Err(AuthError::Validation(
                "password must be at least 6 characters".into(),
            ));
        }
        if password.len() > 128 {
            return Err(AuthError::Validation(
                "password must be at most 128 characters".into(),
            ));
        }
        Ok(())
    }

    pub fn validate_username(&self, username: &str) -> Result<(), AuthError> {
        let name = username.trim();
        if name.is_empty() {
            return Err(AuthError::Validation("please enter a username".into()));
        }
        if name.len() < 3 {
            return Err(AuthError::Validation(
                "username must be at least 3 characters".into(),
            ));
        }
        if name.len() > 20 {
            return Err(AuthError::Validation(
                "username must be at most 20 characters".into(),
            ));
        }
        if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return Err(AuthError::Validation(
                "username cannot start with a digit".into(),
            ));
        }
        if !self.username_pattern.is_match(name) {
            return Err(AuthError::Validation(
                "username may only contain letters, digits, underscores and hyphens".into(),
            ));
        }
        Ok(())
    }

    pub fn validate_email(&self, email: &str) -> Result<(), AuthError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AuthError::Validation("please enter an email address".into()));
        }
        if email.len() > 254 {
            return Err(AuthError::Validation(
                "email address must be at most 254 characters".into(),
            ));
        }
        if !self.email_pattern.is_match(&email) {
            return Err(AuthError::Validation(
                "please enter a valid email address".into(),
            ));
        }
        Ok(())
    }

    pub fn validate_password(&self, password: &str) -> Result<(), AuthError> {
        if password.is_empty() {
            return Err(AuthError::Validation("please enter a password".into()));
        }
        if password.len() < 6 {
            return Err(AuthError::Validation(
                "password must be at least 6 characters".into(),
            ));
        }
        if password.len() > 128 {
            return Err(AuthError::Validation(
                "password must be at most 128 characters".into(),
            ));
        }
        let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        if !(has_letter && has_digit) {
            return Err(AuthError::Validation(
                "password must contain at least one letter and one digit".into(),
            ));
        }
        if password.contains(' ') {
            return Err(AuthError::Validation(
                "password cannot contain spaces".into(),
            ));
        }
        Ok(())
    }

    /// Full registration check: username, email, password, confirmation.
    pub fn validate_register_input(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        self.validate_username(username)?;
        self.validate_email(email)?;
        self.validate_password(password)?;
        if password != confirm_password {
            return Err(AuthError::Validation("passwords do not match".into()));
        }
        Ok(())
    }

    pub fn validate_password_change(
        &self,
        old_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        if old_password.is_empty() {
            return Err(AuthError::Validation(
                "please enter your current password".into(),
            ));
        }
        self.validate_password(new_password)?;
        if new_password != confirm_password {
            return Err(AuthError::Validation("new passwords do not match".into()));
        }
        if old_password == new_password {
            return Err(AuthError::Validation(
                "new password must differ from the current one".into(),
            ));
        }
        Ok(())
    }

    /// Whether the text looks like an email address.
    pub fn is_email(&self, text: &str) -> bool {
        self.email_pattern.is_match(text.trim().to_lowercase().as_str())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
