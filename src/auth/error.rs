//! Error taxonomy for the authentication stack.
//!
//! These variants classify failures for retry and reporting decisions:
//! only [`AuthError::Network`] is retryable, and only after the transport
//! has already exhausted its attempts does it surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed or missing local input. Never reaches the network.
    #[error("{0}")]
    Validation(String),

    /// Connection or timeout failure after all retries were spent.
    #[error("network error: {0}")]
    Network(String),

    /// HTTP status or response-shape error from the worker. Terminal;
    /// carries the server-provided message when one was present.
    #[error("HTTP {status}: {message}")]
    Protocol { status: u16, message: String },

    /// Expired or invalid token state.
    #[error("session error: {0}")]
    Session(String),

    /// Session-file read/write failure. Degrades to "no session".
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl AuthError {
    /// The short text shown to the user when this error ends an operation.
    /// Protocol errors prefer the server's own wording.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Protocol { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
