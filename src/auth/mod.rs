//! User authentication stack for the desktop client.
//!
//! Provides:
//! - Password hashing (PBKDF2-HMAC-SHA256, 100k rounds + per-password salt)
//! - Local input validation (username/email/password rules)
//! - The HTTP client for the credential worker, with transport-level retry
//! - The [`AuthService`] orchestrator that ties validation, network calls,
//!   and the session manager together and broadcasts state changes
//!
//! ## Design Decisions
//! - No JWT dependency — the worker issues opaque random tokens that are
//!   SHA-256 hashed for server-side lookup, so token validation is a real
//!   endpoint rather than local signature checking.
//! - Every public operation returns a structured [`AuthResponse`]; expected
//!   failures (bad input, unreachable host, rejected credentials) are never
//!   surfaced as errors to callers.

pub mod client;
pub mod error;
pub mod password;
pub mod service;
pub mod types;
pub mod validator;

pub use client::AuthClient;
pub use error::AuthError;
pub use service::{AuthEvent, AuthService};
pub use types::{AuthResponse, LoginRequest, RegisterRequest, User};
pub use validator::AuthValidator;
