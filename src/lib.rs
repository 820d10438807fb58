//! authdesk — account sign-in for desktop clients.
//!
//! The crate is split into four areas:
//! - [`auth`]: password hashing, input validation, the HTTP client for the
//!   credential worker, and the orchestrating [`auth::AuthService`]
//! - [`session`]: the persistent client-side session (restore, refresh,
//!   expiry timers)
//! - [`gateway`]: the credential worker itself — an axum request handler
//!   over a SQLite store, runnable locally with `authdesk serve`
//! - [`config`]: TOML configuration loaded once at startup

pub mod auth;
pub mod config;
pub mod gateway;
pub mod session;
