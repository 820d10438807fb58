//! Client-side session state: persistence, restoration, and expiry.
//!
//! One session slot per process. Lifecycle: `Empty → Active → Empty`, where
//! an active session survives process restarts only when it was started with
//! remember-me (serialized to `session.json` under the app data directory).
//!
//! Two periodic checks run while a session is active:
//! - token-expiry check (default every 5 minutes): verifies the access token
//!   against the worker and tries a refresh before declaring expiry
//! - inactivity check (default every 60 minutes): expires sessions idle for
//!   longer than the configured threshold (default 2 hours)
//!
//! Every file and network failure in this module degrades to "no session";
//! nothing here panics or returns an error to the UI layer.

use crate::auth::client::AuthClient;
use crate::auth::types::User;
use crate::config::Config;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Capacity of the session event channel; events are small and consumers
/// are expected to keep up.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// The persisted session record. Field names follow the on-disk JSON
/// contract shared with older builds, so keys stay camelCase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub login_time: DateTime<Utc>,
    pub remember_me: bool,
    pub last_activity: DateTime<Utc>,
}

/// Notifications emitted after session state changes are committed.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A persisted session was restored and verified; carries the user.
    Restored(User),
    /// The session could not be kept alive (token rejected and refresh
    /// failed, or inactivity threshold crossed).
    Expired,
}

struct SessionInner {
    session_file: PathBuf,
    max_age: chrono::Duration,
    inactivity_timeout: chrono::Duration,
    token_check_interval: Duration,
    session_check_interval: Duration,
    client: Arc<AuthClient>,
    state: RwLock<Option<SessionData>>,
    events: broadcast::Sender<SessionEvent>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

/// Manager for the single client session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(config: &Config, client: Arc<AuthClient>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                session_file: config.session_file(),
                max_age: chrono::Duration::days(config.auth.session_max_age_days),
                inactivity_timeout: chrono::Duration::minutes(config.auth.inactivity_timeout_mins),
                token_check_interval: Duration::from_secs(config.auth.token_check_interval_secs),
                session_check_interval: Duration::from_secs(
                    config.auth.session_check_interval_secs,
                ),
                client,
                state: RwLock::new(None),
                events,
                timers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Transition `Empty → Active` after a successful login.
    /// Persists to disk only for remember-me sessions, and only after the
    /// in-memory state is fully committed.
    pub fn start_session(
        &self,
        user: User,
        access_token: String,
        refresh_token: String,
        remember_me: bool,
    ) {
        let now = Utc::now();
        let data = SessionData {
            user,
            access_token: access_token.clone(),
            refresh_token: refresh_token.clone(),
            login_time: now,
            remember_me,
            last_activity: now,
        };

        self.inner
            .client
            .set_tokens(Some(access_token), Some(refresh_token));
        *self.inner.state.write() = Some(data.clone());

        if remember_me {
            self.write_session_file(&data);
        }

        self.start_timers();
        tracing::info!(
            user = data.user.username.as_deref().unwrap_or("<unknown>"),
            remember_me,
            "session started"
        );
    }

    /// Transition `Active → Empty`: stop timers, clear memory, delete the
    /// persisted file. Idempotent.
    pub fn end_session(&self) {
        self.stop_timers();
        *self.inner.state.write() = None;
        self.clear_session_file();
        tracing::info!("session ended");
    }

    /// Restore a persisted session at startup. Returns `true` only when the
    /// file exists, is young enough, and the worker confirms (or refreshes)
    /// its tokens.
    pub async fn restore_session(&self) -> bool {
        self.restore_inner(false).await
    }

    async fn restore_inner(&self, already_refreshed: bool) -> bool {
        let Some(data) = self.read_session_file() else {
            return false;
        };

        if !data.user.is_valid() {
            tracing::warn!("persisted session has incomplete user data — discarding");
            self.clear_session_file();
            return false;
        }

        if Utc::now() - data.login_time > self.inner.max_age {
            tracing::info!("persisted session exceeded max age — discarding");
            self.clear_session_file();
            return false;
        }

        // Cloud check: the access token must still be accepted.
        let verify = self.inner.client.verify_token(Some(&data.access_token)).await;
        if !verify.success {
            if already_refreshed {
                tracing::info!("session restore failed after token refresh");
                self.clear_session_file();
                return false;
            }

            tracing::info!("access token rejected — attempting refresh");
            self.inner.client.set_tokens(
                Some(data.access_token.clone()),
                Some(data.refresh_token.clone()),
            );
            let refreshed = self.inner.client.refresh_access_token().await;
            let Some(new_access) = refreshed.access_token.filter(|_| refreshed.success) else {
                tracing::info!("token refresh failed — discarding persisted session");
                self.clear_session_file();
                return false;
            };

            let mut updated = data;
            updated.access_token = new_access;
            if let Some(new_refresh) = refreshed.refresh_token {
                updated.refresh_token = new_refresh;
            }
            self.write_session_file(&updated);
            return Box::pin(self.restore_inner(true)).await;
        }

        let mut data = data;
        data.last_activity = Utc::now();

        self.inner.client.set_tokens(
            Some(data.access_token.clone()),
            Some(data.refresh_token.clone()),
        );
        *self.inner.state.write() = Some(data.clone());
        self.write_session_file(&data);
        self.start_timers();

        tracing::info!(
            user = data.user.username.as_deref().unwrap_or("<unknown>"),
            "session restored"
        );
        let _ = self.inner.events.send(SessionEvent::Restored(data.user));
        true
    }

    // ── Accessors and updates ───────────────────────────────────────

    pub fn is_active(&self) -> bool {
        self.inner.state.read().is_some()
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.state.read().as_ref().map(|s| s.user.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .state
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    /// Bump the last-activity timestamp. Re-persists only for remember-me
    /// sessions, to avoid disk writes for transient ones.
    pub fn update_activity(&self) {
        let snapshot = {
            let mut guard = self.inner.state.write();
            let Some(data) = guard.as_mut() else { return };
            data.last_activity = Utc::now();
            data.remember_me.then(|| data.clone())
        };
        if let Some(data) = snapshot {
            self.write_session_file(&data);
        }
    }

    /// Install a refreshed token pair, mirroring it to the client and to
    /// disk (remember-me only).
    pub fn update_tokens(&self, access_token: String, refresh_token: Option<String>) {
        let (current_refresh, snapshot) = {
            let mut guard = self.inner.state.write();
            let Some(data) = guard.as_mut() else { return };
            data.access_token = access_token.clone();
            if let Some(refresh) = refresh_token {
                data.refresh_token = refresh;
            }
            (
                data.refresh_token.clone(),
                data.remember_me.then(|| data.clone()),
            )
        };

        self.inner
            .client
            .set_tokens(Some(access_token), Some(current_refresh));

        if let Some(data) = snapshot {
            self.write_session_file(&data);
        }
    }

    // ── Timers ──────────────────────────────────────────────────────

    fn start_timers(&self) {
        self.stop_timers();
        let mut timers = self.inner.timers.lock();

        let manager = self.clone();
        timers.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.inner.token_check_interval);
            interval.tick().await; // the first tick fires immediately
            loop {
                interval.tick().await;
                manager.check_token_expiry().await;
            }
        }));

        let manager = self.clone();
        timers.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.inner.session_check_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                manager.validate_session();
            }
        }));
    }

    fn stop_timers(&self) {
        for handle in self.inner.timers.lock().drain(..) {
            handle.abort();
        }
    }

    /// Reactive token check: verify, refresh on rejection, announce expiry
    /// when the refresh fails too.
    async fn check_token_expiry(&self) {
        let Some(access_token) = self.access_token() else {
            return;
        };

        let verify = self.inner.client.verify_token(Some(&access_token)).await;
        if verify.success {
            return;
        }

        tracing::info!("access token no longer valid — attempting refresh");
        let refreshed = self.inner.client.refresh_access_token().await;
        match refreshed.access_token.filter(|_| refreshed.success) {
            Some(new_access) => {
                self.update_tokens(new_access, refreshed.refresh_token);
                tracing::info!("access token refreshed");
            }
            None => {
                tracing::warn!("token refresh failed — session expired");
                let _ = self.inner.events.send(SessionEvent::Expired);
            }
        }
    }

    /// Inactivity check: sessions idle past the threshold are expired and
    /// torn down.
    fn validate_session(&self) {
        let last_activity = {
            let guard = self.inner.state.read();
            match guard.as_ref() {
                Some(data) => data.last_activity,
                None => return,
            }
        };

        if Utc::now() - last_activity > self.inner.inactivity_timeout {
            tracing::info!("session expired after inactivity");
            let _ = self.inner.events.send(SessionEvent::Expired);
            self.end_session();
        }
    }

    // ── File persistence ────────────────────────────────────────────

    fn read_session_file(&self) -> Option<SessionData> {
        let path = &self.inner.session_file;
        if !path.exists() {
            tracing::debug!("no persisted session file");
            return None;
        }

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("failed to read session file: {e}");
                self.clear_session_file();
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!("session file is corrupt: {e} — discarding");
                self.clear_session_file();
                None
            }
        }
    }

    fn write_session_file(&self, data: &SessionData) {
        let path = &self.inner.session_file;
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::error!("failed to create session directory: {e}");
                return;
            }
        }

        match serde_json::to_string_pretty(data) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    tracing::error!("failed to write session file: {e}");
                } else {
                    tracing::debug!("session persisted to {}", path.display());
                }
            }
            Err(e) => tracing::error!("failed to serialize session: {e}"),
        }
    }

    fn clear_session_file(&self) {
        let path = &self.inner.session_file;
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!("session file deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("failed to delete session file: {e}"),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
