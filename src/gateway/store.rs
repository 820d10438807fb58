//! SQLite-backed credential store for the worker.
//!
//! Tables:
//! - `users`: identity rows — unique username/email, password hash + salt,
//!   status flag, last-login bookkeeping, free-form metadata
//! - `sessions`: opaque access/refresh token pairs, SHA-256 hashed at rest
//! - `user_roles`: best-effort role grants, never transactional with users
//! - `password_reset_tokens`: one pending token per user (insert-or-replace)

use crate::auth::password::{
    constant_time_eq, generate_salt, hash_password, legacy_worker_digest, verify_password,
};
use crate::auth::types::User;
use anyhow::{bail, Result};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Token byte length before hex encoding (32 bytes = 64 hex chars).
const TOKEN_BYTES: usize = 32;

/// Reset tokens are valid for one hour.
const RESET_TOKEN_TTL_SECS: u64 = 3600;

/// Role granted to every new account.
const DEFAULT_ROLE: &str = "user";

/// A full user row, password material included. Never serialized; convert
/// with [`UserRecord::to_user`] before putting it on the wire.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub verified: bool,
    pub status: String,
    pub last_login_at: Option<i64>,
    pub metadata: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UserRecord {
    /// The client-facing view of this row.
    pub fn to_user(&self) -> User {
        User {
            id: Some(self.id),
            username: Some(self.username.clone()),
            email: Some(self.email.clone()),
            verified: self.verified,
            is_active: self.status == "active",
            last_login_at: self
                .last_login_at
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)),
            metadata: serde_json::from_str(&self.metadata).unwrap_or(serde_json::Value::Null),
            created_at: chrono::DateTime::from_timestamp(self.created_at, 0),
            updated_at: chrono::DateTime::from_timestamp(self.updated_at, 0),
        }
    }
}

/// An issued access/refresh token pair. Plaintext tokens are revealed once.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// SQLite-backed credential store.
pub struct CredentialStore {
    conn: Mutex<rusqlite::Connection>,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl CredentialStore {
    /// Open (or create) the credential database at the given path.
    pub fn open(db_path: &Path, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            access_ttl_secs,
            refresh_ttl_secs,
        })
    }

    /// In-memory store, used by tests and ad-hoc runs.
    pub fn open_in_memory(access_ttl_secs: u64, refresh_ttl_secs: u64) -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            access_ttl_secs,
            refresh_ttl_secs,
        })
    }

    fn init_tables(conn: &rusqlite::Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                salt TEXT NOT NULL,
                verified INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                last_login_at INTEGER,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                access_hash TEXT PRIMARY KEY,
                refresh_hash TEXT NOT NULL UNIQUE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                access_expires_at INTEGER NOT NULL,
                refresh_expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_refresh_expires
                ON sessions(refresh_expires_at);

            CREATE TABLE IF NOT EXISTS user_roles (
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                granted_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, role)
            );

            CREATE TABLE IF NOT EXISTS password_reset_tokens (
                user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                token_hash TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    // ── User management ─────────────────────────────────────────────

    /// Create a user. Uniqueness is checked up front so the caller gets a
    /// distinguishable conflict, and again by the UNIQUE constraints.
    /// The default role grant afterwards is best-effort: a failure there is
    /// logged and never rolls back the user row.
    pub fn create_user(&self, username: &str, email: &str, password: &str) -> Result<UserRecord> {
        let username = username.trim();
        let email = email.trim().to_lowercase();
        let now = epoch_secs() as i64;

        let conn = self.conn.lock();

        let taken: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1 OR email = ?2",
                rusqlite::params![username, email],
                |row| row.get(0),
            )
            .ok();
        if taken.is_some() {
            bail!("username or email is already registered");
        }

        let salt = generate_salt();
        let password_hash = hash_password(password, Some(&salt));

        let result = conn.execute(
            "INSERT INTO users (username, email, password_hash, salt, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![username, email, password_hash, salt, now],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!("username or email is already registered")
            }
            Err(e) => return Err(e.into()),
        }
        let user_id = conn.last_insert_rowid();

        // Two-phase by design: the account exists even if the grant fails.
        if let Err(e) = conn.execute(
            "INSERT OR IGNORE INTO user_roles (user_id, role, granted_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, DEFAULT_ROLE, now],
        ) {
            tracing::warn!(user_id, "default role assignment failed: {e}");
        }

        drop(conn);
        self.get_user(user_id)?
            .ok_or_else(|| anyhow::anyhow!("user row vanished after insert"))
    }

    /// Authenticate by username or email. The failure message never reveals
    /// whether the account exists or which field was wrong.
    pub fn authenticate(&self, username_or_email: &str, password: &str) -> Result<UserRecord> {
        let needle = username_or_email.trim();
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE (username = ?1 COLLATE NOCASE OR email = ?1 COLLATE NOCASE)
                       AND status = 'active'"
                ),
                rusqlite::params![needle],
                map_user_row,
            )
        };

        let record = match row {
            Ok(record) => record,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                // Perform dummy hash to prevent timing side-channel
                let _ = hash_password(password, Some("0000000000000000"));
                bail!("Invalid username or password");
            }
            Err(e) => return Err(e.into()),
        };

        if !verify_stored(password, &record.password_hash, &record.salt) {
            bail!("Invalid username or password");
        }

        let now = epoch_secs() as i64;
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
            rusqlite::params![now, record.id],
        )?;

        Ok(UserRecord {
            last_login_at: Some(now),
            ..record
        })
    }

    /// Look up a user by id.
    pub fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            rusqlite::params![user_id],
            map_user_row,
        );
        match row {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Count registered users.
    pub fn user_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Roles granted to a user.
    pub fn user_roles(&self, user_id: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT role FROM user_roles WHERE user_id = ?1 ORDER BY role")?;
        let roles = stmt
            .query_map(rusqlite::params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roles)
    }

    // ── Session tokens ──────────────────────────────────────────────

    /// Issue a fresh access/refresh pair for an authenticated user.
    pub fn create_session(&self, user_id: i64) -> Result<IssuedTokens> {
        let access_token = generate_token();
        let refresh_token = generate_token();
        let now = epoch_secs();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions
                 (access_hash, refresh_hash, user_id, created_at,
                  access_expires_at, refresh_expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                hash_token(&access_token),
                hash_token(&refresh_token),
                user_id,
                now as i64,
                (now + self.access_ttl_secs) as i64,
                (now + self.refresh_ttl_secs) as i64,
            ],
        )?;

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            expires_in: self.access_ttl_secs,
        })
    }

    /// Validate an access token. `None` when unknown, expired, or the user
    /// is no longer active.
    pub fn verify_access(&self, access_token: &str) -> Option<UserRecord> {
        let now = epoch_secs() as i64;
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {USER_COLUMNS_PREFIXED} FROM sessions s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.access_hash = ?1
                   AND s.access_expires_at > ?2
                   AND u.status = 'active'"
            ),
            rusqlite::params![hash_token(access_token), now],
            map_user_row,
        )
        .ok()
    }

    /// Rotate a session: the old pair is deleted and a new one issued.
    /// `None` when the refresh token is unknown or expired.
    pub fn refresh_session(&self, refresh_token: &str) -> Result<Option<IssuedTokens>> {
        let refresh_hash = hash_token(refresh_token);
        let now = epoch_secs() as i64;

        let user_id: Option<i64> = {
            let conn = self.conn.lock();
            let found = conn
                .query_row(
                    "SELECT user_id FROM sessions
                     WHERE refresh_hash = ?1 AND refresh_expires_at > ?2",
                    rusqlite::params![refresh_hash, now],
                    |row| row.get(0),
                )
                .ok();
            if found.is_some() {
                conn.execute(
                    "DELETE FROM sessions WHERE refresh_hash = ?1",
                    rusqlite::params![refresh_hash],
                )?;
            }
            found
        };

        match user_id {
            Some(user_id) => Ok(Some(self.create_session(user_id)?)),
            None => Ok(None),
        }
    }

    /// Revoke the session holding this access token.
    pub fn revoke_session(&self, access_token: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE access_hash = ?1",
            rusqlite::params![hash_token(access_token)],
        )?;
        Ok(deleted > 0)
    }

    /// Remove expired sessions and stale reset tokens.
    pub fn cleanup_expired(&self) -> Result<u64> {
        let now = epoch_secs() as i64;
        let conn = self.conn.lock();
        let sessions = conn.execute(
            "DELETE FROM sessions WHERE refresh_expires_at <= ?1",
            rusqlite::params![now],
        )?;
        let tokens = conn.execute(
            "DELETE FROM password_reset_tokens WHERE expires_at <= ?1",
            rusqlite::params![now],
        )?;
        Ok((sessions + tokens) as u64)
    }

    // ── Password reset ──────────────────────────────────────────────

    /// Create (or replace) the pending reset token for the account behind
    /// `email`. Returns `None` when no active account matches; callers must
    /// answer identically either way.
    pub fn create_reset_token(&self, email: &str) -> Result<Option<String>> {
        self.create_reset_token_with_ttl(email, RESET_TOKEN_TTL_SECS)
    }

    fn create_reset_token_with_ttl(&self, email: &str, ttl_secs: u64) -> Result<Option<String>> {
        let email = email.trim().to_lowercase();
        let conn = self.conn.lock();

        let user_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE email = ?1 AND status = 'active'",
                rusqlite::params![email],
                |row| row.get(0),
            )
            .ok();
        let Some(user_id) = user_id else {
            return Ok(None);
        };

        let token = generate_token();
        let now = epoch_secs();
        // One pending token per user: a newer request replaces the old one.
        conn.execute(
            "INSERT OR REPLACE INTO password_reset_tokens
                 (user_id, token_hash, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                user_id,
                hash_token(&token),
                (now + ttl_secs) as i64,
                now as i64,
            ],
        )?;

        Ok(Some(token))
    }

    /// Consume a reset token: re-hash with a fresh salt, update the user,
    /// delete the token, revoke existing sessions. `false` when the token is
    /// unknown or expired.
    pub fn reset_password(&self, token: &str, new_password: &str) -> Result<bool> {
        let token_hash = hash_token(token);
        let now = epoch_secs() as i64;

        let conn = self.conn.lock();
        let user_id: Option<i64> = conn
            .query_row(
                "SELECT user_id FROM password_reset_tokens
                 WHERE token_hash = ?1 AND expires_at > ?2",
                rusqlite::params![token_hash, now],
                |row| row.get(0),
            )
            .ok();
        let Some(user_id) = user_id else {
            // Drop the row anyway if it exists but expired.
            let _ = conn.execute(
                "DELETE FROM password_reset_tokens WHERE token_hash = ?1",
                rusqlite::params![token_hash],
            );
            return Ok(false);
        };

        let salt = generate_salt();
        let password_hash = hash_password(new_password, Some(&salt));
        conn.execute(
            "UPDATE users SET password_hash = ?1, salt = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![password_hash, salt, now, user_id],
        )?;
        conn.execute(
            "DELETE FROM password_reset_tokens WHERE user_id = ?1",
            rusqlite::params![user_id],
        )?;
        conn.execute(
            "DELETE FROM sessions WHERE user_id = ?1",
            rusqlite::params![user_id],
        )?;

        tracing::info!(user_id, "password reset completed");
        Ok(true)
    }

    /// Change a password after verifying the current one. `false` on
    /// mismatch.
    pub fn change_password(&self, user_id: i64, old_password: &str, new_password: &str) -> Result<bool> {
        let Some(record) = self.get_user(user_id)? else {
            return Ok(false);
        };
        if !verify_stored(old_password, &record.password_hash, &record.salt) {
            return Ok(false);
        }

        let salt = generate_salt();
        let password_hash = hash_password(new_password, Some(&salt));
        let now = epoch_secs() as i64;

        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET password_hash = ?1, salt = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![password_hash, salt, now, user_id],
        )?;
        Ok(true)
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

const USER_COLUMNS: &str = "id, username, email, password_hash, salt, verified, status, \
                            last_login_at, metadata, created_at, updated_at";

const USER_COLUMNS_PREFIXED: &str =
    "u.id, u.username, u.email, u.password_hash, u.salt, u.verified, u.status, \
     u.last_login_at, u.metadata, u.created_at, u.updated_at";

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        salt: row.get(4)?,
        verified: row.get::<_, i64>(5)? != 0,
        status: row.get(6)?,
        last_login_at: row.get(7)?,
        metadata: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Verify a password against a stored hash, falling back to the old
/// worker's single-pass digest for rows without an embedded salt.
fn verify_stored(password: &str, stored_hash: &str, salt: &str) -> bool {
    if stored_hash.contains(':') {
        return verify_password(password, stored_hash);
    }
    constant_time_eq(
        legacy_worker_digest(password, salt).as_bytes(),
        stored_hash.as_bytes(),
    )
}

// ── Cryptographic helpers ───────────────────────────────────────────

/// Generate a random opaque token (hex-encoded).
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a token for storage (single SHA-256 — tokens are high-entropy).
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tests ───────────────────────────────────────────────────────────
