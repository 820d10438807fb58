//! Password hashing and verification.
//!
//! PBKDF2-HMAC-SHA256 with a per-password random salt, encoded as
//! `salt:hexdigest` in one string. The same scheme runs on the client and
//! the worker. A single-pass digest helper remains for rows written by an
//! earlier worker build that hashed with plain SHA-256 over password+salt;
//! login falls back to it only when a stored hash has no embedded salt.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// PBKDF2 iteration count for password stretching.
pub const HASH_ITERATIONS: u32 = 100_000;

/// Salt byte length before hex encoding (16 bytes = 32 hex chars).
pub const SALT_BYTES: usize = 16;

/// Generate a random salt (hex-encoded).
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password, generating a fresh salt when none is supplied.
/// Returns the combined `salt:hexdigest` encoding.
pub fn hash_password(password: &str, salt: Option<&str>) -> String {
    let salt = salt.map_or_else(generate_salt, ToOwned::to_owned);
    let digest = derive(password, &salt);
    format!("{salt}:{digest}")
}

/// Verify a password against a stored `salt:hexdigest` value.
/// Malformed input yields `false`, never an error.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, expected)) = stored.split_once(':') else {
        return false;
    };
    if salt.is_empty() || expected.is_empty() {
        return false;
    }
    constant_time_eq(derive(password, salt).as_bytes(), expected.as_bytes())
}

/// PBKDF2-HMAC-SHA256 over the UTF-8 bytes of `password`, keyed by `salt`.
fn derive(password: &str, salt: &str) -> String {
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt.as_bytes(),
        HASH_ITERATIONS,
        &mut out,
    );
    hex::encode(out)
}

/// The old worker's fast digest: one SHA-256 pass over password+salt.
/// Too weak for new rows; kept so existing rows keep verifying.
pub fn legacy_worker_digest(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ── Tests ───────────────────────────────────────────────────────────
