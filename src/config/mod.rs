//! Application configuration.
//!
//! One TOML file under the app data directory (`config.toml`), loaded once at
//! process start into a plain [`Config`] value that is passed by reference to
//! every component. There is no global singleton; an explicit [`Config::load`]
//! call is the only way to re-read the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Resolve the platform app-data directory (e.g. `~/.local/share/authdesk`).
/// Falls back to a dotted directory in the CWD when the home dir is unknown.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "authdesk")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".authdesk"))
}

/// Remote credential-worker endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the auth API, no trailing slash required.
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".into(),
        }
    }
}

/// HTTP transport settings for the gateway client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after the first attempt, on transport errors only.
    pub max_retries: u32,
    /// Base retry delay; attempt `n` waits `retry_delay_ms × n`.
    pub retry_delay_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Client-side session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// A persisted session older than this is discarded on restore.
    pub session_max_age_days: i64,
    /// A session idle longer than this is expired by the activity check.
    pub inactivity_timeout_mins: i64,
    /// Cadence of the reactive token-expiry check.
    pub token_check_interval_secs: u64,
    /// Cadence of the session inactivity check.
    pub session_check_interval_secs: u64,
    /// Cadence of the eager access-token refresh scheduled after login.
    pub auto_refresh_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_max_age_days: 30,
            inactivity_timeout_mins: 120,
            token_check_interval_secs: 5 * 60,
            session_check_interval_secs: 60 * 60,
            auto_refresh_interval_secs: 25 * 60,
        }
    }
}

/// Settings for the locally-runnable credential worker (`authdesk serve`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Lifetime of issued access tokens (seconds).
    pub access_ttl_secs: u64,
    /// Lifetime of issued refresh tokens (seconds).
    pub refresh_ttl_secs: u64,
    /// Whether `POST /register` accepts new accounts.
    pub allow_registration: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
            access_ttl_secs: 30 * 60,
            refresh_ttl_secs: 30 * 24 * 3600,
            allow_registration: true,
        }
    }
}

/// Root configuration value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub network: NetworkConfig,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
    /// Where session state and the worker database live. Not read from the
    /// file; resolved at load time (or overridden by tests).
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            network: NetworkConfig::default(),
            auth: AuthConfig::default(),
            gateway: GatewayConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from `<data-dir>/config.toml` when
    /// no explicit path is given. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let data_dir = default_data_dir();
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if file.exists() {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read config at {}", file.display()))?;
            toml::from_str::<Config>(&raw)
                .with_context(|| format!("invalid config at {}", file.display()))?
        } else {
            Config::default()
        };

        config.data_dir = data_dir;
        Ok(config)
    }

    /// Path of the persisted client session.
    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    /// Path of the worker credential database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("users.db")
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.network.max_retries, 3);
        assert_eq!(config.auth.session_max_age_days, 30);
        assert_eq!(config.auth.token_check_interval_secs, 300);
        assert_eq!(config.auth.auto_refresh_interval_secs, 1500);
        assert_eq!(config.gateway.port, 8787);
        assert!(config.gateway.allow_registration);
    }

    #[test]
    fn partial_file_fills_missing_sections() {
        let parsed: Config = toml::from_str(
            r#"
            [api]
            base_url = "https://auth.example.net"

            [network]
            max_retries = 1
            "#,
        )
        .unwrap();

        assert_eq!(parsed.api.base_url, "https://auth.example.net");
        assert_eq!(parsed.network.max_retries, 1);
        // untouched sections keep defaults
        assert_eq!(parsed.network.timeout_secs, 30);
        assert_eq!(parsed.auth.inactivity_timeout_mins, 120);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::load(Some(&tmp.path().join("nope.toml"))).unwrap();
        assert_eq!(config.gateway.host, "127.0.0.1");
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::default();
        let raw = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&raw).unwrap();
        assert_eq!(back.api.base_url, config.api.base_url);
        assert_eq!(back.gateway.access_ttl_secs, config.gateway.access_ttl_secs);
    }

    #[test]
    fn derived_paths_live_under_data_dir() {
        let mut config = Config::default();
        config.data_dir = PathBuf::from("/tmp/authdesk-test");
        assert_eq!(
            config.session_file(),
            PathBuf::from("/tmp/authdesk-test/session.json")
        );
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/authdesk-test/users.db")
        );
    }
}
