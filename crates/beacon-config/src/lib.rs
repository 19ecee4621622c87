//! Shared configuration for the Beacon sync loop.
//!
//! TOML file + `BEACON_` environment layering, secret resolution (env var
//! name or plaintext), and translation to the transport's
//! [`SocketConfig`](beacon_api::SocketConfig). Durable identity lives in
//! [`identity`].

pub mod identity;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use beacon_api::SocketConfig;
use beacon_core::LegacyMode;

pub use identity::{FileIdentityStore, PersistedIdentity};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<ConfigError> for beacon_core::CoreError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Config {
                message: format!("invalid {field}: {reason}"),
            },
            other => Self::Persistence {
                message: other.to_string(),
            },
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub realtime: RealtimeSettings,

    #[serde(default)]
    pub device: DeviceSettings,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RealtimeSettings {
    /// Backend base URL (e.g., "https://project.supabase.co").
    pub service_url: Option<String>,

    /// Project anon key (plaintext; prefer `anon_key_env`).
    pub anon_key: Option<String>,

    /// Environment variable name containing the anon key.
    pub anon_key_env: Option<String>,

    /// Session access token (plaintext; prefer `access_token_env`).
    pub access_token: Option<String>,

    /// Environment variable name containing the access token.
    pub access_token_env: Option<String>,

    /// Subscription used while only a pairing code is known.
    #[serde(default)]
    pub legacy_mode: LegacyMode,

    /// Log every ignored pairing liveness update.
    #[serde(default)]
    pub pairing_realtime_debug: bool,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Free memory needed before the first connection.
    #[serde(default = "default_first_connect_heap")]
    pub first_connect_heap: u64,

    /// Free memory needed for reconnects.
    #[serde(default = "default_steady_state_heap")]
    pub steady_state_heap: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            service_url: None,
            anon_key: None,
            anon_key_env: None,
            access_token: None,
            access_token_env: None,
            legacy_mode: LegacyMode::default(),
            pairing_realtime_debug: false,
            tick_interval_ms: default_tick_interval_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            first_connect_heap: default_first_connect_heap(),
            steady_state_heap: default_steady_state_heap(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    100
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_first_connect_heap() -> u64 {
    100_000
}
fn default_steady_state_heap() -> u64 {
    60_000
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DeviceSettings {
    /// Six-character code shown on the display before a user claims it.
    pub pairing_code: Option<String>,

    /// Fixed device uuid; overrides the persisted one.
    pub device_uuid: Option<String>,

    /// Override for the identity file location.
    pub identity_path: Option<PathBuf>,
}

impl Config {
    /// Reject values that can never work, before anything connects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(raw) = self.realtime.service_url.as_deref() {
            let url: url::Url = raw.trim().parse().map_err(|_| ConfigError::Validation {
                field: "realtime.service_url".into(),
                reason: format!("invalid URL: {raw}"),
            })?;
            if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
                return Err(ConfigError::Validation {
                    field: "realtime.service_url".into(),
                    reason: format!("unsupported scheme '{}'", url.scheme()),
                });
            }
        }

        if self.realtime.tick_interval_ms == 0 {
            return Err(ConfigError::Validation {
                field: "realtime.tick_interval_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }

        if self.realtime.heartbeat_secs == 0 {
            return Err(ConfigError::Validation {
                field: "realtime.heartbeat_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.realtime.tick_interval_ms)
    }

    /// Socket settings derived from `[realtime]`. The heartbeat timeout is
    /// twice the interval.
    pub fn socket_config(&self) -> SocketConfig {
        let heartbeat = Duration::from_secs(self.realtime.heartbeat_secs);
        SocketConfig {
            heartbeat_interval: heartbeat,
            heartbeat_timeout: heartbeat * 2,
            first_connect_heap: self.realtime.first_connect_heap,
            steady_state_heap: self.realtime.steady_state_heap,
            ..SocketConfig::default()
        }
    }

    /// Where the identity file lives for this config.
    pub fn identity_path(&self) -> PathBuf {
        self.device
            .identity_path
            .clone()
            .unwrap_or_else(default_identity_path)
    }
}

// ── File paths ──────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "beacon", "beacon")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the persisted identity.
pub fn default_identity_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("identity.toml"),
        |dirs| dirs.data_dir().join("identity.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("beacon");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load config from `path` + environment. A missing file is not an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("BEACON_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    tracing::debug!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Secret resolution ───────────────────────────────────────────────

/// Env var named by `env_name` first, then the plaintext value. Blank
/// values count as unset.
fn resolve_secret(env_name: Option<&str>, plaintext: Option<&str>) -> Option<SecretString> {
    if let Some(name) = env_name {
        if let Ok(val) = std::env::var(name) {
            if !val.trim().is_empty() {
                return Some(SecretString::from(val.trim().to_owned()));
            }
        }
    }

    plaintext
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| SecretString::from(v.to_owned()))
}

pub fn resolve_anon_key(settings: &RealtimeSettings) -> Option<SecretString> {
    resolve_secret(
        settings.anon_key_env.as_deref(),
        settings.anon_key.as_deref(),
    )
}

pub fn resolve_access_token(settings: &RealtimeSettings) -> Option<SecretString> {
    resolve_secret(
        settings.access_token_env.as_deref(),
        settings.access_token.as_deref(),
    )
}
