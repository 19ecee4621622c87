//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use beacon_config::ConfigError;
use beacon_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Failed to load configuration")]
    #[diagnostic(
        code(beacon::config),
        help(
            "Check the file at {path}.\n\
             Environment overrides use BEACON_<SECTION>__<KEY>, e.g. BEACON_REALTIME__SERVICE_URL."
        )
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("Identity file error")]
    #[diagnostic(code(beacon::identity))]
    Identity(#[source] ConfigError),

    // ── Core ─────────────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(beacon::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(beacon::core))]
    Core(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(beacon::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render TOML: {0}")]
    #[diagnostic(code(beacon::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::Identity(_) => exit_code::CONFIG,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidIdentity { field, reason } => CliError::Validation {
                field: field.into(),
                reason,
            },
            other => CliError::Core(other),
        }
    }
}
