//! Subcommand handlers.

pub mod config_cmd;
pub mod identity;
pub mod run;

use std::path::PathBuf;

use beacon_config::{Config, FileIdentityStore};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file named by `--config`, or the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(beacon_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config_file(global);
    beacon_config::load_config_from(&path).map_err(|source| CliError::Config {
        path: path.display().to_string(),
        source,
    })
}

pub fn open_identity(cfg: &Config) -> Result<FileIdentityStore, CliError> {
    FileIdentityStore::from_config(cfg).map_err(CliError::Identity)
}
