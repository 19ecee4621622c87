//! Config subcommand handlers.

use beacon_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::commands::{config_file, load_config};
use crate::error::CliError;
use crate::output;

const SECRET_KEYS: [&str; 2] = ["anon_key", "access_token"];

/// Resolved config as a TOML value with plaintext secrets masked.
fn redacted(cfg: &Config) -> Result<toml::Value, CliError> {
    let mut value = toml::Value::try_from(cfg)?;
    if let Some(realtime) = value
        .get_mut("realtime")
        .and_then(toml::Value::as_table_mut)
    {
        for key in SECRET_KEYS {
            if let Some(secret) = realtime.get_mut(key) {
                *secret = toml::Value::String("****".into());
            }
        }
    }
    Ok(value)
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config_file(global).display().to_string());
        }
        ConfigCommand::Show => {
            let cfg = load_config(global)?;
            let value = redacted(&cfg)?;
            let rendered = match global.output {
                OutputFormat::Table => toml::to_string_pretty(&value)?,
                OutputFormat::Json => serde_json::to_string_pretty(&value)?,
            };
            output::print_output(&rendered);
        }
    }
    Ok(())
}
