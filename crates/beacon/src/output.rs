//! Output formatting: key/value tables, JSON, and the live command feed.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use beacon_core::Command;

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// One row of a two-column detail table.
#[derive(Debug, Serialize, Tabled)]
pub struct Field {
    #[tabled(rename = "Field")]
    pub name: &'static str,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl Field {
    pub fn new(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }

    pub fn optional(name: &'static str, value: Option<&str>) -> Self {
        Self::new(name, value.unwrap_or("-"))
    }
}

/// Render `data` as a table of `rows` or as JSON.
pub fn render_detail<T: Serialize>(
    format: &OutputFormat,
    data: &T,
    rows: &[Field],
) -> Result<String, CliError> {
    match format {
        OutputFormat::Table => Ok(Table::new(rows).with(Style::rounded()).to_string()),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(data)?),
    }
}

pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

#[derive(Serialize)]
struct CommandLine<'a> {
    received_at: String,
    #[serde(flatten)]
    command: &'a Command,
}

/// Emit an accepted command as one JSON line, prefixed with a marker when
/// color is on.
pub fn print_command(command: &Command, color: bool) -> Result<(), CliError> {
    let line = serde_json::to_string(&CommandLine {
        received_at: chrono::Utc::now().to_rfc3339(),
        command,
    })?;
    let mut stdout = io::stdout().lock();
    if color {
        writeln!(stdout, "{} {line}", "▶".bright_cyan().bold())?;
    } else {
        writeln!(stdout, "{line}")?;
    }
    Ok(())
}
