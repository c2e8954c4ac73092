//! Output formatting utilities

use anyhow::{Context, Result};
use colored::Colorize;
use is_terminal::IsTerminal;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Set up color output based on user preference
pub fn setup_colors(mode: &str) {
    match mode.to_lowercase().as_str() {
        "always" => colored::control::set_override(true),
        "never" => colored::control::set_override(false),
        _ => colored::control::set_override(std::io::stderr().is_terminal()),
    }
}

/// Format an error for display
pub fn format_error(error: &anyhow::Error) -> String {
    let mut message = format!("{} {}", "Error:".red().bold(), error);
    for cause in error.chain().skip(1) {
        message.push_str(&format!("\n  {} {}", "caused by:".yellow(), cause));
    }
    message
}

/// Format a warning for display
pub fn format_warning(warning: &str) -> String {
    format!("{} {}", "Warning:".yellow().bold(), warning)
}

/// Format a success message for display
pub fn format_success(message: &str) -> String {
    format!("{} {}", "Success:".green().bold(), message)
}

/// Format JSON value for output
pub fn format_json(value: &Value, pretty: bool) -> Result<String> {
    if pretty {
        serde_json::to_string_pretty(value).context("failed to serialize JSON")
    } else {
        serde_json::to_string(value).context("failed to serialize JSON")
    }
}

/// Write a JSON document to a file or stdout
pub fn print_json(value: &Value, pretty: bool, output_file: Option<&Path>) -> Result<()> {
    let content = format_json(value, pretty)?;
    match output_file {
        Some(path) => {
            fs::write(path, content).with_context(|| format!("failed to write output file: {}", path.display()))?;
            eprintln!("{}", format_success(&format!("output written to {}", path.display())));
        }
        None => println!("{}", content),
    }
    Ok(())
}
