//! Config validate command handler.

use anyhow::{Context, Result};

use clawgate::config::{validate_config, validate_raw, Config, Diagnostic, DiagnosticLevel};

use super::ConfigAction;

/// Returns `false` when errors were found.
pub(crate) fn cmd_config(action: ConfigAction) -> Result<bool> {
    match action {
        ConfigAction::Validate => {
            let config_path = Config::path();
            println!("Config file: {}", config_path.display());

            if !config_path.exists() {
                println!("[OK] No config file found (using defaults)");
                return Ok(true);
            }

            let content =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            let diagnostics = diagnose(&content);
            for diag in &diagnostics {
                println!("{}", diag);
            }

            let errors = count(&diagnostics, DiagnosticLevel::Error);
            let warnings = count(&diagnostics, DiagnosticLevel::Warn);
            if errors == 0 && warnings == 0 {
                println!("\nConfiguration looks good!");
            } else {
                println!("\nFound {} error(s), {} warning(s)", errors, warnings);
            }
            Ok(errors == 0)
        }
    }
}

/// Field-name checks on the raw JSON, then semantic checks on the typed config.
fn diagnose(content: &str) -> Vec<Diagnostic> {
    let raw: serde_json::Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => return vec![Diagnostic::error("", format!("Invalid JSON: {}", e))],
    };

    let mut diagnostics = validate_raw(&raw);
    match serde_json::from_value::<Config>(raw) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic::error("", format!("Invalid config: {}", e))),
    }
    diagnostics
}

fn count(diagnostics: &[Diagnostic], level: DiagnosticLevel) -> usize {
    diagnostics.iter().filter(|d| d.level == level).count()
}
