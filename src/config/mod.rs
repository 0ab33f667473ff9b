//! Configuration management for Clawgate
//!
//! Configuration is loaded from `~/.clawgate/config.json`, then `.env` and
//! `CLAWGATE_*` environment variables are applied on top.

mod types;
pub mod validate;

pub use types::*;
pub use validate::{validate_config, validate_raw, Diagnostic, DiagnosticLevel};

use crate::error::{ClawgateError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

impl Config {
    /// Returns the Clawgate configuration directory path (~/.clawgate)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".clawgate")
    }

    /// Returns the path to the config file (~/.clawgate/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// A `.env` file in the working directory is read first, if present.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env");
        }
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from `path`; a missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                ClawgateError::Config(format!("invalid config {}: {}", path.display(), e))
            })?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `CLAWGATE_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("CLAWGATE_AGENTS_MODEL_NAME") {
            self.agents.defaults.model_name = val;
        }
        if let Some(v) = lookup("CLAWGATE_AGENTS_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.agents.defaults.max_tokens = v;
        }
        if let Some(v) =
            lookup("CLAWGATE_AGENTS_MAX_TOOL_ITERATIONS").and_then(|v| v.parse().ok())
        {
            self.agents.defaults.max_tool_iterations = v;
        }
        if let Some(val) = lookup("CLAWGATE_GATEWAY_HOST") {
            self.gateway.host = val;
        }
        if let Some(v) = lookup("CLAWGATE_GATEWAY_PORT").and_then(|v| v.parse().ok()) {
            self.gateway.port = v;
        }
        if let Some(val) = lookup("CLAWGATE_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::path())
    }

    /// Save configuration as pretty JSON, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the model list and gateway settings.
    ///
    /// All problems are collected into a single `Config` error.
    pub fn validate(&self) -> Result<()> {
        let errors: Vec<String> = validate_config(self)
            .into_iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .map(|d| d.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ClawgateError::Config(errors.join("; ")))
        }
    }

    /// Copy with every API key and token masked, for display.
    pub fn masked(&self) -> Self {
        let mut out = self.clone();
        for model in &mut out.model_list {
            model.api_key = mask_secret(&model.api_key);
        }
        if let Some(webhook) = out.channels.webhook.as_mut() {
            webhook.auth_token = webhook.auth_token.as_deref().map(mask_secret);
        }
        out
    }

    /// Put back secrets that arrive still masked, taking them from `current`.
    ///
    /// Lets a client send back what [`masked`](Self::masked) returned without
    /// wiping the stored keys. Models are matched by alias.
    pub fn restore_masked(&mut self, current: &Config) {
        for model in &mut self.model_list {
            if let Some(old) = current
                .model_list
                .iter()
                .find(|m| m.model_name == model.model_name)
            {
                if !old.api_key.is_empty() && model.api_key == mask_secret(&old.api_key) {
                    model.api_key = old.api_key.clone();
                }
            }
        }
        let old_token = current
            .channels
            .webhook
            .as_ref()
            .and_then(|w| w.auth_token.clone());
        if let (Some(webhook), Some(old)) = (self.channels.webhook.as_mut(), old_token) {
            if webhook.auth_token.as_deref() == Some(mask_secret(&old).as_str()) {
                webhook.auth_token = Some(old);
            }
        }
    }

    /// Alias of the default model, falling back to the first configured one.
    pub fn default_model_name(&self) -> Option<&str> {
        let wanted = self.agents.defaults.model_name.trim();
        if !wanted.is_empty() {
            return Some(wanted);
        }
        self.model_list.first().map(|m| m.model_name.as_str())
    }
}
