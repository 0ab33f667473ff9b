//! Configuration validation with unknown field detection.

use serde_json::Value;
use std::collections::HashSet;

use super::Config;

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "agents",
    "model_list",
    "gateway",
    "logging",
    "subagents",
    "cron",
    "channels",
];

const KNOWN_AGENTS_DEFAULTS: &[&str] = &[
    "model_name",
    "max_tokens",
    "temperature",
    "max_tool_iterations",
    "history_window",
    "provider_max_tokens",
    "system_prompt",
];

const KNOWN_MODEL_FIELDS: &[&str] = &["model_name", "model", "api_key", "api_base"];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, path, message)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Levenshtein distance, counted in chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn check_keys(
    obj: &serde_json::Map<String, Value>,
    known: &[&str],
    prefix: &str,
    out: &mut Vec<Diagnostic>,
) -> bool {
    let known_set: HashSet<&str> = known.iter().copied().collect();
    let mut clean = true;
    for key in obj.keys() {
        if known_set.contains(key.as_str()) {
            continue;
        }
        clean = false;
        let msg = match suggest_field(key, known) {
            Some(suggestion) => format!("Unknown field '{}', {}", key, suggestion),
            None => format!("Unknown field '{}'", key),
        };
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        out.push(Diagnostic::error(path, msg));
    }
    clean
}

/// Validate raw config JSON against known field names.
pub fn validate_raw(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let Some(obj) = raw.as_object() else {
        diagnostics.push(Diagnostic::error("", "Config must be a JSON object"));
        return diagnostics;
    };
    diagnostics.push(Diagnostic::new(DiagnosticLevel::Ok, "", "Valid JSON"));

    let mut clean = check_keys(obj, KNOWN_TOP_LEVEL, "", &mut diagnostics);

    if let Some(defaults) = obj
        .get("agents")
        .and_then(|v| v.get("defaults"))
        .and_then(|v| v.as_object())
    {
        clean &= check_keys(
            defaults,
            KNOWN_AGENTS_DEFAULTS,
            "agents.defaults",
            &mut diagnostics,
        );
    }

    if let Some(models) = obj.get("model_list").and_then(|v| v.as_array()) {
        for (i, model) in models.iter().enumerate() {
            if let Some(model) = model.as_object() {
                clean &= check_keys(
                    model,
                    KNOWN_MODEL_FIELDS,
                    &format!("model_list[{}]", i),
                    &mut diagnostics,
                );
            }
        }
    }

    if clean {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Ok,
            "",
            "All fields recognized",
        ));
    }

    if let Some(webhook) = obj
        .get("channels")
        .and_then(|v| v.get("webhook"))
        .and_then(|v| v.as_object())
    {
        let enabled = webhook
            .get("enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let has_token = webhook
            .get("auth_token")
            .map(|v| !v.is_null())
            .unwrap_or(false);
        if enabled && !has_token {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Warn,
                "channels.webhook.auth_token",
                "Not set, anyone who can reach the port can message the agent",
            ));
        }
    }

    diagnostics
}

/// Validate a loaded config: every model, unique aliases, default model, port.
pub fn validate_config(config: &Config) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for (i, model) in config.model_list.iter().enumerate() {
        let path = format!("model_list[{}]", i);
        if let Err(e) = model.validate() {
            diagnostics.push(Diagnostic::error(path.clone(), e.to_string()));
        }
        if !model.model_name.is_empty() && !seen.insert(model.model_name.as_str()) {
            diagnostics.push(Diagnostic::error(
                path,
                format!("duplicate model_name '{}'", model.model_name),
            ));
        }
    }

    let default = config.agents.defaults.model_name.trim();
    if !config.model_list.is_empty()
        && !default.is_empty()
        && !config
            .model_list
            .iter()
            .any(|m| m.model_name == default || m.model == default)
    {
        diagnostics.push(Diagnostic::error(
            "agents.defaults.model_name",
            format!("default model '{}' is not in model_list", default),
        ));
    }

    if config.model_list.is_empty() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "model_list",
            "No models configured",
        ));
    }

    if config.gateway.port == 0 {
        diagnostics.push(Diagnostic::error("gateway.port", "must not be 0"));
    }

    if diagnostics
        .iter()
        .all(|d| d.level != DiagnosticLevel::Error)
    {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Ok,
            "",
            format!("{} model(s) valid", config.model_list.len()),
        ));
    }

    diagnostics
}
