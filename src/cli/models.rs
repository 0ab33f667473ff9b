//! Model list management (`clawgate models ...`).

use std::path::Path;

use anyhow::{bail, Context, Result};

use clawgate::config::{Config, ModelConfig};

use super::ModelsAction;

pub(crate) fn cmd_models(action: ModelsAction) -> Result<()> {
    let path = Config::path();
    match action {
        ModelsAction::List => {
            let config = Config::load_from_path(&path)
                .with_context(|| "Failed to load configuration")?;
            print_models(&config);
        }
        ModelsAction::Add {
            model,
            name,
            api_key,
            api_base,
        } => {
            let entry = build_model(&model, name, api_key, api_base);
            let alias = entry.model_name.clone();
            let replaced = update_config(&path, |config| add_model(config, entry))?;
            if replaced {
                println!("Updated model '{}'", alias);
            } else {
                println!("Added model '{}'", alias);
            }
        }
        ModelsAction::Edit {
            name,
            model,
            rename,
            api_key,
            api_base,
        } => {
            let changes = ModelEdit {
                model,
                rename,
                api_key,
                api_base,
            };
            let edited = update_config(&path, |config| edit_model(config, &name, changes))?;
            println!("Updated model '{}' ({})", edited.model_name, edited.model);
        }
        ModelsAction::Remove { name } => {
            update_config(&path, |config| remove_model(config, &name))?;
            println!("Removed model '{}'", name);
        }
        ModelsAction::Default { name } => {
            update_config(&path, |config| set_default(config, &name))?;
            println!("Default model is now '{}'", name);
        }
    }
    Ok(())
}

fn update_config<T>(path: &Path, f: impl FnOnce(&mut Config) -> Result<T>) -> Result<T> {
    let mut config =
        Config::load_from_path(path).with_context(|| "Failed to load configuration")?;
    let out = f(&mut config)?;
    config
        .save_to_path(path)
        .with_context(|| format!("Failed to save {}", path.display()))?;
    Ok(out)
}

fn print_models(config: &Config) {
    if config.model_list.is_empty() {
        println!("No models configured.");
        return;
    }
    let default = config.default_model_name();
    println!("{:<2} {:<20} {:<40} {}", "", "NAME", "MODEL", "API KEY");
    for m in &config.model_list {
        let marker = if default == Some(m.model_name.as_str()) {
            "*"
        } else {
            ""
        };
        let key = match m.masked_api_key() {
            k if k.is_empty() => "-".to_string(),
            k => k,
        };
        println!("{:<2} {:<20} {:<40} {}", marker, m.model_name, m.model, key);
    }
}

fn build_model(
    model: &str,
    name: Option<String>,
    api_key: Option<String>,
    api_base: Option<String>,
) -> ModelConfig {
    let mut entry = ModelConfig::from_model(model);
    if let Some(name) = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
        entry.model_name = name;
    }
    if let Some(key) = api_key {
        entry = entry.with_api_key(key.trim());
    }
    if let Some(base) = api_base {
        entry = entry.with_api_base(base.trim());
    }
    entry
}

/// Add `entry`, replacing a model with the same alias. Returns whether one
/// was replaced.
fn add_model(config: &mut Config, entry: ModelConfig) -> Result<bool> {
    entry.validate()?;
    if let Some(existing) = config
        .model_list
        .iter_mut()
        .find(|m| m.model_name == entry.model_name)
    {
        *existing = entry;
        return Ok(true);
    }
    config.model_list.push(entry);
    Ok(false)
}

/// Fields `models edit` may change; `None` keeps the current value.
#[derive(Debug, Default)]
struct ModelEdit {
    model: Option<String>,
    rename: Option<String>,
    api_key: Option<String>,
    api_base: Option<String>,
}

/// Apply `changes` to the model aliased `name`.
///
/// The edited entry must still validate, and a rename must not collide with
/// another alias. A default pointing at the old alias follows the rename.
fn edit_model(config: &mut Config, name: &str, changes: ModelEdit) -> Result<ModelConfig> {
    let idx = config
        .model_list
        .iter()
        .position(|m| m.model_name == name)
        .with_context(|| format!("Unknown model '{}'", name))?;

    let mut entry = config.model_list[idx].clone();
    if let Some(model) = changes.model {
        entry.model = ModelConfig::from_model(&model).model;
    }
    if let Some(alias) = changes.rename.map(|n| n.trim().to_string()) {
        if alias.is_empty() {
            bail!("Alias must not be empty");
        }
        if alias != name && config.model_list.iter().any(|m| m.model_name == alias) {
            bail!("Model '{}' already exists", alias);
        }
        entry.model_name = alias;
    }
    if let Some(key) = changes.api_key {
        entry.api_key = key.trim().to_string();
    }
    if let Some(base) = changes.api_base {
        let base = base.trim();
        entry.api_base = (!base.is_empty()).then(|| base.to_string());
    }
    entry
        .validate()
        .with_context(|| format!("Edited model '{}' is invalid", name))?;

    if config.agents.defaults.model_name == name {
        config.agents.defaults.model_name = entry.model_name.clone();
    }
    config.model_list[idx] = entry.clone();
    Ok(entry)
}

/// Remove a model; the default is cleared when it pointed at it.
fn remove_model(config: &mut Config, name: &str) -> Result<()> {
    let before = config.model_list.len();
    config.model_list.retain(|m| m.model_name != name);
    if config.model_list.len() == before {
        bail!("Unknown model '{}'", name);
    }
    if config.agents.defaults.model_name == name {
        config.agents.defaults.model_name.clear();
    }
    Ok(())
}

fn set_default(config: &mut Config, name: &str) -> Result<()> {
    if !config.model_list.iter().any(|m| m.model_name == name) {
        bail!("Unknown model '{}'", name);
    }
    config.agents.defaults.model_name = name.to_string();
    Ok(())
}
