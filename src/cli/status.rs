//! Status command handler.

use anyhow::{Context, Result};

use clawgate::config::Config;
use clawgate::session::SessionManager;

pub(crate) async fn cmd_status() -> Result<()> {
    let config = Config::load().with_context(|| "Failed to load configuration")?;
    let config_path = Config::path();

    println!("Clawgate Status");
    println!("===============");
    println!();
    println!("Version:       {}", env!("CARGO_PKG_VERSION"));
    println!(
        "Config:        {} ({})",
        config_path.display(),
        if config_path.exists() { "found" } else { "defaults" }
    );
    println!(
        "Gateway:       http://{}:{}",
        config.gateway.host, config.gateway.port
    );
    println!();

    println!("Models");
    println!("------");
    if config.model_list.is_empty() {
        println!("  none configured");
    }
    let default = config.default_model_name();
    for m in &config.model_list {
        let marker = if default == Some(m.model_name.as_str()) {
            " (default)"
        } else {
            ""
        };
        let valid = match m.validate() {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("invalid: {}", e),
        };
        println!("  {} -> {}{} [{}]", m.model_name, m.model, marker, valid);
    }
    println!();

    println!("Channels");
    println!("--------");
    match config.channels.webhook.as_ref() {
        Some(w) if w.enabled => println!(
            "  webhook: enabled on {}:{}{}",
            w.bind_address, w.port, w.path
        ),
        _ => println!("  webhook: disabled"),
    }
    println!();

    let subagents = match config.subagents.limit() {
        Some(n) => n.to_string(),
        None => "unbounded".to_string(),
    };
    println!("Subagents:     max concurrent {}", subagents);
    println!("Cron jobs:     {}", config.cron.jobs.len());

    match SessionManager::new() {
        Ok(sessions) => {
            let count = sessions.list().await.map(|k| k.len()).unwrap_or(0);
            println!("Sessions:      {}", count);
        }
        Err(e) => println!("Sessions:      unavailable ({})", e),
    }

    Ok(())
}
