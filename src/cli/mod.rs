//! CLI module - command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod agent;
pub mod common;
pub mod config;
pub mod gateway;
pub mod models;
pub mod status;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "clawgate")]
#[command(version)]
#[command(about = "Personal AI agent gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Talk to the agent (REPL when no message is given)
    Agent {
        /// Message to process (non-interactive mode)
        #[arg(short, long)]
        message: Option<String>,
        /// Session key to continue
        #[arg(short, long, default_value = common::CLI_SESSION)]
        session: String,
        /// Model alias to pin this session to
        #[arg(long)]
        model: Option<String>,
    },
    /// Start channels, cron, the agent loop and the web API
    Gateway,
    /// Manage the model list
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Show system status
    Status,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ModelsAction {
    /// List configured models
    List,
    /// Add a model, or replace the one with the same alias
    Add {
        /// Model as `vendor/model-id` (a bare id is assumed to be openai)
        model: String,
        /// Alias (defaults to the model id)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        api_base: Option<String>,
    },
    /// Change fields of an existing model
    Edit {
        /// Alias of the model to edit
        name: String,
        /// New `vendor/model-id`
        #[arg(long)]
        model: Option<String>,
        /// New alias
        #[arg(long)]
        rename: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        /// New endpoint; an empty value clears it
        #[arg(long)]
        api_base: Option<String>,
    },
    /// Remove a model by alias
    Remove { name: String },
    /// Set the default model
    Default { name: String },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Check the config file for unknown fields and invalid models
    Validate,
}

pub async fn run() -> Result<()> {
    // Logging settings come from the config; a broken config still gets
    // default logging so the error below can be reported.
    let logging_cfg = clawgate::config::Config::load()
        .map(|c| c.logging)
        .unwrap_or_default();
    clawgate::utils::logging::init_logging(&logging_cfg);

    let cli = Cli::parse();

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => cmd_version(),
        Some(Commands::Agent {
            message,
            session,
            model,
        }) => {
            agent::cmd_agent(message, session, model).await?;
        }
        Some(Commands::Gateway) => {
            gateway::cmd_gateway().await?;
        }
        Some(Commands::Models { action }) => {
            models::cmd_models(action)?;
        }
        Some(Commands::Status) => {
            status::cmd_status().await?;
        }
        Some(Commands::Config { action }) => {
            let ok = config::cmd_config(action)?;
            if !ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn cmd_version() {
    println!("clawgate {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Personal AI agent gateway");
}
