//! Gateway command handler (channels, cron, agent loop, web API).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use clawgate::bus::MessageBus;
use clawgate::channels::{build_channels, ChannelManager};
use clawgate::config::Config;
use clawgate::cron::Scheduler;
use clawgate::utils::string::log_field;
use clawgate::web::{self, WebState};

use super::common::create_agent;

/// Run until Ctrl+C.
pub(crate) async fn cmd_gateway() -> Result<()> {
    println!("Starting Clawgate Gateway...");

    let config = Config::load().with_context(|| "Failed to load configuration")?;
    config
        .validate()
        .with_context(|| "Configuration is invalid; run `clawgate config validate`")?;

    let bus = MessageBus::new();
    let agent = create_agent(config.clone(), bus.clone()).await?;

    let channel_manager = ChannelManager::new(bus.clone());
    for channel in build_channels(&config.channels) {
        channel_manager.register(channel).await;
    }
    channel_manager
        .start_all()
        .await
        .with_context(|| "Failed to start channels")?;
    let channels = channel_manager.running_channels().await;
    if channels.is_empty() {
        warn!("No channels running; only the web API accepts messages");
    }

    let scheduler = Arc::new(Scheduler::new(bus.clone()));
    for job in config.cron.jobs.iter().cloned() {
        let name = job.name.clone();
        if let Err(e) = scheduler.add_job(job).await {
            warn!(
                job_name = %name,
                error = %log_field("error", &e.to_string()),
                "Skipping cron job"
            );
        }
    }
    scheduler.start();

    let agent_handle = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move {
            if let Err(e) = agent.start().await {
                error!(error = %log_field("error", &e.to_string()), "Agent loop error");
            }
        })
    };

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind web API on {}", addr))?;
    let web_shutdown = CancellationToken::new();
    let web_handle = {
        let state = WebState::new(Arc::clone(&agent))
            .with_channels(channels)
            .with_config_path(Config::path());
        let token = web_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = web::serve(listener, state, async move { token.cancelled().await }).await
            {
                error!(error = %log_field("error", &e.to_string()), "Web API error");
            }
        })
    };
    info!(addr = %addr, "Gateway ready");

    println!();
    println!("Gateway is running on http://{}. Press Ctrl+C to stop.", addr);
    println!();

    tokio::signal::ctrl_c()
        .await
        .with_context(|| "Failed to listen for Ctrl+C")?;

    println!();
    println!("Shutting down...");

    web_shutdown.cancel();
    scheduler.stop();
    agent.stop();
    channel_manager
        .stop_all()
        .await
        .with_context(|| "Failed to stop channels")?;
    bus.close().await;

    let _ = tokio::time::timeout(Duration::from_secs(5), agent_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), web_handle).await;

    println!("Gateway stopped.");
    Ok(())
}
