//! Agent command handler (one-shot and interactive).

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use clawgate::agent::{DIRECT_CHANNEL, DIRECT_CHAT_ID};
use clawgate::bus::MessageBus;
use clawgate::config::Config;
use clawgate::providers::classify_error_message;

use super::common::create_agent;

/// Process one message, or run a REPL when `message` is `None`.
pub(crate) async fn cmd_agent(
    message: Option<String>,
    session: String,
    model: Option<String>,
) -> Result<()> {
    let config = Config::load().with_context(|| "Failed to load configuration")?;
    if config.model_list.is_empty() {
        eprintln!("Warning: No models configured. Add one with:");
        eprintln!("  clawgate models add openai/gpt-4o-mini --api-key sk-...");
        eprintln!("or edit {:?}", Config::path());
        eprintln!();
    }

    let bus = MessageBus::new();
    let agent = create_agent(config, bus.clone()).await?;

    if let Some(alias) = model {
        if agent.providers().resolve(&alias).await.is_none() {
            anyhow::bail!("Unknown model '{}'. See `clawgate models list`.", alias);
        }
        agent
            .sessions()
            .set_model_override(&session, Some(alias))
            .await
            .with_context(|| "Failed to pin session model")?;
    }

    let ask = |input: String| {
        let agent = agent.clone();
        let session = session.clone();
        async move {
            agent
                .process_direct_with_channel(&input, &session, DIRECT_CHANNEL, DIRECT_CHAT_ID)
                .await
        }
    };

    if let Some(msg) = message {
        match ask(msg).await {
            Ok(response) => {
                // Messages the `message` tool sent while the turn ran.
                for out in bus.drain_outbound(DIRECT_CHANNEL) {
                    println!("{}", out.content);
                }
                println!("{}", response);
            }
            Err(e) => {
                eprintln!("Error: {}", classify_error_message(&e.to_string()).user_message());
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Background results and `message` tool output for this terminal.
    let mut notices = bus.subscribe(DIRECT_CHANNEL);
    let printer = tokio::spawn(async move {
        while let Some(out) = notices.recv().await {
            println!();
            println!("{}", out.content);
            println!();
        }
    });

    println!("Clawgate Interactive Agent (session {})", session);
    println!("Type your message and press Enter. Type 'quit' or 'exit' to stop.");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "quit" || input == "exit" {
                    println!("Goodbye!");
                    break;
                }
                match ask(input.to_string()).await {
                    Ok(response) => {
                        println!();
                        println!("{}", response);
                        println!();
                    }
                    Err(e) => {
                        eprintln!(
                            "Error: {}",
                            classify_error_message(&e.to_string()).user_message()
                        );
                        eprintln!();
                    }
                }
            }
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }
    }

    agent.stop();
    printer.abort();
    Ok(())
}
