mod providers;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chorus_channels::{Channel, ViewerHub, WebChannel};
use chorus_config::{find_config_path, load_config, resolve_path, save_config, Config};
use chorus_core::persist::read_snapshot;
use chorus_core::{
    Agent, InboundMessage, Relay, RelayBuilder, RelaySettings, RoleStore, SnapshotPersister,
};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "chorus", about = "Real-time multi-agent chat relay", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay and the viewer gateway
    Serve,
    /// Write a starter config file
    Onboard {
        /// Skip interactive prompts and write defaults
        #[arg(long)]
        non_interactive: bool,
    },
    /// Show configuration, agents and saved conversation
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = format!("{base_filter},chorus_core=debug");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(find_config_path);

    match cli.command {
        Commands::Onboard { non_interactive } => run_onboard(&config_path, non_interactive),
        Commands::Status => run_status(&config_path),
        Commands::Serve => {
            let config = load_config(&config_path)?;
            run_gateway(&config).await
        }
    }
}

/// Dump the conversation and exit on any panic. The default hook still
/// prints the panic first.
fn install_crash_handler(relay: Relay) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        tracing::error!("Fatal fault: {info}");
        match relay.crash_dump() {
            Some(path) => tracing::error!("Conversation dumped to {}", path.display()),
            None => tracing::error!("No crash dump written"),
        }
        std::process::exit(1);
    }));
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!("Failed to install SIGTERM handler: {e}"),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

async fn run_gateway(config: &Config) -> Result<()> {
    tracing::info!("Starting gateway...");

    let registry = providers::build_registry(config);

    let persistence = &config.persistence;
    let persister = Arc::new(SnapshotPersister::new(
        resolve_path(&persistence.path),
        resolve_path(&persistence.crash_path),
        Duration::from_secs(persistence.idle_save_secs),
    ));
    let history = if persistence.restore_on_start {
        match persister.load() {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    "Could not restore conversation from {}: {e}",
                    persister.path().display()
                );
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let hub = Arc::new(ViewerHub::new());
    let relay = RelayBuilder::new(RelaySettings::from_config(config), registry)
        .broadcaster(hub.clone())
        .persister(persister)
        .roles(RoleStore::open(&resolve_path(&persistence.roles_path)))
        .history(history)
        .build();

    install_crash_handler(relay.clone());
    relay.start_background().await;
    if config.scheduler.auto_start {
        relay.start().await;
    }

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let web = WebChannel::new(config.gateway.clone(), relay.clone(), hub);
    web.start(inbound_tx).await?;

    tracing::info!("Gateway running. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            msg = inbound_rx.recv() => match msg {
                Some(input) => relay.handle_input(input).await,
                None => {
                    tracing::info!("Inbound channel closed");
                    break;
                }
            },
            _ = shutdown_signal() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    let grace = Duration::from_secs(config.gateway.shutdown_grace_secs);
    let teardown = async {
        if let Err(e) = web.stop().await {
            tracing::warn!("Failed to stop {} channel: {e}", web.name());
        }
        relay.shutdown().await;
    };
    if tokio::time::timeout(grace, teardown).await.is_err() {
        tracing::error!(
            "Shutdown did not finish within {}s, forcing exit",
            grace.as_secs()
        );
        std::process::exit(1);
    }

    tracing::info!("Gateway stopped");
    Ok(())
}

fn prompt_with_default(prompt: &str, default: &str) -> Result<String> {
    use std::io::{self, Write};
    print!("{prompt} [{default}]: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

/// Write a config with the default roster, optionally asking for API keys.
fn run_onboard(config_path: &Path, non_interactive: bool) -> Result<()> {
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        println!("To reset, delete it and run `chorus onboard` again.");
        return Ok(());
    }

    let mut cfg = Config::default();
    if !non_interactive {
        println!("Interactive setup (leave a key empty to use its environment variable)");
        let mut providers: Vec<String> = cfg
            .agents
            .roster
            .iter()
            .map(|a| a.provider.clone())
            .collect();
        providers.dedup();
        for provider in providers {
            let key = prompt_with_default(&format!("{provider} API key"), "")?;
            if key.is_empty() {
                continue;
            }
            let entry = chorus_config::ProviderConfig {
                api_key: Some(key),
                api_base: None,
            };
            match provider.as_str() {
                "anthropic" => cfg.providers.anthropic = Some(entry),
                "openai" => cfg.providers.openai = Some(entry),
                "gemini" => cfg.providers.gemini = Some(entry),
                "deepseek" => cfg.providers.deepseek = Some(entry),
                _ => {}
            }
        }
        let port = prompt_with_default("Gateway port", &cfg.gateway.port.to_string())?;
        cfg.gateway.port = port
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid port '{port}': {e}"))?;
    }

    save_config(config_path, &cfg)?;
    println!("Created config: {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to adjust agents and roles", config_path.display());
    println!("  2. Run `chorus serve` and connect a viewer to ws://localhost:{}/ws", cfg.gateway.port);
    Ok(())
}

/// Show configuration, which agents would be admitted, and the saved
/// conversation.
fn run_status(config_path: &Path) -> Result<()> {
    println!("chorus status");
    println!();

    if config_path.exists() {
        println!("  Config:    {} (found)", config_path.display());
    } else {
        println!(
            "  Config:    {} (not found, using defaults; run `chorus onboard`)",
            config_path.display()
        );
    }
    let config = load_config(config_path)?;

    println!(
        "  Gateway:   {}:{}",
        config.gateway.host, config.gateway.port
    );
    println!(
        "  Pacing:    {}-{}ms between turns, {}ms response timeout",
        config.scheduler.min_delay_ms,
        config.scheduler.max_delay_ms,
        config.scheduler.response_timeout_ms
    );
    println!();

    println!("  Agents:");
    for spec in &config.agents.roster {
        let state = match providers::build_agent(spec, &config) {
            Ok(agent) => match agent.availability() {
                Ok(()) => "ready".to_string(),
                Err(reason) => format!("unavailable: {reason}"),
            },
            Err(e) => format!("invalid: {e}"),
        };
        println!(
            "    {} ({} / {}): {state}",
            spec.name, spec.provider, spec.model
        );
    }
    println!();

    let snapshot_path = resolve_path(&config.persistence.path);
    match read_snapshot(&snapshot_path) {
        Ok(records) if records.is_empty() => {
            println!("  Snapshot:  {} (empty)", snapshot_path.display());
        }
        Ok(records) => {
            println!(
                "  Snapshot:  {} ({} messages)",
                snapshot_path.display(),
                records.len()
            );
        }
        Err(e) => println!("  Snapshot:  {} (unreadable: {e})", snapshot_path.display()),
    }
    let crash_path = resolve_path(&config.persistence.crash_path);
    if crash_path.exists() {
        println!("  Crash dump present: {}", crash_path.display());
    }

    Ok(())
}
