//! `cluster` runs one node of the cluster: the registry or a channel.

mod cli;
mod config;
mod console;
mod fault;
mod logging;
mod signals;

use anyhow::{Context, Result};
use channel_server::{ChannelContext, ChannelDeps, ChannelServer, FileStateStore, SharedStateStore, StdProcessExit};
use clap::Parser;
use cli::{ChannelArgs, CliArgs, RegistryArgs, Role};
use cluster_protocol::{MemoryAccountStore, TokioSleeper};
use config::{ChannelAppConfig, LoggingSettings, RegistryAppConfig};
use fault::FaultCleanup;
use registry_server::RegistryServer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// How long a stopping node waits for its accept loop to wind down.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    let result = match args.role {
        Role::Registry(ref role) => run_registry(role, &args).await,
        Role::Channel(ref role) => run_channel(role, &args).await,
    };

    if let Err(e) = result {
        error!("❌ {:#}", e);
        eprintln!("❌ Failed: {e:#}");
        std::process::exit(fault::FAULT_EXIT_CODE);
    }
}

fn apply_logging_overrides(logging: &mut LoggingSettings, args: &CliArgs) {
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    if args.json_logs {
        logging.json_format = true;
    }
}

async fn run_registry(role: &RegistryArgs, args: &CliArgs) -> Result<()> {
    let mut config = RegistryAppConfig::load_from_file(&role.config)
        .await
        .with_context(|| format!("loading {}", role.config.display()))?;
    if let Some(bind) = role.bind {
        config.registry.bind_address = bind;
    }
    apply_logging_overrides(&mut config.logging, args);
    config.validate().context("Configuration validation failed")?;
    logging::setup_logging(&config.logging)?;

    info!("🌟 Registry node v{}", env!("CARGO_PKG_VERSION"));
    info!("📂 Config: {}", role.config.display());

    let accounts = Arc::new(MemoryAccountStore::with_accounts(config.accounts));
    let server = Arc::new(RegistryServer::new(config.registry, accounts));
    let listener = server.bind()?;

    let stopping = server.clone();
    FaultCleanup::new()
        .step("stop accepting", move || stopping.shutdown())
        .install();

    let console = console::spawn_console(registry_server::console::console_commands(server.clone()));
    let serving = server.clone();
    let mut serve_task = tokio::spawn(async move { serving.serve(listener).await });

    info!("🛑 Press Ctrl+C to shut down");
    tokio::select! {
        signal = signals::wait_for_termination() => {
            signals::stop_node("registry", signal?, || server.shutdown(), &mut serve_task, STOP_GRACE).await?;
        }
        joined = &mut serve_task => joined??,
    }

    console.abort();
    info!("👋 Registry stopped");
    Ok(())
}

async fn run_channel(role: &ChannelArgs, args: &CliArgs) -> Result<()> {
    let mut config = ChannelAppConfig::load_from_file(&role.config)
        .await
        .with_context(|| format!("loading {}", role.config.display()))?;
    if let Some(bind) = role.bind {
        config.channel.bind_address = bind;
    }
    if let Some(registry) = &role.registry {
        config.channel.registry_address = registry.clone();
    }
    if let Some(name) = &role.name {
        config.channel.node_name = name.clone();
    }
    apply_logging_overrides(&mut config.logging, args);
    config.validate().context("Configuration validation failed")?;
    logging::setup_logging(&config.logging)?;

    info!("🌟 Channel node {} v{}", config.channel.full_name(), env!("CARGO_PKG_VERSION"));
    info!("📂 Config: {}", role.config.display());

    let store = Arc::new(
        FileStateStore::open(config.channel.state_file.clone())
            .with_context(|| format!("loading {}", config.channel.state_file.display()))?,
    );
    info!("💾 Loaded {} shared variable(s)", store.len());

    let deps = ChannelDeps {
        accounts: Arc::new(MemoryAccountStore::with_accounts(config.accounts)),
        store: store.clone(),
        exit: Arc::new(StdProcessExit),
        sleeper: Arc::new(TokioSleeper),
    };
    let context = ChannelContext::new(config.channel, deps);
    let server = Arc::new(ChannelServer::new(context.clone()));

    let stop = server.stop_signal();
    let saving = store.clone();
    FaultCleanup::new()
        .step("stop accepting", move || {
            let _ = stop.send(());
        })
        .step("save shared state", move || {
            if let Err(e) = saving.save() {
                error!("Failed to save shared state: {}", e);
            }
        })
        .install();

    let console = console::spawn_console(channel_server::console::console_commands(context));
    let running = server.clone();
    let mut server_task = tokio::spawn(async move { running.start().await });

    info!("🛑 Press Ctrl+C to shut down");
    tokio::select! {
        signal = signals::wait_for_termination() => {
            signals::stop_node("channel", signal?, || server.shutdown(), &mut server_task, STOP_GRACE).await?;
            store.save()?;
        }
        joined = &mut server_task => joined??,
    }

    console.abort();
    info!("👋 Channel stopped");
    Ok(())
}
