use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wick_agent::{AgentConfig, CandleController, ClientAgent};
use wick_effects::{LedLink, SimLink};
use wick_hub::HubConfig;

#[derive(Parser)]
#[command(name = "wick", about = "Candlestick fleet hub and device agent", version)]
struct Cli {
    /// Log level when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the central hub.
    Hub {
        /// Address to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a device agent.
    Agent {
        /// WebSocket URL of the hub, e.g. ws://localhost:8000.
        #[arg(long)]
        hub_url: Option<String>,
        /// Identifier of this candlestick.
        #[arg(long)]
        device_id: Option<String>,
        /// Seconds without a command before resetting to defaults.
        #[arg(long)]
        inactivity_timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    match cli.command {
        CliCommand::Hub { host, port } => run_hub(host, port).await,
        CliCommand::Agent {
            hub_url,
            device_id,
            inactivity_timeout,
        } => run_agent(hub_url, device_id, inactivity_timeout).await,
    }
}

async fn run_hub(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = HubConfig::from_env();
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let handle = wick_hub::start(config).await?;
    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;
    Ok(())
}

async fn run_agent(
    hub_url: Option<String>,
    device_id: Option<String>,
    inactivity_timeout: Option<u64>,
) -> anyhow::Result<()> {
    let mut config = AgentConfig::from_env();
    if let Some(url) = hub_url {
        config.hub_url = url;
    }
    if let Some(id) = device_id {
        config.device_id = id;
    }
    if let Some(secs) = inactivity_timeout {
        config.inactivity_timeout = std::time::Duration::from_secs(secs);
    }
    let inactivity_timeout = config.inactivity_timeout;
    info!(hub_url = %config.hub_url, device_id = %config.device_id, "starting agent");

    let (controller, observed) =
        CandleController::new(|| Box::new(SimLink::new()) as Box<dyn LedLink>);
    controller.start_default_program().await;

    let agent = ClientAgent::new(config, Arc::clone(&controller));
    let status = agent.status_sender();
    let shutdown = agent.shutdown_token();

    let reconciler = wick_agent::start_reconciler(
        Arc::clone(&controller),
        observed,
        status.clone(),
        shutdown.child_token(),
    );
    let watchdog = wick_agent::start_watchdog(
        Arc::clone(&controller),
        status,
        inactivity_timeout,
        shutdown.child_token(),
    );
    let run = tokio::spawn(agent.run());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();
    let _ = run.await;
    let _ = reconciler.await;
    let _ = watchdog.await;
    controller.shutdown().await;
    Ok(())
}
