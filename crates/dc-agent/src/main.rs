//! deskconn Agent Daemon
//!
//! Serves remote shells and device pairing over the remote-call transport.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dc_agent::rpc::{Router, RpcServer};
use dc_agent::AgentState;
use dc_core::config::{self, AgentConfig};

#[derive(Parser)]
#[command(name = "deskconnd")]
#[command(about = "deskconn agent - remote shells and device pairing")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Directory for keys and pairing state (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("deskconn agent starting...");

    let mut config: AgentConfig = match &args.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => {
            let path = config::default_config_path();
            config::load_or_default(&path)
                .with_context(|| format!("Failed to load config from {:?}", path))?
        }
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AgentState::new(config));

    // Identity problems are fatal at startup rather than at first exchange
    let identity = state.identity.clone();
    let (agent_key, authorized) = tokio::task::spawn_blocking(move || {
        let key = identity.ensure_identity()?;
        let authorized = identity.authorized_keys()?;
        Ok::<_, dc_core::error::IdentityError>((key, authorized))
    })
    .await
    .context("Identity task failed")?
    .context("Failed to load agent identity")?;

    tracing::info!("Agent public key: {}", agent_key);
    tracing::info!("{} authorized device keys", authorized.len());
    tracing::info!("Shell: {}", state.config.resolve_shell());

    let shutdown = CancellationToken::new();
    let server = RpcServer::bind(&bind_address, Arc::new(Router::new(Arc::clone(&state))))
        .await?
        .with_shutdown_token(shutdown.clone());

    tokio::spawn(wait_for_shutdown(shutdown));

    server.run().await?;

    tracing::info!("deskconn agent stopped");
    Ok(())
}

async fn wait_for_shutdown(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
    token.cancel();
}
