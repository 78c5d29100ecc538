//! peerchat
//!
//! Direct peer-to-peer chat in the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use peer::config::Config;
use peer::{spawn_chat, ChatHandle, ConsoleRenderer, Host, Identity, InputHub};
use rand::rngs::OsRng;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// peerchat - direct peer-to-peer chat over authenticated QUIC streams.
///
/// Without a destination the peer prints its address and waits for
/// someone to dial it. With a destination it dials that peer.
#[derive(Parser, Debug)]
#[command(name = "peerchat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// UDP port to listen on (0 picks a free port)
    #[arg(short, long, visible_alias = "sp", value_name = "PORT")]
    pub port: Option<u16>,

    /// Address of the peer to dial, as printed by that peer
    #[arg(short, long, visible_alias = "dest", value_name = "ADDR")]
    pub destination: Option<String>,

    /// Display name attached to your messages
    #[arg(short, long, value_name = "NAME")]
    pub name: Option<String>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Environment first, then flags
    config.apply_env_overrides();
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(name) = &cli.name {
        config.user.name = name.clone();
    }

    // Initialize tracing
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.log_level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.to_lowercase()))
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;

    let identity = Identity::generate(&mut OsRng).context("Failed to generate identity")?;
    tracing::info!("Identity fingerprint: {}", identity.fingerprint());

    let host = Arc::new(
        Host::listen(identity, &config.network)
            .await
            .context("Failed to start endpoint")?,
    );

    let cancel = CancellationToken::new();
    let input = Arc::new(InputHub::stdin(cancel.clone()));
    let user = config.user.to_user();

    // Inbound sessions are accepted in both modes
    let accept_loop = host.serve(
        {
            let user = user.clone();
            let input = Arc::clone(&input);
            let cancel = cancel.clone();
            move |session| {
                let handle = spawn_chat(
                    session,
                    user.clone(),
                    input.subscribe(),
                    ConsoleRenderer::stdout(),
                    &cancel,
                );
                tokio::spawn(watch_session(handle));
            }
        },
        cancel.clone(),
    );

    match &cli.destination {
        Some(destination) => {
            let session = match host.dial(destination).await {
                Ok(session) => session,
                Err(e) => {
                    cancel.cancel();
                    host.close().await;
                    return Err(e).with_context(|| format!("Failed to dial {}", destination));
                }
            };

            println!("Connected to {}", destination);
            let handle = spawn_chat(
                session,
                user,
                input.subscribe(),
                ConsoleRenderer::stdout(),
                &cancel,
            );
            tokio::spawn(watch_session(handle));
        }
        None => {
            let address = host.local_peer_address();
            println!("Your address: {}", address);
            println!("Run 'peerchat -d {}' on another console.", address);
            println!("Replace 127.0.0.1 with a reachable IP to chat across machines.");
            println!("Waiting for incoming connection...");
        }
    }

    wait_for_shutdown_signal()
        .await
        .context("Failed to install signal handlers")?;

    tracing::info!("Shutting down");
    cancel.cancel();
    host.close().await;
    if let Err(e) = accept_loop.await {
        tracing::warn!("Accept loop ended abnormally: {}", e);
    }

    Ok(())
}

/// Logs how a session ended.
async fn watch_session(handle: ChatHandle) {
    let id = handle.id().clone();
    match handle.join().await {
        Ok(outcome) => tracing::info!(
            session = %id,
            reader = ?outcome.reader,
            writer = ?outcome.writer,
            "Session ended"
        ),
        Err(e) => tracing::error!(session = %id, "Session task panicked: {}", e),
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C");
    Ok(())
}
