//! An autonomous Zappy player.
//!
//! Each process is one in-game player. The first agent of a team takes the
//! survivor role: it stays at level 1, hoards food and spawns teammates into
//! the open slots. Every spawned agent becomes a leveler and works the
//! elevation ritual, coordinating with same-level peers over the server's
//! broadcast channel.

use std::process::ExitCode;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod args;
mod spawner;
mod strategy;
mod team;
mod world;

fn main() -> ExitCode {
    let arguments = args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(arguments) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(1)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn run(arguments: args::Args) -> anyhow::Result<()> {
    let config = args::AgentConfig::new(arguments);

    //
    // Open the connection and perform the handshake.
    //

    let (client, handshake) =
        api::ZappyClient::connect(&config.host, config.port, &config.team_name)
            .await
            .context("failed to connect to the server")?;

    //
    // Run the strategy loop until death, a lost connection or a signal.
    //

    let mut agent = strategy::Agent::new(client, &handshake, config);

    tokio::select! {
        result = agent.run() => result.context("connection to the server lost")?,
        _ = shutdown_signal() => info!("interrupted, shutting down"),
    }

    agent.sweep_children();
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(_) => return std::future::pending().await,
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
