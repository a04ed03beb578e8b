//! Foreground daemon run loop
//!
//! Start order: pid file, context (modules + authenticator), background
//! workers, control endpoint. Runs until SIGINT or SIGTERM, then shuts the
//! context down and waits for the accept loop to finish.

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use crate::config::Config;
use crate::context::AppContext;
use crate::rpc::RpcServer;

pub mod pid_file;

pub use pid_file::{kill_running, process_alive, read_pid, PidFile};

/// Run the session manager until a termination signal arrives
pub async fn run(config: Config) -> Result<()> {
    let _pid_file = PidFile::acquire(&config.server.pid_file)?;

    let ctx = AppContext::from_config(config)?;
    ctx.start_background()?;

    let server = RpcServer::bind(ctx.clone())?;
    info!("Listening on {}", server.endpoint().display());
    info!("Registered modules: {:?}", ctx.modules.module_names());

    let server_task = tokio::spawn(server.run());

    wait_for_shutdown_signal().await?;

    ctx.shutdown().await;

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Control endpoint error: {:#}", e),
        Err(e) => error!("Control endpoint task failed: {}", e),
    }

    info!("Session manager exited cleanly");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for SIGINT")?;
            info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
    }

    Ok(())
}
