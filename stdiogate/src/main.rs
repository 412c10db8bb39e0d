//! stdiogate entry point.
//!
//! Exit codes: 0 after a graceful shutdown, 1 when configuration or startup
//! fails, 2 when the child could not be kept running.

use std::sync::Arc;

use clap::Parser;
use mimalloc::MiMalloc;
use stdiogate_core::lifecycle::LifecycleManager;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stdiogate::cli::{Cli, LogFormat};
use stdiogate::error::SupervisorError;
use stdiogate::gateway::Gateway;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; the guard flushes them on exit.
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    match cli.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_writer(writer)
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_writer(writer)
            .with_env_filter(filter)
            .init(),
    }

    let code = run(cli).await;
    drop(guard);
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return 1;
        }
    };

    let lifecycle = Arc::new(LifecycleManager::new());
    spawn_signal_handlers(lifecycle.clone());

    let gateway = match Gateway::start(config, lifecycle).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "gateway failed to start");
            return 1;
        }
    };
    info!(addr = %gateway.local_addr(), "listening");

    match gateway.wait().await {
        Ok(()) => 0,
        Err(e @ SupervisorError::RestartsExhausted { .. }) => {
            error!(error = %e, "child could not be kept running");
            2
        }
        Err(e) => {
            error!(error = %e, "supervisor failed");
            1
        }
    }
}

fn spawn_signal_handlers(lifecycle: Arc<LifecycleManager>) {
    let on_ctrl_c = lifecycle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT, initiating graceful shutdown");
                on_ctrl_c.begin_shutdown();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
                lifecycle.begin_shutdown();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
        }
    });
}
