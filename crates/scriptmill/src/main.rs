//! Scriptmill Console Host
//!
//! Runs a standalone host thread and a script manager. Operator input is read
//! from stdin: `script ...` lines go to the script command surface, `quit`
//! exits, anything else is executed as a host command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use scriptmill::commands::{self, COMMAND_ROOT};
use scriptmill::config::{CONFIG_FILE, ScriptmillConfig};
use scriptmill::console::ConsoleProcessor;
use scriptmill::engine::EngineCatalog;
use scriptmill::host::{HostHandle, HostRuntime, LocalHost};
use scriptmill::manager::ScriptManager;

/// Scriptmill Script Host
#[derive(Parser, Debug)]
#[command(name = "scriptmill")]
#[command(about = "Concurrent script lifecycle manager", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// World directory (overrides the config file)
    #[arg(short, long)]
    world: Option<PathBuf>,

    /// Script to start on launch (repeatable)
    #[arg(long = "exec", value_name = "NAME")]
    exec: Vec<String>,
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async_main());

    // A pending stdin read would otherwise hold the runtime open
    runtime.shutdown_background();
    result
}

async fn async_main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("scriptmill=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments
    let args = Args::parse();

    info!("Starting scriptmill v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ScriptmillConfig::load(&args.config)?;
    if let Some(world) = args.world {
        config.host.world_dir = world;
    }
    info!("World directory: {}", config.host.world_dir.display());

    // Host thread
    let host = LocalHost::spawn(
        config.host.name.as_str(),
        &config.host.world_dir,
        ConsoleProcessor::stdout(),
    )?;

    // Script manager
    let catalog = Arc::new(EngineCatalog::with_preferences(
        config.scripting.engines.iter().cloned(),
    ));
    info!(
        preferences = ?catalog.preferences(),
        available = ?catalog.available(),
        "Script engines"
    );

    let manager = Arc::new(ScriptManager::new(config.scripting.clone(), catalog));
    manager.set_runtime(Some(host.clone() as HostHandle));

    for name in &args.exec {
        if !manager.execute_script(name) {
            warn!("Could not start script '{}'", name);
        }
    }

    tokio::select! {
        result = console_loop(manager.clone(), host.clone()) => {
            if let Err(e) = result {
                error!("Console input failed: {}", e);
            }
        }
        _ = shutdown_signal() => {}
    }

    // Shutdown waits on execution units, keep it off the async workers
    info!("Stopping scripts...");
    let stopping = manager.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || stopping.shutdown()).await? {
        warn!("Some scripts did not stop cleanly: {}", e);
    }

    let stopping = host.clone();
    tokio::task::spawn_blocking(move || stopping.stop()).await?;

    info!("Shutdown complete");
    Ok(())
}

/// Read operator input until EOF or `quit`
async fn console_loop(manager: Arc<ScriptManager>, host: Arc<LocalHost>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if line == "quit" || line == "exit" {
            info!("Quit requested");
            return Ok(());
        }

        if line.split_whitespace().next() == Some(COMMAND_ROOT) {
            let manager = manager.clone();
            let outcome =
                tokio::task::spawn_blocking(move || commands::execute_line(&manager, &line))
                    .await?;
            for feedback in &outcome.lines {
                println!("{}", feedback);
            }
            continue;
        }

        host.submit(Box::new(move |processor| {
            match processor.perform_command(&line) {
                Ok(result) => debug!(command = %line, result, "Command executed"),
                Err(e) => warn!(command = %line, error = %e, "Command failed"),
            }
        }))?;
    }

    info!("End of input");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
