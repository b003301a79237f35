//! apidaemon entry point.
//!
//! Loads the config file, builds the configured plugins and serves requests
//! until interrupted.

use std::path::PathBuf;

use anyhow::Context;
use apidaemon_core::config::{Config, Directories};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// apidaemon - JSON RPC over TCP for configured plugins
#[derive(Parser, Debug)]
#[command(name = "apidaemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the host to bind
    #[arg(long)]
    host: Option<String>,

    /// Override the port to bind
    #[arg(long)]
    port: Option<u16>,
}

/// Directory for debug log files: `<data>/logs`, or the temp dir when that
/// cannot be created.
fn log_dir(dirs: &Directories) -> PathBuf {
    let dir = dirs.data.join("logs");
    match std::fs::create_dir_all(&dir) {
        Ok(()) => dir,
        Err(e) => {
            eprintln!("Cannot create {}: {e}", dir.display());
            std::env::temp_dir()
        }
    }
}

/// Set up logging with file output for debugging.
/// In debug builds, defaults to debug level and also logs to a timestamped file.
/// In release builds, defaults to info level and logs to stderr.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "apidaemon={default_level},apidaemon_daemon={default_level},apidaemon_core={default_level}"
        ))
    });

    if cfg!(debug_assertions) {
        let dir = log_dir(&Directories::new());
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("apidaemon-{timestamp}.log");
        let log_path = dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();

        eprintln!("Logging to: {} (and stderr)", log_path.display());
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| Directories::new().config_file);

    let mut config = Config::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    info!("Using config {}", path.display());

    if let Some(host) = &args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging();

    info!("Starting apidaemon {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    apidaemon_daemon::run(&config).await?;

    info!("apidaemon stopped");
    Ok(())
}
