//! apidaemon command line client
//!
//! - `call`: send one request to a running server and print the result
//! - `check-config`: load a config file and list the methods it exposes

use anyhow::{Context, Result, bail};
use apidaemon_core::FactorySet;
use apidaemon_core::PluginRegistry;
use apidaemon_core::config::{Config, Directories};
use apidaemon_core::notify::build_notifier;
use apidaemon_rpc::{ApiClient, Request};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Handle;

/// apidaemon control CLI
#[derive(Parser)]
#[command(name = "apictl")]
#[command(about = "Call methods on an apidaemon server")]
#[command(version)]
#[command(after_help = "\
Examples:
  apictl call math.add -p a=2 -p b=3
  apictl call system.hello -p name='\"Ada\"'
  apictl call system.echo -p tags='[\"a\",\"b\"]' --addr 10.0.0.5:8760
  apictl check-config ~/.config/apidaemon/config.json
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call a method and print its result as JSON
    Call {
        /// Dotted method path, e.g. `math.add`
        method: String,

        /// Parameter as key=value; the value is parsed as JSON, else taken as a string
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Server address (defaults to host:port from the config file)
        #[arg(long, value_name = "HOST:PORT")]
        addr: Option<String>,

        /// Seconds to wait for the response
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Validate a config file and list the methods it would expose
    #[command(name = "check-config")]
    CheckConfig {
        /// Config file (defaults to the user config directory)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Call {
            method,
            params,
            addr,
            timeout,
        } => run_call(method, &params, addr, timeout).await,
        Commands::CheckConfig { path } => run_check_config(path, &Handle::current()),
    }
}

/// Split `key=value` and decode the value.
fn parse_param(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("parameter '{raw}' is not in key=value form");
    };
    if !apidaemon_rpc::is_identifier(key) {
        bail!("invalid parameter name: '{key}'");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn parse_params(raw: &[String]) -> Result<Map<String, Value>> {
    raw.iter().map(|p| parse_param(p)).collect()
}

fn default_addr() -> Result<String> {
    let path = Directories::new().config_file;
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    Ok(config.addr())
}

async fn run_call(
    method: String,
    params: &[String],
    addr: Option<String>,
    timeout: u64,
) -> Result<()> {
    let request = Request::new(method, parse_params(params)?);
    request.validate()?;

    let addr = match addr {
        Some(addr) => addr,
        None => default_addr()?,
    };
    let client = ApiClient::new(&addr).with_timeout(Duration::from_secs(timeout));

    let response = client
        .call_raw(&request)
        .await
        .with_context(|| format!("Failed to call {} on {addr}", request.method))?;

    match response.into_result() {
        Ok(data) => {
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
        Err(error) => bail!("{}: {error}", request.method),
    }
}

/// Plugins are built on `runtime`, the one `main` already runs on.
fn run_check_config(path: Option<PathBuf>, runtime: &Handle) -> Result<()> {
    let path = path.unwrap_or_else(|| Directories::new().config_file);
    let config =
        Config::load(&path).with_context(|| format!("Invalid config {}", path.display()))?;

    let notifier = build_notifier(config.notificator.as_ref())?;
    let registry = PluginRegistry::build(
        &config.plugins,
        &FactorySet::with_builtins(),
        notifier.as_ref(),
        runtime,
    )?;

    println!("Config: {}", path.display());
    println!("Listen: {}", config.addr());
    println!(
        "Notifications: {}",
        if notifier.is_some() { "enabled" } else { "disabled" }
    );

    for namespace in registry.namespaces() {
        println!("{namespace}");
        if let Some(methods) = registry.methods(namespace) {
            for path in methods.paths() {
                println!("  {namespace}.{path}");
            }
        }
    }

    Ok(())
}
