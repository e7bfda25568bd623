//! deskcheck dashboard daemon
//!
//! Responsibilities:
//! - Read configuration from /etc/deskcheck/config.toml (or --config)
//! - Register the built-in diagnostic tools
//! - List, execute and watch tools from the command line

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use deskcheck_tools::{AppContext, Params};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod probes;

/// Internal diagnostics dashboard
#[derive(Parser, Debug)]
#[command(name = "deskcheck-dashd", version, about = "Internal diagnostics dashboard")]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, value_name = "PATH", help = "Path to config.toml")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Print the dashboard listing as JSON")]
    List,

    #[command(
        about = "Execute a tool once and print its envelope",
        long_about = "Execute a tool once and print its envelope.\n\n\
                      Examples:\n  \
                      deskcheck-dashd exec disk-usage path=/home\n  \
                      deskcheck-dashd exec low-wifi-notifs"
    )]
    Exec {
        #[arg(value_name = "TOOL_ID")]
        tool_id: String,

        #[arg(value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    #[command(about = "Stream live status as JSON lines until Ctrl-C")]
    Watch {
        #[arg(value_name = "TOOL_ID", help = "Tools to watch (default: all monitorable)")]
        tool_ids: Vec<String>,
    },
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config_path = config::resolve_path(args.config.as_deref());
    let (config, found) = config::load_config(&config_path)?;

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.system.log_level);
    init_logging(level, config.system.log_json)?;

    if !found {
        warn!(
            "Config file not found at {}, using defaults",
            config_path.display()
        );
    }
    info!("deskcheck v{}", env!("CARGO_PKG_VERSION"));

    let ctx = AppContext::bootstrap(config.toolbox)
        .await
        .context("Failed to initialise toolbox")?;
    let registered = ctx
        .register_all(probes::builtin_tools())
        .context("Failed to register built-in tools")?;
    info!("Registered {registered} built-in tool(s)");

    let outcome = run(&ctx, args.command).await;
    ctx.shutdown().await;
    outcome
}

async fn run(ctx: &AppContext, command: Commands) -> Result<()> {
    match command {
        Commands::List => {
            println!("{}", serde_json::to_string_pretty(&ctx.dashboard())?);
        }
        Commands::Exec { tool_id, params } => {
            let params: Params = params.into_iter().collect();
            let envelope = ctx.execute(&tool_id, params).await;
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        Commands::Watch { tool_ids } => {
            let sessions = console::open_sessions(ctx, &tool_ids)?;
            if sessions.is_empty() {
                warn!("No monitorable tools to watch");
                return Ok(());
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, stopping");
                }
                on_signal.cancel();
            });

            let mut stdout = tokio::io::stdout();
            console::stream(sessions, &mut stdout, cancel).await?;
        }
    }
    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable
fn init_logging(level: &str, json: bool) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level: {level}"))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    }
    .map_err(|e| anyhow!("Failed to set tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("path=/home").unwrap(),
            ("path".to_string(), "/home".to_string())
        );
        assert_eq!(
            parse_param("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_cli_parses_exec() {
        let args =
            CliArgs::try_parse_from(["deskcheck-dashd", "exec", "disk-usage", "path=/var"]).unwrap();
        match args.command {
            Commands::Exec { tool_id, params } => {
                assert_eq!(tool_id, "disk-usage");
                assert_eq!(params, vec![("path".to_string(), "/var".to_string())]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let args = CliArgs::try_parse_from([
            "deskcheck-dashd",
            "watch",
            "--config",
            "/tmp/c.toml",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(matches!(args.command, Commands::Watch { ref tool_ids } if tool_ids.is_empty()));
    }
}
