//! mcp-keepalive - keep MCP tool sessions alive behind idle-timeout proxies.
//!
//! Connects to the MCP servers listed in the config file and pings every open
//! session at a fixed interval while listing tools, calling them, or simply
//! holding the session open.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_keepalive::mcp::{PingEnabledToolset, SessionManager};
use mcp_keepalive::{Config, PingInterval, ServerEntry};

/// Keep-alive pings for MCP tool sessions
#[derive(Parser)]
#[command(name = "mcp-keepalive")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to .mcp-keepalive.toml, then the user config dir)
    #[arg(short, long, global = true, env = "MCP_KEEPALIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between keep-alive pings (overrides the config file)
    #[arg(
        long,
        global = true,
        env = "MCP_KEEPALIVE_PING_INTERVAL",
        allow_negative_numbers = true
    )]
    ping_interval: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured MCP servers
    Servers,

    /// List tools exposed by a server
    Tools {
        /// Server name from the config file
        server: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Call a tool on a server
    Call {
        /// Server name from the config file
        server: String,

        /// Tool name (including any configured prefix)
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
    },

    /// Open a session and keep it alive until interrupted
    Hold {
        /// Server name from the config file
        server: String,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(short, long)]
        duration: Option<f64>,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    match cli.command {
        Commands::Servers => {
            let config = load_config(cli.config.as_ref())?;
            cmd_servers(&config);
        }
        Commands::Tools { ref server, ref format } => {
            let config = load_config(cli.config.as_ref())?;
            let interval = resolve_interval(&config, cli.ping_interval)?;
            cmd_tools(config.server(server)?, interval, format)?;
        }
        Commands::Call { ref server, ref tool, ref args } => {
            let config = load_config(cli.config.as_ref())?;
            let interval = resolve_interval(&config, cli.ping_interval)?;
            cmd_call(config.server(server)?, interval, tool, args.as_deref())?;
        }
        Commands::Hold { ref server, duration } => {
            let config = load_config(cli.config.as_ref())?;
            let interval = resolve_interval(&config, cli.ping_interval)?;
            cmd_hold(config.server(server)?, interval, duration)?;
        }
        Commands::Config { path } => {
            cmd_config(cli.config.as_ref(), path)?;
        }
    }

    Ok(())
}

/// Load the config file given on the command line, or the default one.
fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load(),
    }
}

/// Command-line interval if given, otherwise the configured one.
fn resolve_interval(config: &Config, flag: Option<f64>) -> Result<PingInterval> {
    let interval = match flag {
        Some(secs) => PingInterval::from_secs_f64(secs)?,
        None => config.ping_interval()?,
    };
    Ok(interval)
}

fn toolset_for(server: &ServerEntry, interval: PingInterval) -> Result<PingEnabledToolset> {
    let toolset = PingEnabledToolset::new(server.toolset_config(interval.as_secs_f64()))?;
    tracing::debug!(
        "Using {} with ping interval {:.1}s",
        server.connection.describe(),
        interval.as_secs_f64()
    );
    Ok(toolset)
}

/// Run `op` against a fresh toolset and always close it afterwards.
fn with_toolset<F, Fut, T>(server: &ServerEntry, interval: PingInterval, op: F) -> Result<T>
where
    F: FnOnce(PingEnabledToolset) -> Fut,
    Fut: std::future::Future<Output = (PingEnabledToolset, Result<T>)>,
{
    let toolset = toolset_for(server, interval)?;
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let (toolset, result) = op(toolset).await;
        if let Err(e) = toolset.close().await {
            tracing::warn!("Error closing {}: {}", server.name, e);
        }
        result
    })
}

/// List configured servers.
fn cmd_servers(config: &Config) {
    println!("Configured MCP servers:\n");

    if config.servers.is_empty() {
        println!("  No MCP servers configured.");
        println!("\n  Add servers to {}:", mcp_keepalive::core::LOCAL_CONFIG_FILE);
        println!("    [[servers]]");
        println!("    name = \"my-server\"");
        println!("    transport = \"stdio\"");
        println!("    command = \"/path/to/mcp-server\"");
        return;
    }

    for server in &config.servers {
        println!("  {} - {}", server.name, server.connection.describe());
        if let Some(ref prefix) = server.tool_name_prefix {
            println!("    Prefix: {}", prefix);
        }
        if let Some(ref filter) = server.tool_filter {
            println!("    Tools: {}", filter.join(", "));
        }
    }
    println!("\nTotal: {} server(s)", config.servers.len());
}

/// List tools on a server.
fn cmd_tools(server: &ServerEntry, interval: PingInterval, format: &str) -> Result<()> {
    let tools = with_toolset(server, interval, |toolset| async move {
        let tools = toolset.get_tools().await.map_err(anyhow::Error::from);
        (toolset, tools)
    })?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    println!("Tools on {}:\n", server.name);
    if tools.is_empty() {
        println!("  No tools available.");
        return Ok(());
    }

    for tool in &tools {
        print!("  {}", tool.name);
        if let Some(ref desc) = tool.description {
            print!(" - {}", desc);
        }
        println!();

        if let Some(ref required) = tool.input_schema.required {
            if !required.is_empty() {
                println!("    Required: {}", required.join(", "));
            }
        }
    }
    println!("\nTotal: {} tool(s)", tools.len());

    Ok(())
}

/// Call a tool and print its text output.
fn cmd_call(
    server: &ServerEntry,
    interval: PingInterval,
    tool: &str,
    args: Option<&str>,
) -> Result<()> {
    let arguments: Option<HashMap<String, serde_json::Value>> = match args {
        Some(raw) => Some(serde_json::from_str(raw).context("Tool arguments must be a JSON object")?),
        None => None,
    };

    let result = with_toolset(server, interval, |toolset| async move {
        let result = toolset.call_tool(tool, arguments).await.map_err(anyhow::Error::from);
        (toolset, result)
    })?;

    println!("{}", result.text());
    if result.is_error == Some(true) {
        anyhow::bail!("Tool '{}' reported an error", tool);
    }

    Ok(())
}

/// Hold a session open until Ctrl+C or the given duration elapses.
fn cmd_hold(server: &ServerEntry, interval: PingInterval, duration: Option<f64>) -> Result<()> {
    let duration = duration
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .with_context(|| format!("Invalid duration: {}", secs))
        })
        .transpose()?;

    let name = server.name.clone();
    let sent = with_toolset(server, interval, |toolset| async move {
        let result = hold_session(&toolset, &name, interval, duration).await;
        (toolset, result)
    })?;

    println!("Sent {} ping(s)", sent);
    Ok(())
}

async fn hold_session(
    toolset: &PingEnabledToolset,
    name: &str,
    interval: PingInterval,
    duration: Option<Duration>,
) -> Result<u64> {
    let manager = toolset.session_manager();
    manager.create_session(None).await?;
    let key = manager.session_key(None);

    eprintln!(
        "Holding session to {} (ping every {:.1}s). Press Ctrl+C to stop.",
        name,
        interval.as_secs_f64()
    );

    match duration {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }

    Ok(manager.pings_sent(&key).await.unwrap_or(0))
}

/// Show configuration.
fn cmd_config(path: Option<&PathBuf>, show_path: bool) -> Result<()> {
    if show_path {
        match path.cloned().or_else(Config::config_path) {
            Some(path) => println!("{}", path.display()),
            None => {
                println!("No config file found; using defaults");
                if let Some(global) = Config::global_config_path() {
                    println!("Create one at {}", global.display());
                }
            }
        }
        return Ok(());
    }

    let config = load_config(path)?;
    println!("{}", config.to_toml()?);

    Ok(())
}
