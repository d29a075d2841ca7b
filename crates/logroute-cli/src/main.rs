//! logroute CLI
//!
//! Thin wrapper around logroute-core for running a forwarding receiver and
//! for sending one-off events to it.
//!
//! ## Usage
//!
//! ```bash
//! # Receive forwarded events and print them to stdout
//! logroute listen --port 5000
//!
//! # Print only the messages
//! logroute listen --layout messagePassThrough
//!
//! # Forward one event
//! logroute send --category jobs.nightly --level warn "disk almost full"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logroute_core::forward::{DEFAULT_DELIMITER, DEFAULT_HOST, DEFAULT_PORT};
use logroute_core::{Runtime, Value};
use serde_json::json;

/// logroute - hierarchical category logging with TCP forwarding
#[derive(Parser)]
#[command(name = "logroute")]
#[command(version)]
#[command(about = "Run a log forwarding receiver or forward events to one")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept forwarded events and write them to stdout
    Listen {
        /// Address to bind
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Port to bind
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Frame delimiter
        #[arg(long, default_value = DEFAULT_DELIMITER)]
        end_msg: String,

        /// Layout used for printed events (basic, messagePassThrough, json)
        #[arg(short, long, default_value = "basic")]
        layout: String,
    },

    /// Forward a single event to a listener
    Send {
        /// Listener host
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Listener port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Category of the event
        #[arg(short, long, default_value = "default")]
        category: String,

        /// Level name of the event
        #[arg(short, long, default_value = "info")]
        level: String,

        /// Message words, joined with spaces
        #[arg(required = true)]
        message: Vec<String>,
    },
}

/// Setup tracing/logging based on verbosity level
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

async fn listen(host: String, port: u16, end_msg: String, layout: String) -> Result<()> {
    // The server binds in the background; fail now if the address is taken
    drop(
        tokio::net::TcpListener::bind((host.as_str(), port))
            .await
            .with_context(|| format!("cannot listen on {}:{}", host, port))?,
    );

    let runtime = Runtime::new();
    runtime.configure(&json!({
        "appenders": {
            "out": { "type": "stdout", "layout": { "type": layout } },
            "server": { "type": "tcp-server", "host": host, "port": port, "endMsg": end_msg }
        },
        "categories": { "default": { "appenders": ["out"], "level": "all" } }
    }))?;

    tracing::info!(%host, port, "Listening for forwarded events");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    runtime.shutdown().await?;
    Ok(())
}

async fn send(
    host: String,
    port: u16,
    category: String,
    level: String,
    message: Vec<String>,
) -> Result<()> {
    let runtime = Runtime::new();
    runtime.configure(&json!({
        "appenders": { "net": { "type": "tcp", "host": host, "port": port } },
        "categories": { "default": { "appenders": ["net"], "level": "all" } }
    }))?;

    let levels = runtime.levels();
    if levels.get(&level).is_none() {
        anyhow::bail!(
            "level \"{}\" not recognised; valid levels are {}",
            level,
            levels.names()
        );
    }

    runtime
        .get_logger(&category)
        .log(&level, vec![Value::from(message.join(" "))]);

    // Drains whatever the connection has not delivered yet and fails if
    // the listener never took the event
    runtime
        .shutdown()
        .await
        .with_context(|| format!("event was not delivered to {}:{}", host, port))?;
    tracing::info!(%category, %level, "Event delivered");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Listen {
            host,
            port,
            end_msg,
            layout,
        } => listen(host, port, end_msg, layout).await,
        Commands::Send {
            host,
            port,
            category,
            level,
            message,
        } => send(host, port, category, level, message).await,
    }
}
