//! thingdir CLI
//!
//! Command-line interface for thingdir: runs the directory server and talks
//! to a running one.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use thingdir_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "thingdir")]
#[command(about = "thingdir - Thing Description directory service")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: ~/.config/thingdir/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How client commands reach the server
#[derive(Args, Clone, Debug, Default)]
pub struct ConnectArgs {
    /// Server URL (default: server_url from config, or the local listen address)
    #[arg(long)]
    url: Option<String>,

    /// Username for password authentication
    #[arg(short, long)]
    user: Option<String>,

    /// Password for password authentication
    #[arg(long, env = "THINGDIR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Client certificate (PEM)
    #[arg(long, requires = "key", conflicts_with = "user")]
    cert: Option<PathBuf>,

    /// Client certificate private key (PEM)
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// CA certificate to trust (PEM)
    #[arg(long)]
    ca: Option<PathBuf>,
}

/// Paging flags for list and query
#[derive(Args, Clone, Copy, Debug, Default)]
pub struct PageArgs {
    /// Number of results to skip
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Maximum number of results (0 = server default)
    #[arg(long, default_value_t = 0)]
    limit: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the directory server until interrupted
    Serve {
        /// Listen address (overrides config)
        #[arg(long)]
        address: Option<String>,
        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Store file (overrides config)
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Read a document
    Get {
        /// Document ID
        id: String,
        #[command(flatten)]
        conn: ConnectArgs,
    },
    /// Add a new document (fails if the ID is taken)
    #[command(alias = "add")]
    Create {
        /// Document JSON, @file, or - for stdin
        json: String,
        /// Document ID (default: the document's "id" field, or a new urn:uuid)
        #[arg(long)]
        id: Option<String>,
        #[command(flatten)]
        conn: ConnectArgs,
    },
    /// Create or replace a document
    Put {
        /// Document ID
        id: String,
        /// Document JSON, @file, or - for stdin
        json: String,
        #[command(flatten)]
        conn: ConnectArgs,
    },
    /// Merge fields into an existing document
    Patch {
        /// Document ID
        id: String,
        /// Fields to merge as JSON, @file, or - for stdin
        json: String,
        #[command(flatten)]
        conn: ConnectArgs,
    },
    /// Delete a document
    #[command(alias = "rm")]
    Delete {
        /// Document ID
        id: String,
        #[command(flatten)]
        conn: ConnectArgs,
    },
    /// List documents
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        page: PageArgs,
        #[command(flatten)]
        conn: ConnectArgs,
    },
    /// Run a JSONPath filter query, e.g. '$[?(@.type=="sensor")]'
    Query {
        /// Filter expression
        expr: String,
        #[command(flatten)]
        page: PageArgs,
        #[command(flatten)]
        conn: ConnectArgs,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (store_path, port, discovery.enabled, users.<name>.role, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let serving = matches!(cli.command, Commands::Serve { .. });
    init_logging(if serving { "info" } else { "warn" });

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve {
            address,
            port,
            store,
        } => {
            let mut config = config;
            if let Some(address) = address {
                config.address = address;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(store) = store {
                config.store_path = store;
            }
            commands::serve::run(config, &output).await
        }
        Commands::Config { .. } => unreachable!(), // Handled above
        Commands::Get { id, conn } => commands::things::get(&config, &conn, &id, &output).await,
        Commands::Create { json, id, conn } => {
            commands::things::create(&config, &conn, id, &json, &output).await
        }
        Commands::Put { id, json, conn } => {
            commands::things::put(&config, &conn, &id, &json, &output).await
        }
        Commands::Patch { id, json, conn } => {
            commands::things::patch(&config, &conn, &id, &json, &output).await
        }
        Commands::Delete { id, conn } => {
            commands::things::delete(&config, &conn, &id, &output).await
        }
        Commands::List { page, conn } => {
            commands::things::list(&config, &conn, page, &output).await
        }
        Commands::Query { expr, page, conn } => {
            commands::things::query(&config, &conn, &expr, page, &output).await
        }
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Log to stderr, honouring RUST_LOG
fn init_logging(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "thingdir_core={},thingdir={},tower_http={}",
            default_level, default_level, default_level
        ))
    });

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
