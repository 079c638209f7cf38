//! searchd - search cluster node and RPC client

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use searchd::config::Config;

mod commands;
mod logging;

use commands::{cmd_clear_cache, cmd_config_show, cmd_get, cmd_search, cmd_serve};
use logging::{init_cli_logging, init_node_logging};

#[derive(Parser)]
#[command(name = "searchd")]
#[command(about = "Search cluster node with a MessagePack-RPC gateway")]
#[command(after_help = "\
QUICK START:
  searchd serve --foreground            # Run a node in the terminal
  searchd search -c books \"dune\"        # Keyword search
  searchd get -c books b1 b2            # Fetch documents by DOCID
  searchd clear-cache -c books          # Invalidate a search cache")]
struct Cli {
  /// Config file (default: $SEARCHD_CONFIG, then the user config dir)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Gateway address for client commands (default: from config)
  #[arg(long, global = true, value_name = "HOST:PORT")]
  addr: Option<String>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a node: collections, task scheduler and RPC gateway
  Serve {
    /// Log to the console instead of the rolling log file
    #[arg(long)]
    foreground: bool,
  },
  /// Keyword search in a collection
  Search {
    #[arg(short, long)]
    collection: String,
    /// Search query
    query: String,
    /// Restrict to these indexed properties
    #[arg(short, long, value_delimiter = ',')]
    properties: Vec<String>,
    #[arg(long, default_value = "0")]
    start: u32,
    #[arg(short = 'n', long, default_value = "10")]
    count: u32,
    /// Return ids and scores only
    #[arg(long)]
    ids_only: bool,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Fetch documents by DOCID
  Get {
    #[arg(short, long)]
    collection: String,
    /// DOCIDs (or internal ids with --internal)
    #[arg(required = true)]
    ids: Vec<String>,
    /// Treat ids as internal document ids
    #[arg(long)]
    internal: bool,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Invalidate a collection's search cache
  ClearCache {
    #[arg(short, long)]
    collection: String,
  },
  /// Print the effective configuration
  Config,
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;

  let addr = cli.addr.unwrap_or_else(|| config.gateway.bind_addr());
  if !matches!(cli.command, Commands::Serve { .. }) {
    init_cli_logging();
  }

  match cli.command {
    Commands::Serve { foreground } => {
      let _guard = init_node_logging(&config, foreground);
      cmd_serve(config).await
    }
    Commands::Search {
      collection,
      query,
      properties,
      start,
      count,
      ids_only,
      json,
    } => cmd_search(&addr, &collection, &query, properties, start, count, ids_only, json).await,
    Commands::Get {
      collection,
      ids,
      internal,
      json,
    } => cmd_get(&addr, &collection, ids, internal, json).await,
    Commands::ClearCache { collection } => cmd_clear_cache(&addr, &collection).await,
    Commands::Config => cmd_config_show(&config),
  }
}
