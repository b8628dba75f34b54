//! Docshelf CLI - folder indexing daemon with semantic search over MCP.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod logging;
mod mcp;

use commands::{cmd_config_get, cmd_config_set, cmd_config_show, cmd_index, cmd_search};
use logging::{init_cli_logging, init_mcp_logging};
use mcp::cmd_mcp_server;

#[derive(Parser)]
#[command(name = "docshelf")]
#[command(about = "Turn folders of documents into a semantic knowledge base for LLM assistants")]
#[command(after_help = "\
QUICK START:
  docshelf index ~/Documents/reports     # Build the folder's index
  docshelf search ~/Documents/reports \"quarterly revenue\"
  docshelf mcp server ~/Documents/reports   # Serve MCP over stdio")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Index a folder and watch it for changes
  Index {
    /// Folder to index
    folder: PathBuf,
    /// Embedding model override
    #[arg(long)]
    model: Option<String>,
    /// Keep running and re-index on file changes
    #[arg(long)]
    watch: bool,
  },
  /// Search a folder's index
  Search {
    /// Indexed folder
    folder: PathBuf,
    /// Search query
    query: String,
    /// Number of results
    #[arg(short = 'k', long, default_value = "10")]
    limit: usize,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Inspect or edit configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
  /// Model Context Protocol endpoints
  Mcp {
    #[command(subcommand)]
    command: McpCommand,
  },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Print one resolved option and its source
  Get { key: String },
  /// Persist an option to the user config file
  Set { key: String, value: String },
  /// Print the full resolved configuration
  Show {
    /// Show which layer each option came from
    #[arg(long)]
    sources: bool,
  },
}

#[derive(Subcommand)]
pub enum McpCommand {
  /// Serve MCP over stdio for the given folders
  Server {
    /// Folders to index and serve
    folders: Vec<PathBuf>,
  },
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();

  let result: Result<()> = match cli.command {
    Commands::Index { folder, model, watch } => {
      init_cli_logging();
      cmd_index(folder, model, watch).await
    }
    Commands::Search {
      folder,
      query,
      limit,
      json,
    } => {
      init_cli_logging();
      cmd_search(folder, &query, limit, json).await
    }
    Commands::Config { command } => {
      init_cli_logging();
      match command {
        ConfigCommand::Get { key } => cmd_config_get(&key),
        ConfigCommand::Set { key, value } => cmd_config_set(&key, &value),
        ConfigCommand::Show { sources } => cmd_config_show(sources),
      }
    }
    Commands::Mcp { command } => match command {
      McpCommand::Server { folders } => {
        let _guard = init_mcp_logging();
        cmd_mcp_server(folders).await
      }
    },
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("error: {e:#}");
      ExitCode::FAILURE
    }
  }
}
