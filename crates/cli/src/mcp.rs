//! MCP (Model Context Protocol) stdio server.
//!
//! Line-delimited JSON-RPC on stdin/stdout; logs go to the rolling file
//! (or stderr), never to stdout.

use anyhow::{Context, Result, bail};
use daemon::{Daemon, DaemonOptions, FolderHandle};
use db::FolderStore;
use docshelf_core::{Config, ConfigPatch, FolderId, FolderStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::commands::wait_settled;

#[derive(Debug, Deserialize)]
struct McpRequest {
  #[serde(rename = "jsonrpc")]
  _jsonrpc: String,
  id: Option<serde_json::Value>,
  method: String,
  #[serde(default)]
  params: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct McpResponse {
  jsonrpc: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  id: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  result: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<McpError>,
}

#[derive(Debug, Serialize)]
struct McpError {
  code: i32,
  message: String,
}

fn mcp_success(id: Option<serde_json::Value>, result: serde_json::Value) -> McpResponse {
  McpResponse {
    jsonrpc: "2.0",
    id,
    result: Some(result),
    error: None,
  }
}

fn mcp_error(id: Option<serde_json::Value>, code: i32, message: &str) -> McpResponse {
  McpResponse {
    jsonrpc: "2.0",
    id,
    result: None,
    error: Some(McpError {
      code,
      message: message.to_string(),
    }),
  }
}

fn tool_definitions() -> serde_json::Value {
  serde_json::json!([
    {
      "name": "search",
      "description": "Semantic search over an indexed folder",
      "inputSchema": {
        "type": "object",
        "properties": {
          "folder": { "type": "string", "description": "Folder root (optional when a single folder is served)" },
          "query": { "type": "string" },
          "limit": { "type": "integer", "default": 10 }
        },
        "required": ["query"]
      }
    },
    {
      "name": "list_documents",
      "description": "List indexed documents with key phrases",
      "inputSchema": {
        "type": "object",
        "properties": { "folder": { "type": "string" } }
      }
    },
    {
      "name": "get_document_outline",
      "description": "Chunk-level outline of one document",
      "inputSchema": {
        "type": "object",
        "properties": { "folder": { "type": "string" }, "path": { "type": "string" } },
        "required": ["path"]
      }
    },
    {
      "name": "get_pages",
      "description": "Page texts of an indexed PDF",
      "inputSchema": {
        "type": "object",
        "properties": {
          "folder": { "type": "string" },
          "path": { "type": "string" },
          "pages": { "type": "array", "items": { "type": "integer" } }
        },
        "required": ["path"]
      }
    },
    {
      "name": "get_slides",
      "description": "Slide texts of an indexed PPTX",
      "inputSchema": {
        "type": "object",
        "properties": { "folder": { "type": "string" }, "path": { "type": "string" } },
        "required": ["path"]
      }
    },
    {
      "name": "get_sheet_data",
      "description": "Row ranges of an indexed XLSX",
      "inputSchema": {
        "type": "object",
        "properties": { "folder": { "type": "string" }, "path": { "type": "string" }, "sheet": { "type": "string" } },
        "required": ["path"]
      }
    }
  ])
}

pub async fn cmd_mcp_server(folders: Vec<PathBuf>) -> Result<()> {
  if folders.is_empty() {
    bail!("mcp server needs at least one folder to serve");
  }

  let loaded = Config::load(ConfigPatch::default());
  let model_id = loaded.config.model_id.clone();
  let daemon = Daemon::new(loaded.config, DaemonOptions::default())?;
  let registry = daemon.registry();

  let mut handles: Vec<FolderHandle> = Vec::new();
  for folder in &folders {
    let folder = folder
      .canonicalize()
      .with_context(|| format!("folder not found: {}", folder.display()))?;
    let handle = registry.add_folder(&folder)?;
    handle.start().await?;
    handles.push(handle);
  }
  for handle in &handles {
    let status = wait_settled(handle, Duration::from_secs(600)).await?;
    if status == FolderStatus::Error {
      warn!(root = %handle.root.display(), "Folder failed to index; serving anyway");
    }
  }
  info!(folders = handles.len(), "MCP server ready");

  let stdin = tokio::io::stdin();
  let mut stdout = tokio::io::stdout();
  let reader = tokio::io::BufReader::new(stdin);
  let mut lines = reader.lines();

  while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
    if line.trim().is_empty() {
      continue;
    }

    let request: McpRequest = match serde_json::from_str(&line) {
      Ok(request) => request,
      Err(e) => {
        write_response(&mut stdout, &mcp_error(None, -32700, &format!("Parse error: {e}"))).await?;
        continue;
      }
    };

    // Notifications get no reply.
    if request.id.is_none() {
      continue;
    }

    let response = match request.method.as_str() {
      "initialize" => mcp_success(
        request.id,
        serde_json::json!({
          "protocolVersion": "2024-11-05",
          "capabilities": { "tools": {} },
          "serverInfo": { "name": "docshelf", "version": env!("CARGO_PKG_VERSION") }
        }),
      ),
      "tools/list" => mcp_success(request.id, serde_json::json!({ "tools": tool_definitions() })),
      "tools/call" => {
        let name = request.params["name"].as_str().unwrap_or_default().to_string();
        let arguments = request.params["arguments"].clone();
        match call_tool(&daemon, &handles, &model_id, &name, arguments).await {
          Ok(result) => {
            let text = serde_json::to_string_pretty(&result)?;
            mcp_success(
              request.id,
              serde_json::json!({ "content": [{ "type": "text", "text": text }] }),
            )
          }
          Err(e) => mcp_error(request.id, -32000, &format!("{e:#}")),
        }
      }
      "ping" => mcp_success(request.id, serde_json::json!({})),
      other => mcp_error(request.id, -32601, &format!("Method not found: {other}")),
    };

    write_response(&mut stdout, &response).await?;
  }

  daemon.shutdown().await;
  Ok(())
}

async fn write_response(stdout: &mut tokio::io::Stdout, response: &McpResponse) -> Result<()> {
  let line = serde_json::to_string(response)?;
  stdout.write_all(line.as_bytes()).await?;
  stdout.write_all(b"\n").await?;
  stdout.flush().await?;
  Ok(())
}

/// Resolve the folder argument to a served folder's store.
fn resolve_store(handles: &[FolderHandle], arguments: &serde_json::Value) -> Result<FolderStore> {
  let root = match arguments["folder"].as_str() {
    Some(folder) => {
      let requested = PathBuf::from(folder).canonicalize().unwrap_or_else(|_| PathBuf::from(folder));
      let handle = handles
        .iter()
        .find(|h| h.root == requested)
        .with_context(|| format!("folder not served: {folder}"))?;
      handle.root.clone()
    }
    None if handles.len() == 1 => handles[0].root.clone(),
    None => bail!("multiple folders served; pass the `folder` argument"),
  };

  Ok(FolderStore::open(&root, FolderId::from_path(&root))?)
}

async fn call_tool(
  daemon: &Daemon,
  handles: &[FolderHandle],
  model_id: &str,
  name: &str,
  arguments: serde_json::Value,
) -> Result<serde_json::Value> {
  let store = resolve_store(handles, &arguments)?;
  let path = arguments["path"].as_str();

  let result = match name {
    "search" => {
      let query = arguments["query"].as_str().context("missing query")?;
      let limit = arguments["limit"].as_u64().unwrap_or(10) as usize;
      let results = daemon::tools::search(&store, &daemon.pipeline(), model_id, query, limit).await?;
      serde_json::to_value(results)?
    }
    "list_documents" => serde_json::to_value(daemon::tools::list_documents(&store)?)?,
    "get_document_outline" => {
      let path = path.context("missing path")?;
      serde_json::to_value(daemon::tools::get_document_outline(&store, path)?)?
    }
    "get_pages" => {
      let path = path.context("missing path")?;
      let pages: Option<Vec<u32>> = arguments["pages"]
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_u64().map(|n| n as u32)).collect());
      serde_json::to_value(daemon::tools::get_pages(&store, path, pages.as_deref())?)?
    }
    "get_slides" => {
      let path = path.context("missing path")?;
      serde_json::to_value(daemon::tools::get_slides(&store, path)?)?
    }
    "get_sheet_data" => {
      let path = path.context("missing path")?;
      let sheet = arguments["sheet"].as_str();
      serde_json::to_value(daemon::tools::get_sheet_data(&store, path, sheet)?)?
    }
    other => bail!("unknown tool: {other}"),
  };

  Ok(result)
}
