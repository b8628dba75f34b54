//! CLI command implementations.

use anyhow::{Context, Result, bail};
use daemon::{Daemon, DaemonOptions};
use db::FolderStore;
use docshelf_core::{Config, ConfigPatch, FolderId, FolderStatus, user_config_path};
use std::path::PathBuf;
use std::time::Duration;

/// Index a folder, printing progress; with `--watch`, stay resident.
pub async fn cmd_index(folder: PathBuf, model: Option<String>, watch: bool) -> Result<()> {
  let folder = folder
    .canonicalize()
    .with_context(|| format!("folder not found: {}", folder.display()))?;

  let cli_patch = ConfigPatch {
    model_id: model,
    ..Default::default()
  };
  let loaded = Config::load(cli_patch);

  let daemon = Daemon::new(loaded.config, DaemonOptions::default())?;
  let registry = daemon.registry();
  let handle = registry.add_folder(&folder)?;

  handle.start().await?;
  let mut rx = handle.subscribe();
  loop {
    let progress = rx.borrow_and_update().clone();
    match progress.status {
      FolderStatus::Indexing => {
        eprintln!("indexing... {}% ({}/{})", progress.percent(), progress.done, progress.total);
      }
      FolderStatus::Active => {
        println!(
          "indexed {}: {} done, {} failed",
          folder.display(),
          progress.done,
          progress.failed
        );
        break;
      }
      FolderStatus::Error => {
        bail!(
          "indexing failed: {}",
          progress.last_error.unwrap_or_else(|| "unknown error".to_string())
        );
      }
      _ => {}
    }
    if rx.changed().await.is_err() {
      bail!("folder supervisor stopped unexpectedly");
    }
  }

  if watch {
    eprintln!("watching {} for changes (ctrl-c to stop)", folder.display());
    daemon.run_until_shutdown().await;
  } else {
    daemon.shutdown().await;
  }
  Ok(())
}

/// Search an indexed folder.
pub async fn cmd_search(folder: PathBuf, query: &str, limit: usize, json: bool) -> Result<()> {
  let folder = folder
    .canonicalize()
    .with_context(|| format!("folder not found: {}", folder.display()))?;

  let loaded = Config::load(ConfigPatch::default());
  let model_id = loaded.config.model_id.clone();

  let store = FolderStore::open(&folder, FolderId::from_path(&folder))?;
  if store.document_count()? == 0 {
    bail!("folder has no index yet; run `docshelf index {}` first", folder.display());
  }

  let daemon = Daemon::new(loaded.config, DaemonOptions::default())?;
  let results = daemon::tools::search(&store, &daemon.pipeline(), &model_id, query, limit).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&results)?);
  } else {
    for (i, hit) in results.iter().enumerate() {
      println!("{}. {} #{} (score {:.3})", i + 1, hit.document_path, hit.ordinal, hit.score);
      let preview: String = hit.text.chars().take(160).collect();
      println!("   {}", preview.replace('\n', " "));
      if !hit.key_phrases.is_empty() {
        println!("   [{}]", hit.key_phrases.join(", "));
      }
    }
    if results.is_empty() {
      println!("no results");
    }
  }

  daemon.shutdown().await;
  Ok(())
}

pub fn cmd_config_get(key: &str) -> Result<()> {
  let loaded = Config::load(ConfigPatch::default());
  let value = config_value(&loaded.config, key).with_context(|| format!("unknown option: {key}"))?;
  println!("{value}  (from {:?})", loaded.source_of(key));
  Ok(())
}

pub fn cmd_config_set(key: &str, value: &str) -> Result<()> {
  let path = user_config_path();
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }

  let mut table: toml::Table = match std::fs::read_to_string(&path) {
    Ok(content) => toml::from_str(&content).with_context(|| format!("malformed config: {}", path.display()))?,
    Err(_) => toml::Table::new(),
  };

  set_toml_key(&mut table, key, value)?;

  // Validate that the result still parses as a config patch.
  let rendered = toml::to_string_pretty(&table)?;
  toml::from_str::<ConfigPatch>(&rendered).with_context(|| format!("{key} = {value} is not a valid setting"))?;

  std::fs::write(&path, rendered)?;
  println!("wrote {key} to {}", path.display());
  Ok(())
}

pub fn cmd_config_show(sources: bool) -> Result<()> {
  let loaded = Config::load(ConfigPatch::default());
  println!("{}", toml::to_string_pretty(&loaded.config)?);
  if sources {
    println!("# sources");
    for (key, source) in loaded.sources() {
      println!("# {key}: {source:?}");
    }
  }
  Ok(())
}

fn config_value(config: &Config, key: &str) -> Option<String> {
  match key {
    "model_id" => Some(config.model_id.clone()),
    "batch_size" => Some(config.batch_size.to_string()),
    "chunk_size" => Some(config.chunk_size.to_string()),
    "overlap" => Some(config.overlap.to_string()),
    "file_extensions" => Some(config.file_extensions.join(",")),
    "ignore_patterns" => Some(config.ignore_patterns.join(",")),
    "max_file_size" => Some(config.max_file_size.to_string()),
    "performance_mode" => Some(config.performance_mode.as_str().to_string()),
    "development.enable_debug_output" => Some(config.development.enable_debug_output.to_string()),
    "development.hot_reload" => Some(config.development.hot_reload.to_string()),
    _ => None,
  }
}

/// Set a possibly-dotted key in the TOML table, parsing the value as a
/// number, boolean, or JSON array when it looks like one.
fn set_toml_key(table: &mut toml::Table, key: &str, value: &str) -> Result<()> {
  let parsed: toml::Value = if let Ok(n) = value.parse::<i64>() {
    toml::Value::Integer(n)
  } else if let Ok(b) = value.parse::<bool>() {
    toml::Value::Boolean(b)
  } else if value.trim_start().starts_with('[') {
    let list: Vec<String> = serde_json::from_str(value).context("expected a JSON string array")?;
    toml::Value::Array(list.into_iter().map(toml::Value::String).collect())
  } else {
    toml::Value::String(value.to_string())
  };

  match key.split_once('.') {
    None => {
      table.insert(key.to_string(), parsed);
    }
    Some((section, rest)) => {
      let entry = table
        .entry(section.to_string())
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
      let Some(section_table) = entry.as_table_mut() else {
        bail!("{section} is not a section");
      };
      section_table.insert(rest.to_string(), parsed);
    }
  }
  Ok(())
}

/// Wait for a folder to settle into `active` or `error`.
pub async fn wait_settled(handle: &daemon::FolderHandle, timeout: Duration) -> Result<FolderStatus> {
  let mut rx = handle.subscribe();
  let settled = tokio::time::timeout(timeout, async {
    loop {
      let status = rx.borrow().status;
      if matches!(status, FolderStatus::Active | FolderStatus::Error) {
        return status;
      }
      if rx.changed().await.is_err() {
        return rx.borrow().status;
      }
    }
  })
  .await
  .context("timed out waiting for indexing to settle")?;
  Ok(settled)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_config_value_known_keys() {
    let config = Config::default();
    assert_eq!(config_value(&config, "model_id").unwrap(), "multilingual-e5-small");
    assert_eq!(config_value(&config, "development.hot_reload").unwrap(), "false");
    assert!(config_value(&config, "bogus").is_none());
  }

  #[test]
  fn test_set_toml_key_types() {
    let mut table = toml::Table::new();
    set_toml_key(&mut table, "batch_size", "64").unwrap();
    set_toml_key(&mut table, "model_id", "bge-m3").unwrap();
    set_toml_key(&mut table, "file_extensions", r#"["md","txt"]"#).unwrap();
    set_toml_key(&mut table, "development.hot_reload", "true").unwrap();

    assert_eq!(table["batch_size"].as_integer(), Some(64));
    assert_eq!(table["model_id"].as_str(), Some("bge-m3"));
    assert_eq!(table["file_extensions"].as_array().unwrap().len(), 2);
    assert_eq!(table["development"]["hot_reload"].as_bool(), Some(true));
  }

  #[test]
  fn test_set_toml_key_roundtrips_as_patch() {
    let mut table = toml::Table::new();
    set_toml_key(&mut table, "chunk_size", "300").unwrap();
    let rendered = toml::to_string_pretty(&table).unwrap();
    let patch: ConfigPatch = toml::from_str(&rendered).unwrap();
    assert_eq!(patch.chunk_size, Some(300));
  }
}
