//! Layered configuration.
//!
//! Priority, lowest first: built-in defaults, system file
//! (`/etc/docshelf/config.toml`), user file (`~/.config/docshelf/config.toml`),
//! `DOCSHELF_*` environment variables (JSON for arrays, numbers and booleans
//! auto-parsed), CLI overrides. Every resolved option remembers which layer
//! supplied it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Which layer supplied an option's resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
  Default,
  SystemFile,
  UserFile,
  Env,
  Cli,
}

/// Coordinator tuning preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
  Fast,
  #[default]
  Balanced,
  Accurate,
}

impl PerformanceMode {
  pub fn parse(s: &str) -> Option<Self> {
    match s.to_lowercase().as_str() {
      "fast" => Some(Self::Fast),
      "balanced" => Some(Self::Balanced),
      "accurate" => Some(Self::Accurate),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Fast => "fast",
      Self::Balanced => "balanced",
      Self::Accurate => "accurate",
    }
  }
}

/// Derived worker scheduling parameters for a performance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTuning {
  /// Texts per worker request.
  pub batch_size: usize,
  /// Embedding batches in flight process-wide.
  pub max_in_flight: usize,
}

/// Development toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DevelopmentConfig {
  pub enable_debug_output: bool,
  pub hot_reload: bool,
}

/// Docshelf configuration snapshot. Immutable once resolved; hot reload
/// produces a fresh snapshot plus a diff, never an in-place mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Embedding model for every folder indexed by this process.
  pub model_id: String,
  /// Texts per embedding worker request.
  pub batch_size: usize,
  /// Target tokens per chunk.
  pub chunk_size: usize,
  /// Token overlap between neighboring chunks.
  pub overlap: usize,
  /// Extensions included in the scan (lowercase, no dot).
  pub file_extensions: Vec<String>,
  /// Glob-like patterns matched against relative path segments.
  pub ignore_patterns: Vec<String>,
  /// Files larger than this many bytes are skipped and reported.
  pub max_file_size: u64,
  pub performance_mode: PerformanceMode,
  pub development: DevelopmentConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      model_id: "multilingual-e5-small".to_string(),
      batch_size: 32,
      chunk_size: 400,
      overlap: 50,
      file_extensions: ["pdf", "docx", "xlsx", "pptx", "md", "txt"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      ignore_patterns: [".git", "node_modules", ".docshelf", "*.tmp", "~$*", "*.swp"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      max_file_size: 50 * 1024 * 1024,
      performance_mode: PerformanceMode::Balanced,
      development: DevelopmentConfig::default(),
    }
  }
}

/// A partial configuration: one layer's contribution to the merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
  pub model_id: Option<String>,
  pub batch_size: Option<usize>,
  pub chunk_size: Option<usize>,
  pub overlap: Option<usize>,
  pub file_extensions: Option<Vec<String>>,
  pub ignore_patterns: Option<Vec<String>>,
  pub max_file_size: Option<u64>,
  pub performance_mode: Option<PerformanceMode>,
  pub development: DevelopmentPatch,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevelopmentPatch {
  pub enable_debug_output: Option<bool>,
  pub hot_reload: Option<bool>,
}

impl ConfigPatch {
  pub fn is_empty(&self) -> bool {
    self == &Self::default()
  }

  /// Read the `DOCSHELF_*` environment overrides.
  pub fn from_env() -> Self {
    Self::from_env_with(|key| std::env::var(key).ok())
  }

  /// Environment reading with an injectable lookup (used by tests).
  pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
    fn parse_list(key: &str, raw: &str) -> Option<Vec<String>> {
      match serde_json::from_str::<Vec<String>>(raw) {
        Ok(list) => Some(list),
        Err(e) => {
          warn!(key, error = %e, "Ignoring env override: expected a JSON string array");
          None
        }
      }
    }
    fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
      match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
          warn!(key, raw, "Ignoring env override: not a number");
          None
        }
      }
    }
    fn parse_bool(key: &str, raw: &str) -> Option<bool> {
      match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => {
          warn!(key, raw, "Ignoring env override: not a boolean");
          None
        }
      }
    }

    let mut patch = Self::default();
    if let Some(v) = lookup("DOCSHELF_MODEL_ID") {
      patch.model_id = Some(v);
    }
    if let Some(v) = lookup("DOCSHELF_BATCH_SIZE") {
      patch.batch_size = parse_num("DOCSHELF_BATCH_SIZE", &v);
    }
    if let Some(v) = lookup("DOCSHELF_CHUNK_SIZE") {
      patch.chunk_size = parse_num("DOCSHELF_CHUNK_SIZE", &v);
    }
    if let Some(v) = lookup("DOCSHELF_OVERLAP") {
      patch.overlap = parse_num("DOCSHELF_OVERLAP", &v);
    }
    if let Some(v) = lookup("DOCSHELF_FILE_EXTENSIONS") {
      patch.file_extensions = parse_list("DOCSHELF_FILE_EXTENSIONS", &v);
    }
    if let Some(v) = lookup("DOCSHELF_IGNORE_PATTERNS") {
      patch.ignore_patterns = parse_list("DOCSHELF_IGNORE_PATTERNS", &v);
    }
    if let Some(v) = lookup("DOCSHELF_MAX_FILE_SIZE") {
      patch.max_file_size = parse_num("DOCSHELF_MAX_FILE_SIZE", &v);
    }
    if let Some(v) = lookup("DOCSHELF_PERFORMANCE_MODE") {
      patch.performance_mode = PerformanceMode::parse(&v);
      if patch.performance_mode.is_none() {
        warn!(raw = %v, "Ignoring DOCSHELF_PERFORMANCE_MODE: expected fast|balanced|accurate");
      }
    }
    if let Some(v) = lookup("DOCSHELF_ENABLE_DEBUG_OUTPUT") {
      patch.development.enable_debug_output = parse_bool("DOCSHELF_ENABLE_DEBUG_OUTPUT", &v);
    }
    if let Some(v) = lookup("DOCSHELF_HOT_RELOAD") {
      patch.development.hot_reload = parse_bool("DOCSHELF_HOT_RELOAD", &v);
    }
    patch
  }

  /// Read a layer from a TOML file. A missing file contributes nothing; a
  /// malformed file is reported and contributes nothing.
  pub fn from_file(path: &Path) -> Self {
    let Ok(content) = std::fs::read_to_string(path) else {
      return Self::default();
    };
    match toml::from_str(&content) {
      Ok(patch) => patch,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Ignoring malformed config file");
        Self::default()
      }
    }
  }
}

/// One changed option, produced by [`Config::diff`] on hot reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDelta {
  pub key: String,
  pub old: String,
  pub new: String,
}

/// A resolved configuration along with the layer each option came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
  pub config: Config,
  sources: BTreeMap<&'static str, ConfigSource>,
}

impl LoadedConfig {
  pub fn source_of(&self, key: &str) -> ConfigSource {
    self.sources.get(key).copied().unwrap_or(ConfigSource::Default)
  }

  pub fn sources(&self) -> &BTreeMap<&'static str, ConfigSource> {
    &self.sources
  }
}

impl Config {
  /// Resolve the full layer stack with the standard file locations.
  pub fn load(cli: ConfigPatch) -> LoadedConfig {
    Self::load_layers(
      ConfigPatch::from_file(&system_config_path()),
      ConfigPatch::from_file(&user_config_path()),
      ConfigPatch::from_env(),
      cli,
    )
  }

  /// Merge explicit layers; exposed so tests can supply each layer directly.
  pub fn load_layers(system: ConfigPatch, user: ConfigPatch, env: ConfigPatch, cli: ConfigPatch) -> LoadedConfig {
    let mut loaded = LoadedConfig {
      config: Config::default(),
      sources: BTreeMap::new(),
    };
    loaded.apply(system, ConfigSource::SystemFile);
    loaded.apply(user, ConfigSource::UserFile);
    loaded.apply(env, ConfigSource::Env);
    loaded.apply(cli, ConfigSource::Cli);
    loaded
  }

  /// Compute the per-option differences between two snapshots.
  pub fn diff(&self, new: &Config) -> Vec<ConfigDelta> {
    fn delta(out: &mut Vec<ConfigDelta>, key: &str, old: impl ToString, new: impl ToString) {
      let (old, new) = (old.to_string(), new.to_string());
      if old != new {
        out.push(ConfigDelta {
          key: key.to_string(),
          old,
          new,
        });
      }
    }

    let mut deltas = Vec::new();
    delta(&mut deltas, "model_id", &self.model_id, &new.model_id);
    delta(&mut deltas, "batch_size", self.batch_size, new.batch_size);
    delta(&mut deltas, "chunk_size", self.chunk_size, new.chunk_size);
    delta(&mut deltas, "overlap", self.overlap, new.overlap);
    delta(
      &mut deltas,
      "file_extensions",
      self.file_extensions.join(","),
      new.file_extensions.join(","),
    );
    delta(
      &mut deltas,
      "ignore_patterns",
      self.ignore_patterns.join(","),
      new.ignore_patterns.join(","),
    );
    delta(&mut deltas, "max_file_size", self.max_file_size, new.max_file_size);
    delta(
      &mut deltas,
      "performance_mode",
      self.performance_mode.as_str(),
      new.performance_mode.as_str(),
    );
    delta(
      &mut deltas,
      "development.enable_debug_output",
      self.development.enable_debug_output,
      new.development.enable_debug_output,
    );
    delta(
      &mut deltas,
      "development.hot_reload",
      self.development.hot_reload,
      new.development.hot_reload,
    );
    deltas
  }

  /// Worker scheduling parameters for the configured performance mode.
  pub fn worker_tuning(&self) -> WorkerTuning {
    match self.performance_mode {
      PerformanceMode::Fast => WorkerTuning {
        batch_size: self.batch_size * 2,
        max_in_flight: 2,
      },
      PerformanceMode::Balanced => WorkerTuning {
        batch_size: self.batch_size,
        max_in_flight: 2,
      },
      PerformanceMode::Accurate => WorkerTuning {
        batch_size: (self.batch_size / 2).max(1),
        max_in_flight: 1,
      },
    }
  }
}

impl LoadedConfig {
  fn apply(&mut self, patch: ConfigPatch, source: ConfigSource) {
    fn set<T>(slot: &mut T, value: Option<T>, key: &'static str, source: ConfigSource, sources: &mut BTreeMap<&'static str, ConfigSource>) {
      if let Some(value) = value {
        *slot = value;
        sources.insert(key, source);
      }
    }

    let c = &mut self.config;
    let s = &mut self.sources;
    set(&mut c.model_id, patch.model_id, "model_id", source, s);
    set(&mut c.batch_size, patch.batch_size, "batch_size", source, s);
    set(&mut c.chunk_size, patch.chunk_size, "chunk_size", source, s);
    set(&mut c.overlap, patch.overlap, "overlap", source, s);
    set(&mut c.file_extensions, patch.file_extensions, "file_extensions", source, s);
    set(&mut c.ignore_patterns, patch.ignore_patterns, "ignore_patterns", source, s);
    set(&mut c.max_file_size, patch.max_file_size, "max_file_size", source, s);
    set(&mut c.performance_mode, patch.performance_mode, "performance_mode", source, s);
    set(
      &mut c.development.enable_debug_output,
      patch.development.enable_debug_output,
      "development.enable_debug_output",
      source,
      s,
    );
    set(
      &mut c.development.hot_reload,
      patch.development.hot_reload,
      "development.hot_reload",
      source,
      s,
    );
  }
}

/// System-wide config file location.
pub fn system_config_path() -> PathBuf {
  PathBuf::from("/etc/docshelf/config.toml")
}

/// User config file location. `DOCSHELF_CONFIG_DIR` and `XDG_CONFIG_HOME`
/// override the platform default.
pub fn user_config_path() -> PathBuf {
  if let Ok(dir) = std::env::var("DOCSHELF_CONFIG_DIR") {
    return PathBuf::from(dir).join("config.toml");
  }
  if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
    return PathBuf::from(xdg).join("docshelf").join("config.toml");
  }
  dirs::config_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("docshelf")
    .join("config.toml")
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.model_id, "multilingual-e5-small");
    assert_eq!(config.chunk_size, 400);
    assert_eq!(config.performance_mode, PerformanceMode::Balanced);
    assert!(config.file_extensions.iter().any(|e| e == "pdf"));
    assert!(!config.development.hot_reload);
  }

  #[test]
  fn test_layer_precedence() {
    let system = ConfigPatch {
      model_id: Some("bge-m3".to_string()),
      batch_size: Some(8),
      ..Default::default()
    };
    let user = ConfigPatch {
      batch_size: Some(16),
      ..Default::default()
    };
    let env = ConfigPatch {
      chunk_size: Some(300),
      ..Default::default()
    };
    let cli = ConfigPatch {
      chunk_size: Some(250),
      ..Default::default()
    };

    let loaded = Config::load_layers(system, user, env, cli);
    assert_eq!(loaded.config.model_id, "bge-m3");
    assert_eq!(loaded.config.batch_size, 16); // user beats system
    assert_eq!(loaded.config.chunk_size, 250); // cli beats env

    assert_eq!(loaded.source_of("model_id"), ConfigSource::SystemFile);
    assert_eq!(loaded.source_of("batch_size"), ConfigSource::UserFile);
    assert_eq!(loaded.source_of("chunk_size"), ConfigSource::Cli);
    assert_eq!(loaded.source_of("overlap"), ConfigSource::Default);
  }

  #[test]
  fn test_env_parsing() {
    let patch = ConfigPatch::from_env_with(|key| match key {
      "DOCSHELF_MODEL_ID" => Some("multilingual-e5-large".to_string()),
      "DOCSHELF_BATCH_SIZE" => Some("64".to_string()),
      "DOCSHELF_FILE_EXTENSIONS" => Some(r#"["md","txt"]"#.to_string()),
      "DOCSHELF_HOT_RELOAD" => Some("true".to_string()),
      "DOCSHELF_PERFORMANCE_MODE" => Some("accurate".to_string()),
      _ => None,
    });

    assert_eq!(patch.model_id.as_deref(), Some("multilingual-e5-large"));
    assert_eq!(patch.batch_size, Some(64));
    assert_eq!(patch.file_extensions, Some(vec!["md".to_string(), "txt".to_string()]));
    assert_eq!(patch.development.hot_reload, Some(true));
    assert_eq!(patch.performance_mode, Some(PerformanceMode::Accurate));
  }

  #[test]
  fn test_env_bad_values_ignored() {
    let patch = ConfigPatch::from_env_with(|key| match key {
      "DOCSHELF_BATCH_SIZE" => Some("not-a-number".to_string()),
      "DOCSHELF_FILE_EXTENSIONS" => Some("md,txt".to_string()), // not JSON
      "DOCSHELF_PERFORMANCE_MODE" => Some("ludicrous".to_string()),
      _ => None,
    });

    assert!(patch.batch_size.is_none());
    assert!(patch.file_extensions.is_none());
    assert!(patch.performance_mode.is_none());
  }

  #[test]
  fn test_file_layer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
      &path,
      r#"
model_id = "bge-m3"
max_file_size = 1048576

[development]
enable_debug_output = true
"#,
    )
    .unwrap();

    let patch = ConfigPatch::from_file(&path);
    assert_eq!(patch.model_id.as_deref(), Some("bge-m3"));
    assert_eq!(patch.max_file_size, Some(1048576));
    assert_eq!(patch.development.enable_debug_output, Some(true));
    assert!(patch.batch_size.is_none());
  }

  #[test]
  fn test_missing_file_contributes_nothing() {
    let dir = TempDir::new().unwrap();
    let patch = ConfigPatch::from_file(&dir.path().join("nope.toml"));
    assert!(patch.is_empty());
  }

  #[test]
  fn test_serialize_load_fixpoint() {
    let loaded = Config::load_layers(
      ConfigPatch::default(),
      ConfigPatch {
        model_id: Some("bge-m3".to_string()),
        overlap: Some(32),
        ..Default::default()
      },
      ConfigPatch::default(),
      ConfigPatch::default(),
    );

    let toml_str = toml::to_string_pretty(&loaded.config).unwrap();
    let reparsed: Config = toml::from_str(&toml_str).unwrap();
    assert_eq!(reparsed, loaded.config);
  }

  #[test]
  fn test_diff() {
    let old = Config::default();
    let mut new = old.clone();
    new.model_id = "bge-m3".to_string();
    new.development.hot_reload = true;

    let deltas = old.diff(&new);
    assert_eq!(deltas.len(), 2);
    assert_eq!(deltas[0].key, "model_id");
    assert_eq!(deltas[0].new, "bge-m3");
    assert_eq!(deltas[1].key, "development.hot_reload");

    assert!(new.diff(&new).is_empty());
  }

  #[test]
  fn test_worker_tuning_modes() {
    let mut config = Config::default();

    config.performance_mode = PerformanceMode::Fast;
    assert_eq!(config.worker_tuning().batch_size, 64);

    config.performance_mode = PerformanceMode::Accurate;
    let tuning = config.worker_tuning();
    assert_eq!(tuning.batch_size, 16);
    assert_eq!(tuning.max_in_flight, 1);
  }
}
