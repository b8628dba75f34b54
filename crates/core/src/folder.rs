use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable opaque identifier for a monitored folder.
///
/// Derived from the canonical root path so the same folder always maps to
/// the same id across daemon restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(String);

impl FolderId {
  pub fn from_path(path: &Path) -> Self {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let hash = hasher.finalize();
    Self(hex::encode(&hash[..8]))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for FolderId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Directory holding the folder-scoped store and scratch files.
pub fn store_dir(root: &Path) -> PathBuf {
  root.join(".docshelf")
}

/// Lifecycle status of a monitored folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderStatus {
  /// Registered, no work started yet.
  Pending,
  /// Walking the tree and diffing fingerprints.
  Scanning,
  /// Diff produced a non-empty task queue.
  Ready,
  /// Task queue is draining.
  Indexing,
  /// Queue empty, watcher armed.
  Active,
  /// Fatal failure; exits only by explicit restart.
  Error,
}

impl FolderStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Scanning => "scanning",
      Self::Ready => "ready",
      Self::Indexing => "indexing",
      Self::Active => "active",
      Self::Error => "error",
    }
  }
}

/// Coarse phase reported through [`ProgressSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  Idle,
  Scanning,
  Indexing,
  Complete,
  Error,
}

/// Observable progress of a folder's current cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
  pub status: FolderStatus,
  pub phase: Phase,
  pub total: usize,
  pub done: usize,
  pub failed: usize,
  /// Most recent per-folder error string, if any.
  pub last_error: Option<String>,
}

impl ProgressSnapshot {
  pub fn idle() -> Self {
    Self {
      status: FolderStatus::Pending,
      phase: Phase::Idle,
      total: 0,
      done: 0,
      failed: 0,
      last_error: None,
    }
  }

  /// Completion percentage, `done / max(total, 1)`, clamped to [0, 100].
  pub fn percent(&self) -> u8 {
    let total = self.total.max(1);
    (((self.done as f64 / total as f64) * 100.0).clamp(0.0, 100.0)) as u8
  }
}
