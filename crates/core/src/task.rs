use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::FolderId;

/// What a task does to the index for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
  CreateEmbeddings,
  UpdateEmbeddings,
  RemoveEmbeddings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
  Pending,
  InProgress,
  Done,
  Failed,
}

/// Classification of task and folder failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
  /// File content malformed; per-file, non-fatal.
  Parse,
  /// Transient filesystem or permission error; retried.
  Io,
  /// The embedding worker died; tasks are re-queued.
  WorkerLost,
  /// A worker request timed out; treated as transient.
  WorkerTimeout,
  /// Model not in the capability registry; per-request fatal.
  UnsupportedModel,
  /// Capability table entry missing required fields.
  UnknownCapability,
  /// Persisted coords carry a version this reader refuses.
  SchemaVersion,
  /// Folder root unreadable; the folder moves to `error`.
  FatalScan,
}

impl ErrorClass {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Parse => "parse",
      Self::Io => "io",
      Self::WorkerLost => "worker-lost",
      Self::WorkerTimeout => "worker-timeout",
      Self::UnsupportedModel => "unsupported-model",
      Self::UnknownCapability => "unknown-capability",
      Self::SchemaVersion => "schema-version",
      Self::FatalScan => "fatal-scan",
    }
  }

  /// Whether a task failing with this class should be retried.
  pub fn retryable(&self) -> bool {
    matches!(self, Self::Io | Self::WorkerTimeout | Self::WorkerLost)
  }
}

/// A unit of work in a folder's queue.
#[derive(Debug, Clone)]
pub struct Task {
  pub id: Uuid,
  pub folder_id: FolderId,
  pub kind: TaskKind,
  /// Path relative to the folder root.
  pub file_path: PathBuf,
  pub attempt: u32,
  pub status: TaskStatus,
  pub last_error: Option<String>,
}

impl Task {
  pub fn new(folder_id: FolderId, kind: TaskKind, file_path: PathBuf) -> Self {
    Self {
      id: Uuid::now_v7(),
      folder_id,
      kind,
      file_path,
      attempt: 0,
      status: TaskStatus::Pending,
      last_error: None,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self.status, TaskStatus::Done | TaskStatus::Failed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::Path;

  #[test]
  fn test_error_class_strings() {
    assert_eq!(ErrorClass::WorkerLost.as_str(), "worker-lost");
    assert_eq!(ErrorClass::FatalScan.as_str(), "fatal-scan");
  }

  #[test]
  fn test_retryable_classes() {
    assert!(ErrorClass::Io.retryable());
    assert!(ErrorClass::WorkerTimeout.retryable());
    assert!(!ErrorClass::Parse.retryable());
    assert!(!ErrorClass::UnsupportedModel.retryable());
    assert!(!ErrorClass::SchemaVersion.retryable());
  }

  #[test]
  fn test_new_task_pending() {
    let task = Task::new(
      FolderId::from_path(Path::new("/docs")),
      TaskKind::CreateEmbeddings,
      PathBuf::from("report.pdf"),
    );
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempt, 0);
    assert!(!task.is_terminal());
  }
}
