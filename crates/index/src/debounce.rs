//! Debounced change router.
//!
//! Collapses raw watcher events into per-path terminal changes, waits for a
//! settle window, and forwards coalesced batches to the folder supervisor.
//! Editor temp files and anything matching the ignore patterns are
//! suppressed before they ever reach a batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::scanner::build_ignore_matcher;
use crate::watcher::{ChangeKind, FileChange, FileWatcher, RawEvent};

#[derive(Debug, Clone)]
pub struct DebounceConfig {
  /// Settle window for a path's events.
  pub window: Duration,
  /// Distinct paths that force an early flush.
  pub max_batch: usize,
  /// Extensions the router lets through (lowercase, no dot).
  pub file_extensions: Vec<String>,
  /// Ignore patterns applied at the source.
  pub ignore_patterns: Vec<String>,
}

impl Default for DebounceConfig {
  fn default() -> Self {
    Self {
      window: Duration::from_millis(500),
      max_batch: 64,
      file_extensions: Vec::new(),
      ignore_patterns: Vec::new(),
    }
  }
}

/// What the router delivers to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
  /// A coalesced batch of settled changes.
  Batch(Vec<FileChange>),
  /// The watcher backend failed; the router has stopped. Non-fatal.
  WatcherLost(String),
}

struct PendingChange {
  kind: ChangeKind,
  last_seen: Instant,
}

impl PendingChange {
  fn new(kind: ChangeKind) -> Self {
    Self {
      kind,
      last_seen: Instant::now(),
    }
  }

  /// Coalesce a follow-up event into the pending terminal state.
  fn update(&mut self, kind: ChangeKind) {
    self.last_seen = Instant::now();
    match (&self.kind, &kind) {
      // Create followed by modify is still a create.
      (ChangeKind::Created, ChangeKind::Modified) => {}
      // Delete followed by create is a modify.
      (ChangeKind::Deleted, ChangeKind::Created) => self.kind = ChangeKind::Modified,
      // Create followed by delete cancels down to a delete.
      (ChangeKind::Created, ChangeKind::Deleted) => self.kind = ChangeKind::Deleted,
      // Rename followed by modify keeps the rename.
      (ChangeKind::Renamed { .. }, ChangeKind::Modified) => {}
      // Otherwise the last writer wins.
      _ => self.kind = kind,
    }
  }
}

/// The debounce router task.
pub struct DebounceRouter {
  watcher: FileWatcher,
  config: DebounceConfig,
  out: mpsc::Sender<RouterEvent>,
  cancel: CancellationToken,
}

impl DebounceRouter {
  pub fn new(
    watcher: FileWatcher,
    config: DebounceConfig,
    out: mpsc::Sender<RouterEvent>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      watcher,
      config,
      out,
      cancel,
    }
  }

  /// Spawn the router loop.
  pub fn spawn(
    watcher: FileWatcher,
    config: DebounceConfig,
    out: mpsc::Sender<RouterEvent>,
    cancel: CancellationToken,
  ) -> tokio::task::JoinHandle<()> {
    tokio::spawn(Self::new(watcher, config, out, cancel).run())
  }

  pub async fn run(mut self) {
    let root = self.watcher.root().to_path_buf();
    let ignore = build_ignore_matcher(&root, &self.config.ignore_patterns);
    let mut pending: HashMap<PathBuf, PendingChange> = HashMap::new();
    let mut tick = tokio::time::interval(self.config.window.min(Duration::from_millis(100)));

    debug!(root = %root.display(), "Debounce router started");

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          debug!("Debounce router cancelled");
          return;
        }

        raw = self.watcher.rx.recv() => {
          match raw {
            Some(RawEvent::Changes(changes)) => {
              for change in changes {
                self.accept(&root, &ignore, &mut pending, change);
              }
              if pending.len() >= self.config.max_batch {
                self.flush(&mut pending, true).await;
              }
            }
            Some(RawEvent::Lost(reason)) => {
              warn!(reason = %reason, "Watcher backend lost");
              self.flush(&mut pending, true).await;
              let _ = self.out.send(RouterEvent::WatcherLost(reason)).await;
              return;
            }
            None => {
              debug!("Watcher channel closed");
              self.flush(&mut pending, true).await;
              let _ = self.out.send(RouterEvent::WatcherLost("watcher dropped".to_string())).await;
              return;
            }
          }
        }

        _ = tick.tick() => {
          self.flush(&mut pending, false).await;
        }
      }
    }
  }

  fn accept(
    &self,
    root: &Path,
    ignore: &ignore::gitignore::Gitignore,
    pending: &mut HashMap<PathBuf, PendingChange>,
    change: FileChange,
  ) {
    // Rename expands to removed(old) + added(new) in the same batch.
    if let ChangeKind::Renamed { from } = &change.kind {
      let from = from.clone();
      if self.admits(root, ignore, &from) {
        upsert(pending, from, ChangeKind::Deleted);
      }
      if self.admits(root, ignore, &change.path) {
        upsert(pending, change.path, ChangeKind::Created);
      }
      return;
    }

    if !self.admits(root, ignore, &change.path) {
      trace!(path = %change.path.display(), "Suppressed at source");
      return;
    }
    upsert(pending, change.path, change.kind);
  }

  /// Source-side filter: ignore patterns and the include-extension set.
  fn admits(&self, root: &Path, ignore: &ignore::gitignore::Gitignore, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    if ignore.matched_path_or_any_parents(relative, false).is_ignore() {
      return false;
    }
    if self.config.file_extensions.is_empty() {
      return true;
    }
    path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_lowercase())
      .is_some_and(|e| self.config.file_extensions.iter().any(|inc| inc == &e))
  }

  async fn flush(&self, pending: &mut HashMap<PathBuf, PendingChange>, force: bool) {
    if pending.is_empty() {
      return;
    }
    let now = Instant::now();

    let settled: Vec<PathBuf> = pending
      .iter()
      .filter(|(_, change)| force || now.duration_since(change.last_seen) >= self.config.window)
      .map(|(path, _)| path.clone())
      .collect();
    if settled.is_empty() {
      return;
    }

    let mut batch: Vec<FileChange> = settled
      .into_iter()
      .filter_map(|path| {
        pending.remove(&path).map(|change| FileChange {
          path,
          kind: change.kind,
        })
      })
      .collect();
    batch.sort_by(|a, b| a.path.cmp(&b.path));

    debug!(count = batch.len(), "Flushing settled batch");
    if self.out.send(RouterEvent::Batch(batch)).await.is_err() {
      warn!("Router output closed; dropping batch");
    }
  }
}

fn upsert(pending: &mut HashMap<PathBuf, PendingChange>, path: PathBuf, kind: ChangeKind) {
  match pending.get_mut(&path) {
    Some(existing) => existing.update(kind),
    None => {
      pending.insert(path, PendingChange::new(kind));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  fn router(dir: &TempDir, out: mpsc::Sender<RouterEvent>) -> DebounceRouter {
    let watcher = FileWatcher::new(dir.path()).unwrap();
    DebounceRouter::new(
      watcher,
      DebounceConfig {
        window: Duration::from_millis(20),
        max_batch: 4,
        file_extensions: vec!["txt".into()],
        ignore_patterns: vec!["*.tmp".into()],
      },
      out,
      CancellationToken::new(),
    )
  }

  #[test]
  fn test_coalescing_rules() {
    // Create + modify = create.
    let mut pending = PendingChange::new(ChangeKind::Created);
    pending.update(ChangeKind::Modified);
    assert_eq!(pending.kind, ChangeKind::Created);

    // Delete + create = modify.
    let mut pending = PendingChange::new(ChangeKind::Deleted);
    pending.update(ChangeKind::Created);
    assert_eq!(pending.kind, ChangeKind::Modified);

    // Create + delete = delete.
    let mut pending = PendingChange::new(ChangeKind::Created);
    pending.update(ChangeKind::Deleted);
    assert_eq!(pending.kind, ChangeKind::Deleted);

    // Modify + modify = modify (last writer wins trivially).
    let mut pending = PendingChange::new(ChangeKind::Modified);
    pending.update(ChangeKind::Modified);
    assert_eq!(pending.kind, ChangeKind::Modified);
  }

  #[tokio::test]
  async fn test_rename_expands_to_delete_plus_create() {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::channel(4);
    let router = router(&dir, tx);
    let ignore = build_ignore_matcher(dir.path(), &router.config.ignore_patterns);
    let mut pending = HashMap::new();

    router.accept(
      dir.path(),
      &ignore,
      &mut pending,
      FileChange {
        path: dir.path().join("b.txt"),
        kind: ChangeKind::Renamed {
          from: dir.path().join("a.txt"),
        },
      },
    );

    assert_eq!(pending.len(), 2);
    router.flush(&mut pending, true).await;

    let RouterEvent::Batch(batch) = rx.recv().await.unwrap() else {
      panic!("expected batch");
    };
    // Same batch, lexicographic order: removed(a) then added(b).
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].kind, ChangeKind::Deleted);
    assert!(batch[0].path.ends_with("a.txt"));
    assert_eq!(batch[1].kind, ChangeKind::Created);
    assert!(batch[1].path.ends_with("b.txt"));
  }

  #[tokio::test]
  async fn test_temp_files_suppressed_at_source() {
    let dir = TempDir::new().unwrap();
    let (tx, _rx) = mpsc::channel(4);
    let router = router(&dir, tx);
    let ignore = build_ignore_matcher(dir.path(), &router.config.ignore_patterns);
    let mut pending = HashMap::new();

    router.accept(
      dir.path(),
      &ignore,
      &mut pending,
      FileChange {
        path: dir.path().join("x.tmp"),
        kind: ChangeKind::Created,
      },
    );
    router.accept(
      dir.path(),
      &ignore,
      &mut pending,
      FileChange {
        path: dir.path().join("notes.docx.unknown"),
        kind: ChangeKind::Created,
      },
    );

    assert!(pending.is_empty());
  }

  #[tokio::test]
  async fn test_rapid_writes_collapse_to_one_change() {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::channel(4);
    let router = router(&dir, tx);
    let ignore = build_ignore_matcher(dir.path(), &router.config.ignore_patterns);
    let mut pending = HashMap::new();

    for _ in 0..5 {
      router.accept(
        dir.path(),
        &ignore,
        &mut pending,
        FileChange {
          path: dir.path().join("hot.txt"),
          kind: ChangeKind::Modified,
        },
      );
    }

    assert_eq!(pending.len(), 1);
    router.flush(&mut pending, true).await;

    let RouterEvent::Batch(batch) = rx.recv().await.unwrap() else {
      panic!("expected batch");
    };
    assert_eq!(batch.len(), 1);
  }

  #[tokio::test]
  async fn test_unsettled_changes_not_flushed() {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::channel(4);
    let router = router(&dir, tx);
    let ignore = build_ignore_matcher(dir.path(), &router.config.ignore_patterns);
    let mut pending = HashMap::new();

    router.accept(
      dir.path(),
      &ignore,
      &mut pending,
      FileChange {
        path: dir.path().join("fresh.txt"),
        kind: ChangeKind::Created,
      },
    );

    // Not yet settled, non-forced flush keeps it pending.
    router.flush(&mut pending, false).await;
    assert_eq!(pending.len(), 1);
    assert!(rx.try_recv().is_err());

    tokio::time::sleep(Duration::from_millis(30)).await;
    router.flush(&mut pending, false).await;
    assert!(pending.is_empty());
    assert!(rx.try_recv().is_ok());
  }
}
