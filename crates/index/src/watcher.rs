use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum WatchError {
  #[error("Failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),
  #[error("Failed to watch path: {0}")]
  Watch(#[source] notify::Error),
}

/// Type of file change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
  Created,
  Modified,
  Deleted,
  /// Old and new path observed in a single rename event.
  Renamed { from: PathBuf },
}

/// A raw file change, before debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
  pub path: PathBuf,
  pub kind: ChangeKind,
}

/// Raw event stream from the watcher backend, or loss of the backend.
#[derive(Debug)]
pub(crate) enum RawEvent {
  Changes(Vec<FileChange>),
  Lost(String),
}

/// OS file watcher bridged into the async world.
///
/// notify's callback runs on its own thread and forwards into a tokio
/// channel with `blocking_send`; the async side drains the receiver.
pub struct FileWatcher {
  // Held to keep the notify watcher alive.
  _watcher: RecommendedWatcher,
  pub(crate) rx: mpsc::Receiver<RawEvent>,
  root: PathBuf,
}

impl FileWatcher {
  pub fn new(root: &Path) -> Result<Self, WatchError> {
    Self::with_poll_interval(root, Duration::from_secs(2))
  }

  pub fn with_poll_interval(root: &Path, poll_interval: Duration) -> Result<Self, WatchError> {
    let (tx, rx) = mpsc::channel::<RawEvent>(256);

    let config = Config::default().with_poll_interval(poll_interval);
    let mut watcher = RecommendedWatcher::new(
      move |res: Result<Event, notify::Error>| {
        let raw = match res {
          Ok(event) => match process_event(event) {
            Some(changes) => RawEvent::Changes(changes),
            None => return,
          },
          Err(e) => RawEvent::Lost(e.to_string()),
        };
        // Runs on notify's thread. A full or closed channel drops the
        // event; the next scan reconciles.
        let _ = tx.blocking_send(raw);
      },
      config,
    )
    .map_err(WatchError::Init)?;

    watcher.watch(root, RecursiveMode::Recursive).map_err(WatchError::Watch)?;
    debug!(root = %root.display(), "File watcher armed");

    Ok(Self {
      _watcher: watcher,
      rx,
      root: root.to_path_buf(),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }
}

/// Map a notify event to file changes. Returns None for ignorable kinds.
fn process_event(event: Event) -> Option<Vec<FileChange>> {
  use notify::event::{ModifyKind, RenameMode};

  let kind = match event.kind {
    EventKind::Create(_) => ChangeKind::Created,
    EventKind::Modify(ModifyKind::Name(mode)) => match mode {
      RenameMode::Both if event.paths.len() >= 2 => {
        let from = event.paths[0].clone();
        let to = event.paths[1].clone();
        return Some(vec![FileChange {
          path: to,
          kind: ChangeKind::Renamed { from },
        }]);
      }
      RenameMode::From => ChangeKind::Deleted,
      RenameMode::To => ChangeKind::Created,
      _ => ChangeKind::Modified,
    },
    EventKind::Modify(_) => ChangeKind::Modified,
    EventKind::Remove(_) => ChangeKind::Deleted,
    EventKind::Access(_) | EventKind::Any | EventKind::Other => {
      trace!(kind = ?event.kind, "Ignoring event");
      return None;
    }
  };

  let changes: Vec<FileChange> = event
    .paths
    .into_iter()
    .map(|path| FileChange {
      path,
      kind: kind.clone(),
    })
    .collect();

  if changes.is_empty() { None } else { Some(changes) }
}
