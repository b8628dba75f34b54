//! Per-folder lifecycle supervisor.
//!
//! One actor per monitored folder owns the store handle, the watcher, and
//! the task queue, and drives the status machine:
//! `pending → scanning → ready → indexing → active`, back to `scanning`
//! on debounced change batches, with an orthogonal `error` state that only
//! an explicit restart leaves.

use chrono::{DateTime, Utc};
use db::FolderStore;
use docshelf_core::{
  Config, ErrorClass, FolderId, FolderStatus, Phase, ProgressSnapshot, Task, TaskKind, TaskStatus,
};
use embedding::PipelineHandle;
use index::{
  ChangeKind, Chunker, ChunkerConfig, DebounceConfig, DebounceRouter, FileChange, FileWatcher, RouterEvent, ScanConfig,
  ScanError, Scanner,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::{TaskQueue, retry_backoff};
use crate::runner::{TaskContext, TaskFailure, execute_task};

#[derive(Error, Debug)]
pub enum SupervisorError {
  #[error("Store error: {0}")]
  Store(#[from] db::StoreError),
  #[error("Supervisor has shut down")]
  Closed,
  #[error("Timed out waiting for status {0:?}")]
  WaitTimeout(FolderStatus),
}

/// Tuning for one supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
  /// Retry budget per task (attempts, not retries).
  pub max_attempts: u32,
  /// Concurrent task executions within the folder.
  pub concurrency: usize,
  /// Debounce window for the change router.
  pub debounce_window: Duration,
}

impl Default for SupervisorConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      concurrency: 3,
      debounce_window: Duration::from_millis(500),
    }
  }
}

enum Command {
  Start,
  Restart,
  Changes(Vec<FileChange>),
  Dispose,
}

/// Cheap-to-clone handle to a folder supervisor.
#[derive(Clone)]
pub struct FolderHandle {
  pub folder_id: FolderId,
  pub root: PathBuf,
  cmd_tx: mpsc::Sender<Command>,
  progress_rx: watch::Receiver<ProgressSnapshot>,
}

impl FolderHandle {
  /// Begin the first scan. Idempotent: a no-op once past `pending`.
  pub async fn start(&self) -> Result<(), SupervisorError> {
    self.cmd_tx.send(Command::Start).await.map_err(|_| SupervisorError::Closed)
  }

  /// Leave `error` and run a fresh cycle.
  pub async fn restart(&self) -> Result<(), SupervisorError> {
    self
      .cmd_tx
      .send(Command::Restart)
      .await
      .map_err(|_| SupervisorError::Closed)
  }

  /// Inject a change batch, as the debounce router would.
  pub async fn notify_changes(&self, changes: Vec<FileChange>) -> Result<(), SupervisorError> {
    self
      .cmd_tx
      .send(Command::Changes(changes))
      .await
      .map_err(|_| SupervisorError::Closed)
  }

  /// Abandon pending work and release the watcher and store.
  pub async fn dispose(&self) {
    let _ = self.cmd_tx.send(Command::Dispose).await;
  }

  /// Current progress snapshot.
  pub fn progress(&self) -> ProgressSnapshot {
    self.progress_rx.borrow().clone()
  }

  /// Subscribe to progress updates.
  pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
    self.progress_rx.clone()
  }

  /// Await a particular folder status.
  pub async fn wait_for_status(&self, status: FolderStatus, timeout: Duration) -> Result<(), SupervisorError> {
    let mut rx = self.progress_rx.clone();
    tokio::time::timeout(timeout, rx.wait_for(|p| p.status == status))
      .await
      .map_err(|_| SupervisorError::WaitTimeout(status))?
      .map_err(|_| SupervisorError::Closed)?;
    Ok(())
  }
}

pub struct FolderSupervisor {
  folder_id: FolderId,
  root: PathBuf,
  config: Arc<Config>,
  sup_config: SupervisorConfig,
  store: Arc<FolderStore>,
  pipeline: PipelineHandle,
  chunker: Arc<Chunker>,

  status: FolderStatus,
  queue: TaskQueue,
  total: usize,
  done: usize,
  failed: usize,
  last_error: Option<String>,
  /// Change batches arriving while a drain is running; applied as a
  /// follow-up scan after the drain.
  buffered: Vec<FileChange>,

  last_scan_started: Option<DateTime<Utc>>,
  last_index_started: Option<DateTime<Utc>>,
  last_index_completed: Option<DateTime<Utc>>,

  progress_tx: watch::Sender<ProgressSnapshot>,
  router_cancel: Option<CancellationToken>,
  cancel: CancellationToken,
}

impl FolderSupervisor {
  /// Open the folder store and spawn the supervisor actor.
  pub fn spawn(
    root: PathBuf,
    config: Arc<Config>,
    sup_config: SupervisorConfig,
    pipeline: PipelineHandle,
    cancel: CancellationToken,
  ) -> Result<FolderHandle, SupervisorError> {
    let folder_id = FolderId::from_path(&root);
    let store = Arc::new(FolderStore::open(&root, folder_id.clone())?);

    // A model change invalidates every persisted vector (I2): wipe and
    // re-index under the new model.
    match store.model_id()? {
      Some(previous) if previous != config.model_id => {
        warn!(folder_id = %folder_id, from = %previous, to = %config.model_id, "Model changed; clearing folder store");
        store.clear_documents()?;
        store.set_model_id(&config.model_id)?;
      }
      None => store.set_model_id(&config.model_id)?,
      Some(_) => {}
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (progress_tx, progress_rx) = watch::channel(ProgressSnapshot::idle());

    let supervisor = Self {
      folder_id: folder_id.clone(),
      root: root.clone(),
      chunker: Arc::new(Chunker::new(ChunkerConfig::from(config.as_ref()))),
      config,
      sup_config,
      store,
      pipeline,
      status: FolderStatus::Pending,
      queue: TaskQueue::new(),
      total: 0,
      done: 0,
      failed: 0,
      last_error: None,
      buffered: Vec::new(),
      last_scan_started: None,
      last_index_started: None,
      last_index_completed: None,
      progress_tx,
      router_cancel: None,
      cancel,
    };
    tokio::spawn(supervisor.run(cmd_rx));

    Ok(FolderHandle {
      folder_id,
      root,
      cmd_tx,
      progress_rx,
    })
  }

  async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
    info!(folder_id = %self.folder_id, root = %self.root.display(), "Folder supervisor started");
    let mut router: Option<mpsc::Receiver<RouterEvent>> = None;

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => break,

        cmd = cmd_rx.recv() => match cmd {
          Some(Command::Start) => {
            if self.status == FolderStatus::Pending {
              self.cycle(&mut cmd_rx, &mut router).await;
            }
          }
          Some(Command::Restart) => {
            info!(folder_id = %self.folder_id, "Restarting folder");
            self.last_error = None;
            self.set_status(FolderStatus::Pending);
            self.cycle(&mut cmd_rx, &mut router).await;
          }
          Some(Command::Changes(batch)) => {
            self.on_changes(batch, &mut cmd_rx, &mut router).await;
          }
          Some(Command::Dispose) | None => break,
        },

        event = recv_router(&mut router) => match event {
          Some(RouterEvent::Batch(batch)) => {
            self.on_changes(batch, &mut cmd_rx, &mut router).await;
          }
          Some(RouterEvent::WatcherLost(reason)) => {
            // Non-fatal: disarm and stay in the current status.
            warn!(folder_id = %self.folder_id, reason = %reason, "Watcher lost; folder continues without it");
            self.disarm_watcher(&mut router);
          }
          None => router = None,
        },
      }
    }

    self.disarm_watcher(&mut router);
    self.queue.clear();
    info!(folder_id = %self.folder_id, "Folder supervisor stopped");
  }

  /// A debounced change batch arrived.
  async fn on_changes(
    &mut self,
    batch: Vec<FileChange>,
    cmd_rx: &mut mpsc::Receiver<Command>,
    router: &mut Option<mpsc::Receiver<RouterEvent>>,
  ) {
    if batch.is_empty() {
      return;
    }
    match self.status {
      // Re-enter scanning; the scan diff subsumes the batch contents.
      FolderStatus::Active => {
        debug!(folder_id = %self.folder_id, changes = batch.len(), "Change batch; rescanning");
        self.cycle(cmd_rx, router).await;
      }
      // Mid-drain batches buffer until the drain ends (the drain loop
      // itself also buffers; this arm catches stragglers).
      FolderStatus::Indexing | FolderStatus::Ready | FolderStatus::Scanning => {
        self.buffered.extend(batch);
      }
      FolderStatus::Pending | FolderStatus::Error => {}
    }
  }

  /// One full scan → index cycle, repeated while changes buffer up.
  async fn cycle(&mut self, cmd_rx: &mut mpsc::Receiver<Command>, router: &mut Option<mpsc::Receiver<RouterEvent>>) {
    loop {
      self.buffered.clear();
      self.set_status(FolderStatus::Scanning);
      self.last_scan_started = Some(Utc::now());
      self.publish();

      let tasks = match self.scan().await {
        Ok(tasks) => tasks,
        Err(message) => {
          // fatal-scan: no partial tasks, folder parks in error.
          error!(folder_id = %self.folder_id, message = %message, "Scan failed");
          self.last_error = Some(message);
          self.set_status(FolderStatus::Error);
          self.publish();
          return;
        }
      };

      if tasks.is_empty() {
        self.last_index_completed = Some(Utc::now());
        self.set_status(FolderStatus::Active);
        self.arm_watcher(router);
        self.publish();
        return;
      }

      self.total = tasks.len();
      self.done = 0;
      self.failed = 0;
      self.queue.enqueue_batch(tasks);
      self.set_status(FolderStatus::Ready);
      self.publish();

      self.set_status(FolderStatus::Indexing);
      self.last_index_started = Some(Utc::now());
      self.publish();

      if !self.drain(cmd_rx, router).await {
        return; // cancelled
      }

      // Per-file failures are tolerated, but a cycle in which every task
      // failed points at misconfiguration (e.g. an unusable model).
      if self.total > 0 && self.failed == self.total {
        error!(folder_id = %self.folder_id, failed = self.failed, "Every task failed");
        self.set_status(FolderStatus::Error);
        self.publish();
        return;
      }

      self.last_index_completed = Some(Utc::now());
      self.set_status(FolderStatus::Active);
      self.arm_watcher(router);
      self.publish();

      if self.buffered.is_empty() {
        return;
      }
      debug!(folder_id = %self.folder_id, buffered = self.buffered.len(), "Applying buffered changes with a follow-up scan");
    }
  }

  /// Scan and diff against the persisted fingerprints. Returns the task
  /// batch, or the fatal error message.
  async fn scan(&mut self) -> Result<Vec<Task>, String> {
    let previous = self.store.document_fingerprints().map_err(|e| e.to_string())?;

    let scanner = Scanner::new(ScanConfig::from(self.config.as_ref()));
    let root = self.root.clone();
    let outcome = tokio::task::spawn_blocking(move || scanner.scan(&root, &previous))
      .await
      .map_err(|e| format!("scan task failed: {e}"))?
      .map_err(|e| match e {
        ScanError::RootUnreadable(message) => format!("{}: {message}", ErrorClass::FatalScan.as_str()),
      })?;

    for issue in &outcome.errors {
      warn!(folder_id = %self.folder_id, path = %issue.path, reason = %issue.reason, "Scan issue");
      self.last_error = Some(format!("{}: {}", issue.path, issue.reason));
    }

    let mut tasks = Vec::with_capacity(outcome.change_count());
    for (path, _) in &outcome.added {
      tasks.push(Task::new(self.folder_id.clone(), TaskKind::CreateEmbeddings, PathBuf::from(path)));
    }
    for (path, _) in &outcome.modified {
      tasks.push(Task::new(self.folder_id.clone(), TaskKind::UpdateEmbeddings, PathBuf::from(path)));
    }
    for path in &outcome.removed {
      tasks.push(Task::new(self.folder_id.clone(), TaskKind::RemoveEmbeddings, PathBuf::from(path)));
    }

    debug!(
      folder_id = %self.folder_id,
      added = outcome.added.len(),
      modified = outcome.modified.len(),
      removed = outcome.removed.len(),
      unchanged = outcome.unchanged.len(),
      "Scan diff complete"
    );
    Ok(tasks)
  }

  /// Drain the queue with bounded concurrency. Returns false on
  /// cancellation.
  async fn drain(&mut self, cmd_rx: &mut mpsc::Receiver<Command>, router: &mut Option<mpsc::Receiver<RouterEvent>>) -> bool {
    let mut in_flight: JoinSet<(Task, Result<(), TaskFailure>)> = JoinSet::new();

    loop {
      // Keep the per-folder concurrency cap saturated.
      while in_flight.len() < self.sup_config.concurrency {
        let Some(mut task) = self.queue.pop_ready(Instant::now()) else {
          break;
        };
        task.status = TaskStatus::InProgress;
        let ctx = self.task_context();
        in_flight.spawn(async move {
          let result = execute_task(ctx, task.clone()).await;
          (task, result)
        });
      }

      if in_flight.is_empty() && self.queue.is_empty() {
        return true;
      }

      // Nothing running but delayed retries exist: sleep until one is due.
      let idle_wait = if in_flight.is_empty() {
        self.queue.next_delay(Instant::now()).unwrap_or(Duration::from_millis(50))
      } else {
        Duration::from_secs(3600)
      };

      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          in_flight.abort_all();
          return false;
        }

        Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
          match joined {
            Ok((task, result)) => self.on_task_finished(task, result),
            Err(e) => {
              warn!(folder_id = %self.folder_id, error = %e, "Task join failed");
              self.failed += 1;
            }
          }
          self.publish();
        }

        cmd = cmd_rx.recv() => match cmd {
          Some(Command::Changes(batch)) => self.buffered.extend(batch),
          Some(Command::Dispose) | None => {
            in_flight.abort_all();
            self.cancel.cancel();
            return false;
          }
          Some(Command::Start) | Some(Command::Restart) => {}
        },

        event = recv_router(router) => match event {
          Some(RouterEvent::Batch(batch)) => self.buffered.extend(batch),
          Some(RouterEvent::WatcherLost(reason)) => {
            warn!(folder_id = %self.folder_id, reason = %reason, "Watcher lost during drain");
            self.disarm_watcher(router);
          }
          None => *router = None,
        },

        _ = tokio::time::sleep(idle_wait), if in_flight.is_empty() => {}
      }
    }
  }

  fn on_task_finished(&mut self, mut task: Task, result: Result<(), TaskFailure>) {
    match result {
      Ok(()) => {
        task.status = TaskStatus::Done;
        self.done += 1;
      }
      Err(failure) => {
        task.attempt += 1;
        task.last_error = Some(failure.message.clone());
        self.last_error = Some(format!("{}: {}", task.file_path.display(), failure.message));

        let worker_loss = matches!(failure.class, ErrorClass::WorkerLost);
        let within_budget = task.attempt < self.sup_config.max_attempts;

        // Worker loss re-queues without burning the retry budget; other
        // retryable failures back off until exhaustion.
        if failure.class.retryable() && (worker_loss || within_budget) {
          debug!(
            folder_id = %self.folder_id,
            path = %task.file_path.display(),
            attempt = task.attempt,
            class = failure.class.as_str(),
            "Task re-queued"
          );
          task.status = TaskStatus::Pending;
          let ready_at = Instant::now() + retry_backoff(task.attempt);
          self.queue.enqueue_delayed(task, ready_at);
        } else {
          warn!(
            folder_id = %self.folder_id,
            path = %task.file_path.display(),
            class = failure.class.as_str(),
            error = %failure.message,
            "Task failed terminally"
          );
          task.status = TaskStatus::Failed;
          self.failed += 1;
        }
      }
    }
  }

  fn task_context(&self) -> TaskContext {
    TaskContext {
      root: self.root.clone(),
      store: Arc::clone(&self.store),
      pipeline: self.pipeline.clone(),
      chunker: Arc::clone(&self.chunker),
      model_id: self.config.model_id.clone(),
      embed_batch_size: self.config.worker_tuning().batch_size,
    }
  }

  fn arm_watcher(&mut self, router: &mut Option<mpsc::Receiver<RouterEvent>>) {
    if router.is_some() {
      return;
    }
    let watcher = match FileWatcher::new(&self.root) {
      Ok(watcher) => watcher,
      Err(e) => {
        warn!(folder_id = %self.folder_id, error = %e, "Failed to arm watcher; folder stays active without it");
        return;
      }
    };

    let (tx, rx) = mpsc::channel(16);
    let router_cancel = self.cancel.child_token();
    DebounceRouter::spawn(
      watcher,
      DebounceConfig {
        window: self.sup_config.debounce_window,
        max_batch: 64,
        file_extensions: self.config.file_extensions.clone(),
        ignore_patterns: self.config.ignore_patterns.clone(),
      },
      tx,
      router_cancel.clone(),
    );
    self.router_cancel = Some(router_cancel);
    *router = Some(rx);
    debug!(folder_id = %self.folder_id, "Watcher armed");
  }

  fn disarm_watcher(&mut self, router: &mut Option<mpsc::Receiver<RouterEvent>>) {
    if let Some(cancel) = self.router_cancel.take() {
      cancel.cancel();
    }
    *router = None;
  }

  fn set_status(&mut self, status: FolderStatus) {
    if self.status != status {
      debug!(folder_id = %self.folder_id, from = self.status.as_str(), to = status.as_str(), "Status transition");
      self.status = status;
    }
  }

  fn publish(&self) {
    let phase = match self.status {
      FolderStatus::Pending => Phase::Idle,
      FolderStatus::Scanning => Phase::Scanning,
      FolderStatus::Ready | FolderStatus::Indexing => Phase::Indexing,
      FolderStatus::Active => Phase::Complete,
      FolderStatus::Error => Phase::Error,
    };
    let _ = self.progress_tx.send(ProgressSnapshot {
      status: self.status,
      phase,
      total: self.total,
      done: self.done,
      failed: self.failed,
      last_error: self.last_error.clone(),
    });
  }
}

async fn recv_router(router: &mut Option<mpsc::Receiver<RouterEvent>>) -> Option<RouterEvent> {
  match router {
    Some(rx) => rx.recv().await,
    None => std::future::pending().await,
  }
}

/// Map a change batch to the kinds of tasks it implies. Used by tests and
/// status tooling; the supervisor itself rescans, which subsumes this.
pub fn classify_changes(changes: &[FileChange]) -> (usize, usize, usize) {
  let mut created = 0;
  let mut modified = 0;
  let mut deleted = 0;
  for change in changes {
    match change.kind {
      ChangeKind::Created => created += 1,
      ChangeKind::Modified => modified += 1,
      ChangeKind::Deleted => deleted += 1,
      ChangeKind::Renamed { .. } => {
        created += 1;
        deleted += 1;
      }
    }
  }
  (created, modified, deleted)
}
