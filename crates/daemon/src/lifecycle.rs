//! Daemon lifecycle: pipeline initialization, folder registry ownership,
//! configuration reload, graceful shutdown.

use docshelf_core::{Config, ConfigDelta};
use embedding::{PipelineConfig, PipelineError, PipelineHandle, ProcessSpawner};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::FolderRegistry;
use crate::supervisor::SupervisorConfig;

#[derive(Error, Debug)]
pub enum DaemonError {
  #[error("Embedding pipeline error: {0}")]
  Pipeline(#[from] PipelineError),
}

/// Process-level options not covered by the layered config.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
  /// Embedding worker executable. `DOCSHELF_WORKER` overrides the default.
  pub worker_command: String,
  pub worker_args: Vec<String>,
}

impl Default for DaemonOptions {
  fn default() -> Self {
    Self {
      worker_command: std::env::var("DOCSHELF_WORKER").unwrap_or_else(|_| "docshelf-worker".to_string()),
      worker_args: Vec::new(),
    }
  }
}

/// The daemon: one embedding pipeline, one folder registry.
pub struct Daemon {
  registry: Arc<FolderRegistry>,
  pipeline: PipelineHandle,
  config_tx: watch::Sender<Arc<Config>>,
  cancel: CancellationToken,
}

impl Daemon {
  /// Start the daemon with the process-wide worker pipeline.
  pub fn new(config: Config, options: DaemonOptions) -> Result<Self, DaemonError> {
    let cancel = CancellationToken::new();
    let pipeline = match embedding::global() {
      Some(pipeline) => pipeline,
      None => embedding::init_global(
        Arc::new(ProcessSpawner::new(options.worker_command, options.worker_args)),
        PipelineConfig::default(),
        cancel.child_token(),
      )?,
    };
    Ok(Self::with_pipeline(config, pipeline, cancel))
  }

  /// Wire a daemon around an existing pipeline handle. Used by the test
  /// suites, which script the worker.
  pub fn with_pipeline(config: Config, pipeline: PipelineHandle, cancel: CancellationToken) -> Self {
    let config = Arc::new(config);
    let registry = Arc::new(
      FolderRegistry::new(Arc::clone(&config), pipeline.clone(), cancel.child_token())
        .with_supervisor_config(SupervisorConfig::default()),
    );
    let (config_tx, _) = watch::channel(config);

    Self {
      registry,
      pipeline,
      config_tx,
      cancel,
    }
  }

  pub fn registry(&self) -> Arc<FolderRegistry> {
    Arc::clone(&self.registry)
  }

  pub fn pipeline(&self) -> PipelineHandle {
    self.pipeline.clone()
  }

  /// Current configuration snapshot.
  pub fn config(&self) -> Arc<Config> {
    self.config_tx.borrow().clone()
  }

  /// Subscribe to configuration snapshots.
  pub fn subscribe_config(&self) -> watch::Receiver<Arc<Config>> {
    self.config_tx.subscribe()
  }

  /// Atomically swap the configuration snapshot and notify listeners.
  /// Returns the per-option diff; an empty diff swaps nothing.
  ///
  /// Folders registered after the reload see the new snapshot; already
  /// running folders keep theirs until restarted.
  pub fn reload_config(&self, new: Config) -> Vec<ConfigDelta> {
    let current = self.config_tx.borrow().clone();
    let deltas = current.diff(&new);
    if deltas.is_empty() {
      return deltas;
    }
    for delta in &deltas {
      info!(key = %delta.key, old = %delta.old, new = %delta.new, "Config changed");
    }
    let _ = self.config_tx.send(Arc::new(new));
    deltas
  }

  /// Block until ctrl-c, then shut everything down.
  pub async fn run_until_shutdown(&self) {
    if let Err(e) = signal::ctrl_c().await {
      warn!(error = %e, "Failed to listen for ctrl-c");
      return;
    }
    info!("Received ctrl-c, shutting down");
    self.shutdown().await;
  }

  pub async fn shutdown(&self) {
    self.registry.dispose_all().await;
    self.cancel.cancel();
    info!("Daemon shutdown complete");
  }
}
