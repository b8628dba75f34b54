//! Registry of supervised folders.

use dashmap::DashMap;
use docshelf_core::{Config, FolderId};
use embedding::PipelineHandle;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::supervisor::{FolderHandle, FolderSupervisor, SupervisorConfig, SupervisorError};

pub struct FolderRegistry {
  folders: DashMap<FolderId, FolderHandle>,
  config: Arc<Config>,
  sup_config: SupervisorConfig,
  pipeline: PipelineHandle,
  cancel: CancellationToken,
}

impl FolderRegistry {
  pub fn new(config: Arc<Config>, pipeline: PipelineHandle, cancel: CancellationToken) -> Self {
    Self {
      folders: DashMap::new(),
      config,
      sup_config: SupervisorConfig::default(),
      pipeline,
      cancel,
    }
  }

  pub fn with_supervisor_config(mut self, sup_config: SupervisorConfig) -> Self {
    self.sup_config = sup_config;
    self
  }

  /// Register a folder (idempotent) and return its handle.
  pub fn add_folder(&self, root: &Path) -> Result<FolderHandle, SupervisorError> {
    let folder_id = FolderId::from_path(root);
    if let Some(existing) = self.folders.get(&folder_id) {
      return Ok(existing.clone());
    }

    let handle = FolderSupervisor::spawn(
      root.to_path_buf(),
      Arc::clone(&self.config),
      self.sup_config.clone(),
      self.pipeline.clone(),
      self.cancel.child_token(),
    )?;
    info!(folder_id = %folder_id, root = %root.display(), "Folder registered");
    self.folders.insert(folder_id, handle.clone());
    Ok(handle)
  }

  /// Dispose a folder's supervisor and forget it.
  pub async fn remove_folder(&self, root: &Path) -> bool {
    let folder_id = FolderId::from_path(root);
    match self.folders.remove(&folder_id) {
      Some((_, handle)) => {
        handle.dispose().await;
        info!(folder_id = %folder_id, "Folder removed");
        true
      }
      None => false,
    }
  }

  pub fn get(&self, root: &Path) -> Option<FolderHandle> {
    let folder_id = FolderId::from_path(root);
    self.folders.get(&folder_id).map(|h| h.clone())
  }

  pub fn list(&self) -> Vec<FolderHandle> {
    self.folders.iter().map(|entry| entry.value().clone()).collect()
  }

  pub fn len(&self) -> usize {
    self.folders.len()
  }

  pub fn is_empty(&self) -> bool {
    self.folders.is_empty()
  }

  pub async fn dispose_all(&self) {
    for entry in self.folders.iter() {
      entry.value().dispose().await;
    }
    self.folders.clear();
  }
}
