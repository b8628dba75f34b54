use docshelf_core::{CoordsError, FolderId, store_dir};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::schema::{CREATE_TABLES, SCHEMA_VERSION};

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Extraction coords error: {0}")]
  Coords(#[from] CoordsError),
  #[error("Store schema version {found} is not supported (reader supports {supported})")]
  SchemaVersion { found: u32, supported: u32 },
  #[error("Not found: {0}")]
  NotFound(String),
  #[error("Invalid row: {0}")]
  InvalidRow(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Handle to a folder's database.
///
/// One connection per folder per indexing cycle; callers share the handle
/// and the inner mutex serializes access. SQLite serializes writes anyway,
/// so contention here is short-lived.
#[derive(Debug)]
pub struct FolderStore {
  pub folder_id: FolderId,
  pub path: PathBuf,
  pub(crate) conn: Mutex<Connection>,
}

impl FolderStore {
  /// Open (or create) the store for a folder root.
  pub fn open(root: &Path, folder_id: FolderId) -> Result<Self> {
    let dir = store_dir(root);
    std::fs::create_dir_all(&dir)?;
    Self::open_at_path(folder_id, dir.join("index.db"))
  }

  /// Open a store at an explicit database path.
  pub fn open_at_path(folder_id: FolderId, db_path: PathBuf) -> Result<Self> {
    info!(path = %db_path.display(), folder_id = %folder_id, "Opening folder store");
    let conn = Connection::open(&db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let store = Self {
      folder_id,
      path: db_path,
      conn: Mutex::new(conn),
    };
    store.migrate()?;
    Ok(store)
  }

  /// Create tables and verify the schema version.
  fn migrate(&self) -> Result<()> {
    let conn = self.conn.lock();
    conn.execute_batch(CREATE_TABLES)?;

    match meta_get(&conn, "schema_version")? {
      None => {
        debug!(version = SCHEMA_VERSION, "Initializing store schema");
        meta_set(&conn, "schema_version", &SCHEMA_VERSION.to_string())?;
      }
      Some(raw) => {
        let found: u32 = raw
          .parse()
          .map_err(|_| StoreError::InvalidRow(format!("schema_version = {raw:?}")))?;
        if found != SCHEMA_VERSION {
          return Err(StoreError::SchemaVersion {
            found,
            supported: SCHEMA_VERSION,
          });
        }
      }
    }
    Ok(())
  }

  pub fn meta(&self, key: &str) -> Result<Option<String>> {
    meta_get(&self.conn.lock(), key)
  }

  pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
    meta_set(&self.conn.lock(), key, value)
  }

  /// The model every vector in this store belongs to, once set.
  pub fn model_id(&self) -> Result<Option<String>> {
    self.meta("model_id")
  }

  pub fn set_model_id(&self, model_id: &str) -> Result<()> {
    self.set_meta("model_id", model_id)
  }
}

fn meta_get(conn: &Connection, key: &str) -> Result<Option<String>> {
  let mut stmt = conn.prepare("SELECT value FROM meta WHERE key = ?1")?;
  let mut rows = stmt.query([key])?;
  match rows.next()? {
    Some(row) => Ok(Some(row.get(0)?)),
    None => Ok(None),
  }
}

fn meta_set(conn: &Connection, key: &str, value: &str) -> Result<()> {
  conn.execute(
    "INSERT INTO meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    [key, value],
  )?;
  Ok(())
}
