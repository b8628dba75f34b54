//! Core domain types for Docshelf.
//!
//! Everything here is plain data: folder identity and status, file
//! fingerprints, documents and chunks with their extraction coordinates,
//! tasks, the model capability registry, and layered configuration.
//! No I/O except the config loader reading its files.

mod config;
mod document;
mod folder;
mod models;
mod task;

pub use config::{
  Config, ConfigDelta, ConfigPatch, ConfigSource, DevelopmentConfig, DevelopmentPatch, LoadedConfig, PerformanceMode,
  WorkerTuning, system_config_path, user_config_path,
};
pub use document::{
  COORDS_VERSION, Chunk, ChunkSemantics, CoordsError, DocumentMeta, DocumentRecord, ExtractionCoords, Fingerprint,
};
pub use folder::{FolderId, FolderStatus, Phase, ProgressSnapshot, store_dir};
pub use models::{EmbedKind, ModelCaps, ModelCapsError, builtin_models, lookup_model, postprocess_vector, prepare_text};
pub use task::{ErrorClass, Task, TaskKind, TaskStatus};

/// Rough token estimate divisor: ~4 characters per token for English prose.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a text in absolute character terms.
pub fn estimate_tokens(text: &str) -> u32 {
  (text.len() / CHARS_PER_TOKEN).max(1) as u32
}
