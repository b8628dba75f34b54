//! Task execution: chunk, embed, enrich, persist — or purge.

use db::{DocumentWrite, FolderStore, StoreError};
use docshelf_core::{Chunk, EmbedKind, ErrorClass, Task, TaskKind, lookup_model, postprocess_vector};
use embedding::PipelineHandle;
use index::Chunker;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};

/// Everything a task execution needs; cheap to clone per spawn.
#[derive(Clone)]
pub(crate) struct TaskContext {
  pub root: PathBuf,
  pub store: Arc<FolderStore>,
  pub pipeline: PipelineHandle,
  pub chunker: Arc<Chunker>,
  pub model_id: String,
  pub embed_batch_size: usize,
}

/// A classified task failure.
#[derive(Debug, Clone)]
pub(crate) struct TaskFailure {
  pub class: ErrorClass,
  pub message: String,
}

impl TaskFailure {
  fn new(class: ErrorClass, message: impl Into<String>) -> Self {
    Self {
      class,
      message: message.into(),
    }
  }
}

fn store_failure(e: StoreError) -> TaskFailure {
  let class = match e {
    StoreError::SchemaVersion { .. } | StoreError::Coords(_) => ErrorClass::SchemaVersion,
    _ => ErrorClass::Io,
  };
  TaskFailure::new(class, e.to_string())
}

pub(crate) async fn execute_task(ctx: TaskContext, task: Task) -> Result<(), TaskFailure> {
  match task.kind {
    TaskKind::RemoveEmbeddings => {
      let path = task.file_path.to_string_lossy().into_owned();
      ctx.store.remove_document(&path).map_err(store_failure)?;
      debug!(path = %path, "Document purged");
      Ok(())
    }
    TaskKind::CreateEmbeddings | TaskKind::UpdateEmbeddings => index_file(ctx, task).await,
  }
}

async fn index_file(ctx: TaskContext, task: Task) -> Result<(), TaskFailure> {
  let absolute = ctx.root.join(&task.file_path);

  // Parsing is CPU- and IO-heavy; keep it off the runtime threads.
  let chunked = {
    let chunker = Arc::clone(&ctx.chunker);
    let root = ctx.root.clone();
    tokio::task::spawn_blocking(move || chunker.chunk_file(&absolute, &root))
      .await
      .map_err(|e| TaskFailure::new(ErrorClass::Io, format!("chunker task failed: {e}")))?
      .map_err(|e| TaskFailure::new(e.class(), e.to_string()))?
  };

  let mut chunks = chunked.chunks;
  let path = &chunked.meta.relative_path;

  // Empty file: a document with zero chunks and zero vectors.
  if chunks.is_empty() {
    trace!(path = %path, "No chunks; persisting empty document");
    ctx
      .store
      .insert_document(DocumentWrite {
        meta: &chunked.meta,
        chunks: &[],
        vectors: &[],
        model_id: &ctx.model_id,
        document_embedding: None,
        document_key_phrases: None,
      })
      .map_err(store_failure)?;
    return Ok(());
  }

  // Embed in configured batches through the fair indexing queue.
  let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
  let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
  for batch in texts.chunks(ctx.embed_batch_size.max(1)) {
    let output = ctx
      .pipeline
      .embed(&ctx.model_id, batch.to_vec(), EmbedKind::Passage)
      .await
      .map_err(|e| TaskFailure::new(e.class(), e.to_string()))?;
    vectors.extend(output.vectors);
  }

  // Enrichment rides the same transaction as the chunks and vectors.
  for (chunk, vector) in chunks.iter_mut().zip(&vectors) {
    let semantics = ctx
      .pipeline
      .enrich(&ctx.model_id, &chunk.text, vector)
      .await
      .map_err(|e| TaskFailure::new(e.class(), e.to_string()))?;
    chunk.semantic = Some(semantics);
  }

  let document_embedding = document_embedding(&ctx.model_id, &vectors);
  let document_key_phrases = document_key_phrases(&chunks);

  ctx
    .store
    .insert_document(DocumentWrite {
      meta: &chunked.meta,
      chunks: &chunks,
      vectors: &vectors,
      model_id: &ctx.model_id,
      document_embedding: document_embedding.as_deref(),
      document_key_phrases: Some(&document_key_phrases),
    })
    .map_err(store_failure)?;

  debug!(path = %path, chunks = chunks.len(), "Document indexed");
  Ok(())
}

/// Mean of the chunk vectors, post-processed like any other vector of the
/// model.
fn document_embedding(model_id: &str, vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
  let first = vectors.first()?;
  let dimension = first.len();
  let mut mean = vec![0.0f32; dimension];
  for vector in vectors {
    for (slot, v) in mean.iter_mut().zip(vector) {
      *slot += v;
    }
  }
  for slot in &mut mean {
    *slot /= vectors.len() as f32;
  }

  match lookup_model(model_id) {
    Ok(caps) => Some(postprocess_vector(mean, &caps)),
    Err(_) => Some(mean),
  }
}

/// Most frequent key phrases across the document's chunks.
fn document_key_phrases(chunks: &[Chunk]) -> Vec<String> {
  let mut counts: HashMap<&str, usize> = HashMap::new();
  for chunk in chunks {
    if let Some(semantic) = &chunk.semantic {
      for phrase in &semantic.key_phrases {
        *counts.entry(phrase.as_str()).or_default() += 1;
      }
    }
  }

  let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
  ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
  ranked.into_iter().take(8).map(|(phrase, _)| phrase.to_string()).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use docshelf_core::{COORDS_VERSION, ChunkSemantics, ExtractionCoords};
  use pretty_assertions::assert_eq;
  use uuid::Uuid;

  fn chunk_with_phrases(phrases: &[&str]) -> Chunk {
    let mut chunk = Chunk::new(
      Uuid::now_v7(),
      0,
      "text".to_string(),
      ExtractionCoords::Text {
        version: COORDS_VERSION,
        start_offset: 0,
        end_offset: 4,
      },
    );
    chunk.semantic = Some(ChunkSemantics {
      key_phrases: phrases.iter().map(|p| p.to_string()).collect(),
      topics: vec![],
      readability: 50.0,
    });
    chunk
  }

  #[test]
  fn test_document_embedding_is_mean() {
    // MiniLM requires L2 normalization, so check direction not magnitude.
    let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
    let mean = document_embedding("all-minilm-l6-v2", &vectors).unwrap();
    assert!((mean[0] - mean[1]).abs() < 1e-6);
    let norm: f32 = mean.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
  }

  #[test]
  fn test_document_embedding_empty() {
    assert!(document_embedding("bge-m3", &[]).is_none());
  }

  #[test]
  fn test_document_key_phrases_ranked_by_count() {
    let chunks = vec![
      chunk_with_phrases(&["shared phrase", "alpha only"]),
      chunk_with_phrases(&["shared phrase", "beta only"]),
    ];
    let phrases = document_key_phrases(&chunks);
    assert_eq!(phrases[0], "shared phrase");
    assert_eq!(phrases.len(), 3);
  }
}
