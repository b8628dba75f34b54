//! Read-side handlers backing the MCP tools and the CLI search command.
//!
//! Everything here is servable straight from the folder store; only
//! `search` touches the embedding pipeline (for the query vector).

use db::{FolderStore, StoreError};
use docshelf_core::{EmbedKind, ExtractionCoords};
use embedding::{PipelineError, PipelineHandle};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
  #[error("Store error: {0}")]
  Store(#[from] StoreError),
  #[error("Embedding error: {0}")]
  Pipeline(#[from] PipelineError),
  #[error("Not found: {0}")]
  NotFound(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
  pub document_path: String,
  pub ordinal: u32,
  pub text: String,
  pub score: f32,
  pub key_phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
  pub path: String,
  pub chunk_count: usize,
  pub indexed_at: String,
  pub key_phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlineEntry {
  pub ordinal: u32,
  pub token_count: u32,
  pub coords: serde_json::Value,
  pub preview: String,
  pub topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutline {
  pub path: String,
  pub chunk_count: usize,
  pub entries: Vec<OutlineEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageText {
  pub page: u32,
  pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlideText {
  pub start_slide: u32,
  pub end_slide: u32,
  pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetRange {
  pub sheet: String,
  pub header_row: u32,
  pub start_row: u32,
  pub end_row: u32,
  pub text: String,
}

/// Semantic search: embed the query on the interactive class and rank the
/// folder's vectors.
pub async fn search(
  store: &FolderStore,
  pipeline: &PipelineHandle,
  model_id: &str,
  query: &str,
  limit: usize,
) -> Result<Vec<SearchResultItem>, ToolError> {
  let output = pipeline.embed(model_id, vec![query.to_string()], EmbedKind::Query).await?;
  let query_vector = output
    .vectors
    .into_iter()
    .next()
    .ok_or_else(|| ToolError::NotFound("query produced no vector".to_string()))?;

  let hits = store.search(&query_vector, model_id, limit)?;
  Ok(
    hits
      .into_iter()
      .map(|hit| SearchResultItem {
        document_path: hit.document_path,
        ordinal: hit.chunk.ordinal,
        text: hit.chunk.text,
        score: hit.score,
        key_phrases: hit
          .chunk
          .semantic
          .map(|s| s.key_phrases)
          .unwrap_or_default(),
      })
      .collect(),
  )
}

pub fn list_documents(store: &FolderStore) -> Result<Vec<DocumentSummary>, ToolError> {
  Ok(
    store
      .list_documents()?
      .into_iter()
      .map(|doc| DocumentSummary {
        path: doc.relative_path,
        chunk_count: doc.chunk_count,
        indexed_at: doc.indexed_at.to_rfc3339(),
        key_phrases: doc.document_key_phrases.unwrap_or_default(),
      })
      .collect(),
  )
}

pub fn get_document_outline(store: &FolderStore, path: &str) -> Result<DocumentOutline, ToolError> {
  let document = store
    .document_by_path(path)?
    .ok_or_else(|| ToolError::NotFound(path.to_string()))?;

  let entries = store
    .chunks_for_path(path)?
    .into_iter()
    .map(|chunk| OutlineEntry {
      ordinal: chunk.ordinal,
      token_count: chunk.token_count,
      coords: serde_json::from_str(&chunk.coords.to_json()).unwrap_or(serde_json::Value::Null),
      preview: chunk.text.chars().take(80).collect(),
      topics: chunk.semantic.map(|s| s.topics).unwrap_or_default(),
    })
    .collect();

  Ok(DocumentOutline {
    path: document.relative_path,
    chunk_count: document.chunk_count,
    entries,
  })
}

/// Page texts of a PDF document, optionally restricted to specific pages.
pub fn get_pages(store: &FolderStore, path: &str, pages: Option<&[u32]>) -> Result<Vec<PageText>, ToolError> {
  let chunks = existing_chunks(store, path)?;

  let mut by_page: BTreeMap<u32, Vec<String>> = BTreeMap::new();
  for chunk in chunks {
    if let ExtractionCoords::Pdf { page, .. } = chunk.coords {
      if pages.is_none_or(|wanted| wanted.contains(&page)) {
        by_page.entry(page).or_default().push(chunk.text);
      }
    }
  }

  Ok(
    by_page
      .into_iter()
      .map(|(page, texts)| PageText {
        page,
        text: texts.join("\n\n"),
      })
      .collect(),
  )
}

/// Slide texts of a PPTX document.
pub fn get_slides(store: &FolderStore, path: &str) -> Result<Vec<SlideText>, ToolError> {
  let chunks = existing_chunks(store, path)?;

  let mut slides = Vec::new();
  for chunk in chunks {
    if let ExtractionCoords::Pptx {
      start_slide, end_slide, ..
    } = chunk.coords
    {
      slides.push(SlideText {
        start_slide,
        end_slide,
        text: chunk.text,
      });
    }
  }
  Ok(slides)
}

/// Row-range texts of an XLSX document, optionally restricted to a sheet.
pub fn get_sheet_data(store: &FolderStore, path: &str, sheet: Option<&str>) -> Result<Vec<SheetRange>, ToolError> {
  let chunks = existing_chunks(store, path)?;

  let mut ranges = Vec::new();
  for chunk in chunks {
    if let ExtractionCoords::Xlsx {
      sheet: chunk_sheet,
      header_row,
      start_row,
      end_row,
      ..
    } = chunk.coords
    {
      if sheet.is_none_or(|wanted| wanted == chunk_sheet) {
        ranges.push(SheetRange {
          sheet: chunk_sheet,
          header_row,
          start_row,
          end_row,
          text: chunk.text,
        });
      }
    }
  }
  Ok(ranges)
}

fn existing_chunks(store: &FolderStore, path: &str) -> Result<Vec<docshelf_core::Chunk>, ToolError> {
  if store.document_by_path(path)?.is_none() {
    return Err(ToolError::NotFound(path.to_string()));
  }
  Ok(store.chunks_for_path(path)?)
}
