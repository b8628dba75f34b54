//! Format-aware chunking.
//!
//! Every chunk carries versioned extraction coordinates, and re-extracting
//! through [`Chunker::extract`] with those coordinates alone reproduces the
//! chunk text byte for byte. The viability threshold and the extraction use
//! the same formula in every format: chunk text is always *defined* by the
//! coordinate lookup, never by a parallel computation.

mod docx;
mod ooxml;
mod pdf;
mod pptx;
mod text;
mod xlsx;

use docshelf_core::{Chunk, Config, CoordsError, DocumentMeta, ErrorClass, ExtractionCoords};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::scanner::fingerprint_file;

/// Minimum characters for a chunk to be viable, in absolute character
/// counts. Applied by the same code path that assembles the chunk text.
pub(crate) const MIN_CHUNK_CHARS: usize = 16;

#[derive(Error, Debug)]
pub enum ChunkError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Parse error: {0}")]
  Parse(String),
  #[error("Unsupported file type: {0}")]
  Unsupported(String),
  #[error("Extraction coords error: {0}")]
  Coords(#[from] CoordsError),
  #[error("Coords do not match file type (expected {expected})")]
  WrongCoords { expected: &'static str },
}

impl ChunkError {
  /// Error taxonomy classification for the task runner.
  pub fn class(&self) -> ErrorClass {
    match self {
      Self::Io(_) => ErrorClass::Io,
      Self::Coords(_) => ErrorClass::SchemaVersion,
      Self::Parse(_) | Self::Unsupported(_) | Self::WrongCoords { .. } => ErrorClass::Parse,
    }
  }
}

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
  Text,
  Markdown,
  Pdf,
  Docx,
  Xlsx,
  Pptx,
}

impl FileKind {
  pub fn from_path(path: &Path) -> Option<Self> {
    match path.extension()?.to_str()?.to_lowercase().as_str() {
      "txt" => Some(Self::Text),
      "md" => Some(Self::Markdown),
      "pdf" => Some(Self::Pdf),
      "docx" => Some(Self::Docx),
      "xlsx" => Some(Self::Xlsx),
      "pptx" => Some(Self::Pptx),
      _ => None,
    }
  }
}

/// Chunking targets, in tokens.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
  pub target_tokens: usize,
  pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
  fn default() -> Self {
    Self {
      target_tokens: 400,
      overlap_tokens: 50,
    }
  }
}

impl From<&Config> for ChunkerConfig {
  fn from(config: &Config) -> Self {
    Self {
      target_tokens: config.chunk_size,
      overlap_tokens: config.overlap,
    }
  }
}

/// The chunker's output for one file.
#[derive(Debug)]
pub struct ChunkedDocument {
  pub meta: DocumentMeta,
  pub chunks: Vec<Chunk>,
}

/// A chunk before it gets its identity: text plus coordinates.
pub(crate) type Piece = (String, ExtractionCoords);

/// Format-aware chunker.
pub struct Chunker {
  config: ChunkerConfig,
}

impl Chunker {
  pub fn new(config: ChunkerConfig) -> Self {
    Self { config }
  }

  /// Parse and split a file into chunks with extraction coordinates.
  ///
  /// The fingerprint is taken at read time so invariant I4 holds: the
  /// persisted fingerprint equals the file on disk at `indexed_at`.
  pub fn chunk_file(&self, path: &Path, root: &Path) -> Result<ChunkedDocument, ChunkError> {
    let kind =
      FileKind::from_path(path).ok_or_else(|| ChunkError::Unsupported(path.to_string_lossy().into_owned()))?;
    let fingerprint = fingerprint_file(path)?;
    let relative = path
      .strip_prefix(root)
      .unwrap_or(path)
      .to_string_lossy()
      .into_owned();
    let meta = DocumentMeta::new(relative, fingerprint);

    let pieces = match kind {
      FileKind::Text | FileKind::Markdown => text::chunk(path, &self.config)?,
      FileKind::Pdf => pdf::chunk(path, &self.config)?,
      FileKind::Docx => docx::chunk(path, &self.config)?,
      FileKind::Xlsx => xlsx::chunk(path, &self.config)?,
      FileKind::Pptx => pptx::chunk(path, &self.config)?,
    };

    let chunks = pieces
      .into_iter()
      .enumerate()
      .map(|(ordinal, (text, coords))| Chunk::new(meta.id, ordinal as u32, text, coords))
      .collect::<Vec<_>>();

    debug!(path = %meta.relative_path, chunks = chunks.len(), "File chunked");
    Ok(ChunkedDocument { meta, chunks })
  }

  /// Re-extract a chunk's text from the source file using only its
  /// coordinates. Refuses unknown coordinate versions.
  pub fn extract(&self, path: &Path, coords: &ExtractionCoords) -> Result<String, ChunkError> {
    coords.validate_version()?;
    let kind =
      FileKind::from_path(path).ok_or_else(|| ChunkError::Unsupported(path.to_string_lossy().into_owned()))?;

    match (kind, coords) {
      (
        FileKind::Text | FileKind::Markdown,
        ExtractionCoords::Text {
          start_offset,
          end_offset,
          ..
        },
      ) => text::extract(path, *start_offset, *end_offset),
      (
        FileKind::Pdf,
        ExtractionCoords::Pdf {
          page,
          x,
          y,
          width,
          height,
          ..
        },
      ) => pdf::extract(path, *page, *x, *y, *width, *height),
      (
        FileKind::Docx,
        ExtractionCoords::Docx {
          start_paragraph,
          end_paragraph,
          ..
        },
      ) => docx::extract(path, *start_paragraph, *end_paragraph),
      (
        FileKind::Xlsx,
        ExtractionCoords::Xlsx {
          sheet,
          header_row,
          start_row,
          end_row,
          ..
        },
      ) => xlsx::extract(path, sheet, *header_row, *start_row, *end_row),
      (
        FileKind::Pptx,
        ExtractionCoords::Pptx {
          start_slide,
          end_slide,
          ..
        },
      ) => pptx::extract(path, *start_slide, *end_slide),
      (FileKind::Text | FileKind::Markdown, _) => Err(ChunkError::WrongCoords { expected: "text" }),
      (FileKind::Pdf, _) => Err(ChunkError::WrongCoords { expected: "pdf" }),
      (FileKind::Docx, _) => Err(ChunkError::WrongCoords { expected: "docx" }),
      (FileKind::Xlsx, _) => Err(ChunkError::WrongCoords { expected: "xlsx" }),
      (FileKind::Pptx, _) => Err(ChunkError::WrongCoords { expected: "pptx" }),
    }
  }
}

impl Default for Chunker {
  fn default() -> Self {
    Self::new(ChunkerConfig::default())
  }
}

/// Group consecutive units into inclusive index ranges of roughly
/// `target` tokens, backing the next range up by at most `overlap` tokens.
///
/// Shared by every format so the grouping decision and the extraction
/// boundaries come from one formula. Ranges always advance: the next range
/// starts at least one unit past the previous one.
pub(crate) fn accumulate_units(token_counts: &[u32], target: usize, overlap: usize) -> Vec<(usize, usize)> {
  let mut ranges = Vec::new();
  let mut start = 0usize;
  let mut acc = 0usize;

  for i in 0..token_counts.len() {
    acc += token_counts[i] as usize;
    let last = i == token_counts.len() - 1;
    if acc < target && !last {
      continue;
    }

    ranges.push((start, i));
    if last {
      break;
    }

    // Back up into the tail of the emitted range for overlap.
    let mut next = i + 1;
    let mut overlap_acc = 0usize;
    while next - 1 > start {
      let tokens = token_counts[next - 1] as usize;
      if overlap_acc + tokens > overlap {
        break;
      }
      overlap_acc += tokens;
      next -= 1;
    }

    start = next.max(start + 1);
    acc = token_counts[start..=i].iter().map(|&t| t as usize).sum();
  }

  ranges
}

#[cfg(test)]
mod tests {
  use super::*;
  use docshelf_core::COORDS_VERSION;

  #[test]
  fn test_accumulate_basic() {
    // Units of 100 tokens, target 250, no overlap.
    let ranges = accumulate_units(&[100, 100, 100, 100, 100], 250, 0);
    assert_eq!(ranges, vec![(0, 2), (3, 4)]);
  }

  #[test]
  fn test_accumulate_with_overlap() {
    let ranges = accumulate_units(&[100, 100, 100, 100, 100, 100], 250, 100);
    // Second range starts one unit back from the flush point.
    assert_eq!(ranges[0], (0, 2));
    assert_eq!(ranges[1].0, 2);
    // Ranges always advance.
    for pair in ranges.windows(2) {
      assert!(pair[1].0 > pair[0].0);
    }
  }

  #[test]
  fn test_accumulate_single_small_unit() {
    assert_eq!(accumulate_units(&[10], 400, 50), vec![(0, 0)]);
  }

  #[test]
  fn test_accumulate_empty() {
    assert!(accumulate_units(&[], 400, 50).is_empty());
  }

  #[test]
  fn test_accumulate_oversized_unit_flushes_alone() {
    let ranges = accumulate_units(&[900, 50, 50], 400, 0);
    assert_eq!(ranges[0], (0, 0));
  }

  #[test]
  fn test_file_kind_detection() {
    assert_eq!(FileKind::from_path(Path::new("a.PDF")), Some(FileKind::Pdf));
    assert_eq!(FileKind::from_path(Path::new("b.md")), Some(FileKind::Markdown));
    assert_eq!(FileKind::from_path(Path::new("c.docx")), Some(FileKind::Docx));
    assert_eq!(FileKind::from_path(Path::new("noext")), None);
    assert_eq!(FileKind::from_path(Path::new("d.rs")), None);
  }

  #[test]
  fn test_error_classes() {
    assert_eq!(ChunkError::Parse("bad".into()).class(), ErrorClass::Parse);
    assert_eq!(
      ChunkError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")).class(),
      ErrorClass::Io
    );
    assert_eq!(ChunkError::Unsupported("x.bin".into()).class(), ErrorClass::Parse);
  }

  #[test]
  fn test_chunk_then_extract_is_byte_identical() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("roundtrip.txt");
    let content = "First paragraph with two sentences. Here is the second.\n\n\
                   Second paragraph carries different text entirely.\n\n\
                   And a third one closes the file out.";
    std::fs::write(&path, content).unwrap();

    let chunker = Chunker::new(ChunkerConfig {
      target_tokens: 20,
      overlap_tokens: 0,
    });
    let chunked = chunker.chunk_file(&path, dir.path()).unwrap();
    assert!(!chunked.chunks.is_empty());
    assert_eq!(chunked.meta.relative_path, "roundtrip.txt");

    for chunk in &chunked.chunks {
      let re_extracted = chunker.extract(&path, &chunk.coords).unwrap();
      assert_eq!(re_extracted, chunk.text);
    }

    // Ordinals are dense from zero.
    for (i, chunk) in chunked.chunks.iter().enumerate() {
      assert_eq!(chunk.ordinal as usize, i);
    }
  }

  #[test]
  fn test_extract_refuses_unknown_version() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("doc.txt");
    std::fs::write(&path, "content").unwrap();

    let coords = ExtractionCoords::Text {
      version: 9,
      start_offset: 0,
      end_offset: 7,
    };
    let err = Chunker::default().extract(&path, &coords).unwrap_err();
    assert!(matches!(err, ChunkError::Coords(_)));
    assert_eq!(err.class(), ErrorClass::SchemaVersion);
  }

  #[test]
  fn test_mismatched_coords_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("doc.txt");
    std::fs::write(&path, "content").unwrap();

    let coords = ExtractionCoords::Pptx {
      version: COORDS_VERSION,
      start_slide: 1,
      end_slide: 1,
    };
    assert!(matches!(
      Chunker::default().extract(&path, &coords),
      Err(ChunkError::WrongCoords { expected: "text" })
    ));
  }
}
