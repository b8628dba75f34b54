use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Current version of every extraction coordinate format.
///
/// Readers refuse anything else; schema additions bump this together with a
/// store migration.
pub const COORDS_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CoordsError {
  #[error("Unknown extraction coords version {found} (reader supports {supported})")]
  UnknownVersion { found: u32, supported: u32 },
  #[error("Malformed extraction coords: {0}")]
  Malformed(#[from] serde_json::Error),
}

/// Identity of a file's contents for change detection.
///
/// Two fingerprints are equal iff the file is considered unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
  pub size: u64,
  /// Modification time, seconds since the unix epoch.
  pub mtime: u64,
  /// SHA-256 over the file bytes, hex-encoded.
  pub content_hash: String,
}

/// Format-specific record locating a chunk inside its source file.
///
/// Re-extracting with these coordinates alone must reproduce the chunk text
/// byte-for-byte while the file's fingerprint is unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum ExtractionCoords {
  /// Plain text and Markdown: byte offsets into the file.
  Text {
    version: u32,
    start_offset: usize,
    end_offset: usize,
  },
  /// PDF: one page and a bounding box in page coordinates.
  Pdf {
    version: u32,
    page: u32,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
  },
  /// DOCX: inclusive paragraph range over the paragraph stream.
  Docx {
    version: u32,
    start_paragraph: usize,
    end_paragraph: usize,
  },
  /// XLSX: contiguous data-row range under a required header row.
  Xlsx {
    version: u32,
    sheet: String,
    header_row: u32,
    start_row: u32,
    end_row: u32,
  },
  /// PPTX: inclusive slide range.
  Pptx {
    version: u32,
    start_slide: u32,
    end_slide: u32,
  },
}

impl ExtractionCoords {
  pub fn version(&self) -> u32 {
    match self {
      Self::Text { version, .. }
      | Self::Pdf { version, .. }
      | Self::Docx { version, .. }
      | Self::Xlsx { version, .. }
      | Self::Pptx { version, .. } => *version,
    }
  }

  /// Reject coords whose version this reader does not understand.
  pub fn validate_version(&self) -> Result<(), CoordsError> {
    let found = self.version();
    if found != COORDS_VERSION {
      return Err(CoordsError::UnknownVersion {
        found,
        supported: COORDS_VERSION,
      });
    }
    Ok(())
  }

  /// Parse from the persisted JSON column, enforcing the version check.
  pub fn from_json(raw: &str) -> Result<Self, CoordsError> {
    let coords: Self = serde_json::from_str(raw)?;
    coords.validate_version()?;
    Ok(coords)
  }

  pub fn to_json(&self) -> String {
    serde_json::to_string(self).unwrap_or_default()
  }
}

/// Semantic metadata attached to a chunk by the enrichment stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSemantics {
  pub key_phrases: Vec<String>,
  pub topics: Vec<String>,
  pub readability: f32,
}

/// A unit of embedded text with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
  pub id: Uuid,
  pub document_id: Uuid,
  /// Dense within a document, starting at 0.
  pub ordinal: u32,
  pub text: String,
  pub token_count: u32,
  pub coords: ExtractionCoords,
  pub semantic: Option<ChunkSemantics>,
}

impl Chunk {
  pub fn new(document_id: Uuid, ordinal: u32, text: String, coords: ExtractionCoords) -> Self {
    let token_count = crate::estimate_tokens(&text);
    Self {
      id: Uuid::now_v7(),
      document_id,
      ordinal,
      text,
      token_count,
      coords,
      semantic: None,
    }
  }
}

/// Per-file metadata produced by the chunker.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMeta {
  pub id: Uuid,
  pub relative_path: String,
  pub fingerprint: Fingerprint,
}

impl DocumentMeta {
  pub fn new(relative_path: String, fingerprint: Fingerprint) -> Self {
    Self {
      id: Uuid::now_v7(),
      relative_path,
      fingerprint,
    }
  }
}

/// A fully persisted document row.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
  pub id: Uuid,
  pub relative_path: String,
  pub fingerprint: Fingerprint,
  pub chunk_count: usize,
  pub document_embedding: Option<Vec<f32>>,
  pub document_key_phrases: Option<Vec<String>>,
  pub indexed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_coords_roundtrip() {
    let coords = ExtractionCoords::Pdf {
      version: COORDS_VERSION,
      page: 3,
      x: 72.0,
      y: 144.5,
      width: 451.0,
      height: 320.25,
    };

    let json = coords.to_json();
    let parsed = ExtractionCoords::from_json(&json).unwrap();
    assert_eq!(parsed, coords);
  }

  #[test]
  fn test_coords_tag_in_json() {
    let coords = ExtractionCoords::Xlsx {
      version: COORDS_VERSION,
      sheet: "Q3".to_string(),
      header_row: 0,
      start_row: 1,
      end_row: 40,
    };

    let value: serde_json::Value = serde_json::from_str(&coords.to_json()).unwrap();
    assert_eq!(value["format"], "xlsx");
    assert_eq!(value["version"], 1);
    assert_eq!(value["sheet"], "Q3");
  }

  #[test]
  fn test_unknown_version_rejected() {
    let raw = r#"{"format":"text","version":7,"start_offset":0,"end_offset":10}"#;
    let err = ExtractionCoords::from_json(raw).unwrap_err();
    assert!(matches!(err, CoordsError::UnknownVersion { found: 7, .. }));
  }

  #[test]
  fn test_missing_version_rejected() {
    let raw = r#"{"format":"text","start_offset":0,"end_offset":10}"#;
    assert!(matches!(ExtractionCoords::from_json(raw), Err(CoordsError::Malformed(_))));
  }

  #[test]
  fn test_fingerprint_equality() {
    let a = Fingerprint {
      size: 10,
      mtime: 100,
      content_hash: "abc".to_string(),
    };
    let mut b = a.clone();
    assert_eq!(a, b);

    b.mtime = 101;
    assert_ne!(a, b);
  }

  #[test]
  fn test_chunk_token_estimate() {
    let chunk = Chunk::new(
      Uuid::now_v7(),
      0,
      "word ".repeat(100),
      ExtractionCoords::Text {
        version: COORDS_VERSION,
        start_offset: 0,
        end_offset: 500,
      },
    );
    assert_eq!(chunk.token_count, 125); // 500 chars / 4
  }
}
