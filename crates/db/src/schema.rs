//! Table definitions and vector encoding.

/// Bumped together with a migration whenever a table or coords format
/// changes shape.
pub const SCHEMA_VERSION: u32 = 1;

pub(crate) const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
  key   TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
  id                     TEXT PRIMARY KEY,
  path                   TEXT NOT NULL UNIQUE,
  size                   INTEGER NOT NULL,
  mtime                  INTEGER NOT NULL,
  content_hash           TEXT NOT NULL,
  chunk_count            INTEGER NOT NULL,
  document_embedding     BLOB,
  document_key_phrases   TEXT,
  indexed_at             INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
  id                TEXT PRIMARY KEY,
  document_id       TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
  ordinal           INTEGER NOT NULL,
  text              TEXT NOT NULL,
  token_count       INTEGER NOT NULL,
  extraction_params TEXT NOT NULL,
  key_phrases       TEXT,
  topics            TEXT,
  readability       REAL
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, ordinal);

CREATE TABLE IF NOT EXISTS vectors (
  chunk_id TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
  model_id TEXT NOT NULL,
  vector   BLOB NOT NULL,
  PRIMARY KEY (chunk_id, model_id)
);
"#;

/// Encode a vector as little-endian f32 bytes.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
  let mut blob = Vec::with_capacity(vector.len() * 4);
  for v in vector {
    blob.extend_from_slice(&v.to_le_bytes());
  }
  blob
}

/// Decode a little-endian f32 blob back into a vector.
pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
  blob
    .chunks_exact(4)
    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    .collect()
}
