use chrono::{TimeZone, Utc};
use docshelf_core::{Chunk, ChunkSemantics, DocumentMeta, DocumentRecord, ExtractionCoords, Fingerprint};
use rusqlite::{Row, params};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::connection::{FolderStore, Result, StoreError};
use crate::schema::{blob_to_vector, vector_to_blob};

/// Everything persisted for one document, committed in one transaction.
pub struct DocumentWrite<'a> {
  pub meta: &'a DocumentMeta,
  pub chunks: &'a [Chunk],
  /// `vectors[i]` belongs to `chunks[i]`.
  pub vectors: &'a [Vec<f32>],
  pub model_id: &'a str,
  pub document_embedding: Option<&'a [f32]>,
  pub document_key_phrases: Option<&'a [String]>,
}

/// A scored chunk returned by vector search.
#[derive(Debug, Clone)]
pub struct SearchHit {
  pub document_path: String,
  pub chunk: Chunk,
  pub score: f32,
}

impl FolderStore {
  /// Persist a document with its chunks, vectors, and document-level
  /// semantics atomically. An existing document at the same path is
  /// replaced inside the same transaction.
  pub fn insert_document(&self, write: DocumentWrite<'_>) -> Result<()> {
    if write.chunks.len() != write.vectors.len() {
      return Err(StoreError::InvalidRow(format!(
        "chunk/vector count mismatch: {} chunks, {} vectors",
        write.chunks.len(),
        write.vectors.len()
      )));
    }

    let mut conn = self.conn.lock();
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM documents WHERE path = ?1", [&write.meta.relative_path])?;

    let key_phrases_json = write
      .document_key_phrases
      .map(|phrases| serde_json::to_string(phrases))
      .transpose()?;

    tx.execute(
      "INSERT INTO documents (id, path, size, mtime, content_hash, chunk_count, document_embedding, document_key_phrases, indexed_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
      params![
        write.meta.id.to_string(),
        write.meta.relative_path,
        write.meta.fingerprint.size,
        write.meta.fingerprint.mtime,
        write.meta.fingerprint.content_hash,
        write.chunks.len(),
        write.document_embedding.map(vector_to_blob),
        key_phrases_json,
        Utc::now().timestamp_millis(),
      ],
    )?;

    {
      let mut insert_chunk = tx.prepare(
        "INSERT INTO chunks (id, document_id, ordinal, text, token_count, extraction_params, key_phrases, topics, readability)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
      )?;
      let mut insert_vector = tx.prepare("INSERT INTO vectors (chunk_id, model_id, vector) VALUES (?1, ?2, ?3)")?;

      for (chunk, vector) in write.chunks.iter().zip(write.vectors) {
        let (key_phrases, topics, readability) = match &chunk.semantic {
          Some(s) => (
            Some(serde_json::to_string(&s.key_phrases)?),
            Some(serde_json::to_string(&s.topics)?),
            Some(s.readability),
          ),
          None => (None, None, None),
        };

        insert_chunk.execute(params![
          chunk.id.to_string(),
          write.meta.id.to_string(),
          chunk.ordinal,
          chunk.text,
          chunk.token_count,
          chunk.coords.to_json(),
          key_phrases,
          topics,
          readability,
        ])?;
        insert_vector.execute(params![chunk.id.to_string(), write.model_id, vector_to_blob(vector)])?;
      }
    }

    tx.commit()?;
    debug!(path = %write.meta.relative_path, chunks = write.chunks.len(), "Document committed");
    Ok(())
  }

  /// Drop every document (and, via cascade, chunk and vector). Used when
  /// the configured model changes: stale vectors must not survive under a
  /// new model id.
  pub fn clear_documents(&self) -> Result<usize> {
    let mut conn = self.conn.lock();
    let tx = conn.transaction()?;
    let removed = tx.execute("DELETE FROM documents", [])?;
    tx.commit()?;
    Ok(removed)
  }

  /// Delete a document and everything hanging off it. Returns whether a
  /// document existed at that path.
  pub fn remove_document(&self, relative_path: &str) -> Result<bool> {
    let mut conn = self.conn.lock();
    let tx = conn.transaction()?;
    let removed = tx.execute("DELETE FROM documents WHERE path = ?1", [relative_path])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  /// The persisted fingerprint map driving the scan diff. Reflects the last
  /// committed state.
  pub fn document_fingerprints(&self) -> Result<HashMap<String, Fingerprint>> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare("SELECT path, size, mtime, content_hash FROM documents")?;
    let rows = stmt.query_map([], |row| {
      Ok((
        row.get::<_, String>(0)?,
        Fingerprint {
          size: row.get(1)?,
          mtime: row.get(2)?,
          content_hash: row.get(3)?,
        },
      ))
    })?;

    let mut map = HashMap::new();
    for row in rows {
      let (path, fingerprint) = row?;
      map.insert(path, fingerprint);
    }
    Ok(map)
  }

  pub fn document_by_path(&self, relative_path: &str) -> Result<Option<DocumentRecord>> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(
      "SELECT id, path, size, mtime, content_hash, chunk_count, document_embedding, document_key_phrases, indexed_at
       FROM documents WHERE path = ?1",
    )?;
    let mut rows = stmt.query([relative_path])?;
    match rows.next()? {
      Some(row) => Ok(Some(row_to_document(row)?)),
      None => Ok(None),
    }
  }

  /// All documents, in lexicographic path order.
  pub fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(
      "SELECT id, path, size, mtime, content_hash, chunk_count, document_embedding, document_key_phrases, indexed_at
       FROM documents ORDER BY path",
    )?;
    let mut docs = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
      docs.push(row_to_document(row)?);
    }
    Ok(docs)
  }

  /// Chunks of one document in ordinal order, coords validated.
  pub fn chunks_for_path(&self, relative_path: &str) -> Result<Vec<Chunk>> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(
      "SELECT c.id, c.document_id, c.ordinal, c.text, c.token_count, c.extraction_params, c.key_phrases, c.topics, c.readability
       FROM chunks c JOIN documents d ON d.id = c.document_id
       WHERE d.path = ?1 ORDER BY c.ordinal",
    )?;
    let mut chunks = Vec::new();
    let mut rows = stmt.query([relative_path])?;
    while let Some(row) = rows.next()? {
      chunks.push(row_to_chunk(row)?);
    }
    Ok(chunks)
  }

  pub fn document_count(&self) -> Result<usize> {
    self.count("SELECT COUNT(*) FROM documents")
  }

  pub fn chunk_count(&self) -> Result<usize> {
    self.count("SELECT COUNT(*) FROM chunks")
  }

  pub fn vector_count(&self) -> Result<usize> {
    self.count("SELECT COUNT(*) FROM vectors")
  }

  /// Distinct model ids present in the vectors table. A healthy folder has
  /// at most one.
  pub fn vector_model_ids(&self) -> Result<Vec<String>> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare("SELECT DISTINCT model_id FROM vectors ORDER BY model_id")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
      ids.push(row?);
    }
    Ok(ids)
  }

  /// Brute-force cosine search over the folder's vectors.
  pub fn search(&self, query_vector: &[f32], model_id: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(
      "SELECT c.id, c.document_id, c.ordinal, c.text, c.token_count, c.extraction_params, c.key_phrases, c.topics, c.readability,
              v.vector, d.path
       FROM vectors v
       JOIN chunks c ON c.id = v.chunk_id
       JOIN documents d ON d.id = c.document_id
       WHERE v.model_id = ?1",
    )?;

    let mut hits = Vec::new();
    let mut rows = stmt.query([model_id])?;
    while let Some(row) = rows.next()? {
      let chunk = row_to_chunk(row)?;
      let vector = blob_to_vector(&row.get::<_, Vec<u8>>(9)?);
      let document_path: String = row.get(10)?;
      let score = cosine(query_vector, &vector);
      hits.push(SearchHit {
        document_path,
        chunk,
        score,
      });
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
  }

  fn count(&self, sql: &str) -> Result<usize> {
    let conn = self.conn.lock();
    let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count as usize)
  }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
  if a.len() != b.len() || a.is_empty() {
    return 0.0;
  }
  let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
  let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
  if na <= f32::EPSILON || nb <= f32::EPSILON {
    return 0.0;
  }
  dot / (na * nb)
}

fn parse_uuid(raw: String, column: &str) -> Result<Uuid> {
  raw
    .parse()
    .map_err(|_| StoreError::InvalidRow(format!("{column} = {raw:?}")))
}

fn row_to_document(row: &Row<'_>) -> Result<DocumentRecord> {
  let id = parse_uuid(row.get::<_, String>(0)?, "documents.id")?;
  let indexed_at_ms: i64 = row.get(8)?;
  let indexed_at = Utc
    .timestamp_millis_opt(indexed_at_ms)
    .single()
    .ok_or_else(|| StoreError::InvalidRow(format!("documents.indexed_at = {indexed_at_ms}")))?;

  let key_phrases = row
    .get::<_, Option<String>>(7)?
    .map(|raw| serde_json::from_str(&raw))
    .transpose()?;

  Ok(DocumentRecord {
    id,
    relative_path: row.get(1)?,
    fingerprint: Fingerprint {
      size: row.get(2)?,
      mtime: row.get(3)?,
      content_hash: row.get(4)?,
    },
    chunk_count: row.get::<_, i64>(5)? as usize,
    document_embedding: row.get::<_, Option<Vec<u8>>>(6)?.map(|blob| blob_to_vector(&blob)),
    document_key_phrases: key_phrases,
    indexed_at,
  })
}

fn row_to_chunk(row: &Row<'_>) -> Result<Chunk> {
  let id = parse_uuid(row.get::<_, String>(0)?, "chunks.id")?;
  let document_id = parse_uuid(row.get::<_, String>(1)?, "chunks.document_id")?;

  let coords_raw: String = row.get(5)?;
  let coords = ExtractionCoords::from_json(&coords_raw)?;

  let readability: Option<f64> = row.get(8)?;
  let semantic = match readability {
    Some(readability) => {
      let key_phrases = row
        .get::<_, Option<String>>(6)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?
        .unwrap_or_default();
      let topics = row
        .get::<_, Option<String>>(7)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?
        .unwrap_or_default();
      Some(ChunkSemantics {
        key_phrases,
        topics,
        readability: readability as f32,
      })
    }
    None => None,
  };

  Ok(Chunk {
    id,
    document_id,
    ordinal: row.get::<_, i64>(2)? as u32,
    text: row.get(3)?,
    token_count: row.get::<_, i64>(4)? as u32,
    coords,
    semantic,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use docshelf_core::{COORDS_VERSION, FolderId};
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  fn test_store(dir: &TempDir) -> FolderStore {
    FolderStore::open(dir.path(), FolderId::from_path(dir.path())).unwrap()
  }

  fn text_coords(start: usize, end: usize) -> ExtractionCoords {
    ExtractionCoords::Text {
      version: COORDS_VERSION,
      start_offset: start,
      end_offset: end,
    }
  }

  fn sample_document(path: &str, texts: &[&str]) -> (DocumentMeta, Vec<Chunk>, Vec<Vec<f32>>) {
    let meta = DocumentMeta::new(
      path.to_string(),
      Fingerprint {
        size: 123,
        mtime: 1_700_000_000,
        content_hash: "deadbeef".to_string(),
      },
    );
    let mut offset = 0;
    let chunks: Vec<Chunk> = texts
      .iter()
      .enumerate()
      .map(|(i, text)| {
        let coords = text_coords(offset, offset + text.len());
        offset += text.len();
        let mut chunk = Chunk::new(meta.id, i as u32, text.to_string(), coords);
        chunk.semantic = Some(ChunkSemantics {
          key_phrases: vec!["sample phrase".to_string()],
          topics: vec!["sample".to_string()],
          readability: 50.0,
        });
        chunk
      })
      .collect();
    let vectors = (0..chunks.len()).map(|i| vec![i as f32 + 1.0, 0.5]).collect();
    (meta, chunks, vectors)
  }

  fn write<'a>(
    meta: &'a DocumentMeta,
    chunks: &'a [Chunk],
    vectors: &'a [Vec<f32>],
    doc_vec: Option<&'a [f32]>,
  ) -> DocumentWrite<'a> {
    DocumentWrite {
      meta,
      chunks,
      vectors,
      model_id: "multilingual-e5-small",
      document_embedding: doc_vec,
      document_key_phrases: None,
    }
  }

  #[test]
  fn test_insert_and_read_back() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let (meta, chunks, vectors) = sample_document("notes.txt", &["first chunk", "second chunk"]);
    let doc_vec = vec![0.1, 0.9];

    store
      .insert_document(write(&meta, &chunks, &vectors, Some(&doc_vec)))
      .unwrap();

    let doc = store.document_by_path("notes.txt").unwrap().unwrap();
    assert_eq!(doc.chunk_count, 2);
    assert_eq!(doc.fingerprint.content_hash, "deadbeef");
    assert_eq!(doc.document_embedding.unwrap(), doc_vec);

    let read = store.chunks_for_path("notes.txt").unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(read[0].text, "first chunk");
    assert_eq!(read[0].ordinal, 0);
    assert_eq!(read[1].ordinal, 1);
    assert_eq!(read[0].semantic.as_ref().unwrap().key_phrases, vec!["sample phrase"]);
  }

  #[test]
  fn test_chunk_vector_mismatch_rejected() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let (meta, chunks, _) = sample_document("notes.txt", &["only chunk"]);

    let err = store.insert_document(write(&meta, &chunks, &[], None)).unwrap_err();
    assert!(matches!(err, StoreError::InvalidRow(_)));

    // Nothing was committed.
    assert_eq!(store.document_count().unwrap(), 0);
    assert_eq!(store.chunk_count().unwrap(), 0);
  }

  #[test]
  fn test_replace_at_same_path() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let (meta1, chunks1, vectors1) = sample_document("doc.md", &["v1 chunk a", "v1 chunk b"]);
    store.insert_document(write(&meta1, &chunks1, &vectors1, None)).unwrap();

    let (meta2, chunks2, vectors2) = sample_document("doc.md", &["v2 chunk"]);
    store.insert_document(write(&meta2, &chunks2, &vectors2, None)).unwrap();

    assert_eq!(store.document_count().unwrap(), 1);
    assert_eq!(store.chunk_count().unwrap(), 1);
    assert_eq!(store.vector_count().unwrap(), 1);

    let read = store.chunks_for_path("doc.md").unwrap();
    assert_eq!(read[0].text, "v2 chunk");
  }

  #[test]
  fn test_remove_cascades() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let (meta, chunks, vectors) = sample_document("gone.txt", &["a", "b", "c"]);
    store.insert_document(write(&meta, &chunks, &vectors, None)).unwrap();

    assert!(store.remove_document("gone.txt").unwrap());
    assert_eq!(store.document_count().unwrap(), 0);
    assert_eq!(store.chunk_count().unwrap(), 0);
    assert_eq!(store.vector_count().unwrap(), 0);

    assert!(!store.remove_document("gone.txt").unwrap());
  }

  #[test]
  fn test_fingerprint_map() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let (meta_a, chunks_a, vectors_a) = sample_document("a.txt", &["aaa"]);
    let (meta_b, chunks_b, vectors_b) = sample_document("b.txt", &["bbb"]);
    store.insert_document(write(&meta_a, &chunks_a, &vectors_a, None)).unwrap();
    store.insert_document(write(&meta_b, &chunks_b, &vectors_b, None)).unwrap();

    let map = store.document_fingerprints().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["a.txt"].content_hash, "deadbeef");
  }

  #[test]
  fn test_empty_document_zero_chunks() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let (meta, _, _) = sample_document("empty.txt", &[]);

    store.insert_document(write(&meta, &[], &[], None)).unwrap();

    let doc = store.document_by_path("empty.txt").unwrap().unwrap();
    assert_eq!(doc.chunk_count, 0);
    assert_eq!(store.vector_count().unwrap(), 0);
  }

  #[test]
  fn test_search_ranks_by_cosine() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let (meta, chunks, _) = sample_document("s.txt", &["north chunk", "east chunk"]);
    let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
    store.insert_document(write(&meta, &chunks, &vectors, None)).unwrap();

    let hits = store.search(&[0.9, 0.1], "multilingual-e5-small", 10).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk.text, "north chunk");
    assert!(hits[0].score > hits[1].score);

    // Vectors of a different model are invisible.
    assert!(store.search(&[1.0, 0.0], "bge-m3", 10).unwrap().is_empty());
  }

  #[test]
  fn test_vector_model_ids() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let (meta, chunks, vectors) = sample_document("m.txt", &["chunk"]);
    store.insert_document(write(&meta, &chunks, &vectors, None)).unwrap();

    assert_eq!(store.vector_model_ids().unwrap(), vec!["multilingual-e5-small"]);
  }
}
