//! DOCX chunking by paragraph ranges.
//!
//! Offsets come from the paragraph stream itself, never from text search:
//! duplicate paragraphs would alias under `indexOf`-style lookup.

use docshelf_core::{COORDS_VERSION, ExtractionCoords, estimate_tokens};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::path::Path;

use super::ooxml::{parse_err, read_part};
use super::{ChunkError, ChunkerConfig, MIN_CHUNK_CHARS, Piece, accumulate_units};

/// The full paragraph stream of the document, empty paragraphs included so
/// that indices are stable.
fn load_paragraphs(path: &Path) -> Result<Vec<String>, ChunkError> {
  let xml = read_part(path, "word/document.xml")?
    .ok_or_else(|| ChunkError::Parse(format!("{}: missing word/document.xml", path.display())))?;

  let mut reader = Reader::from_str(&xml);
  let mut paragraphs = Vec::new();
  let mut current = String::new();
  let mut in_paragraph = false;
  let mut in_text = false;

  loop {
    match reader.read_event() {
      Ok(Event::Start(e)) => match e.name().as_ref() {
        b"w:p" => {
          in_paragraph = true;
          current.clear();
        }
        b"w:t" if in_paragraph => in_text = true,
        _ => {}
      },
      Ok(Event::Empty(e)) if in_paragraph => match e.name().as_ref() {
        b"w:tab" => current.push('\t'),
        b"w:br" => current.push('\n'),
        _ => {}
      },
      Ok(Event::Text(t)) if in_text => {
        current.push_str(&t.unescape().map_err(|e| parse_err(path, e))?);
      }
      Ok(Event::End(e)) => match e.name().as_ref() {
        b"w:t" => in_text = false,
        b"w:p" => {
          in_paragraph = false;
          paragraphs.push(std::mem::take(&mut current));
        }
        _ => {}
      },
      Ok(Event::Eof) => break,
      Err(e) => return Err(parse_err(path, e)),
      _ => {}
    }
  }

  Ok(paragraphs)
}

/// The one formula mapping a paragraph range to chunk text.
fn render_paragraphs(paragraphs: &[String], start: usize, end: usize) -> String {
  paragraphs[start..=end].join("\n")
}

pub(crate) fn chunk(path: &Path, config: &ChunkerConfig) -> Result<Vec<Piece>, ChunkError> {
  let paragraphs = load_paragraphs(path)?;
  if paragraphs.is_empty() {
    return Ok(Vec::new());
  }

  let token_counts: Vec<u32> = paragraphs.iter().map(|p| estimate_tokens(p)).collect();
  let pieces = accumulate_units(&token_counts, config.target_tokens, config.overlap_tokens)
    .into_iter()
    .filter_map(|(first, last)| {
      let text = render_paragraphs(&paragraphs, first, last);
      if text.chars().count() < MIN_CHUNK_CHARS {
        return None;
      }
      Some((
        text,
        ExtractionCoords::Docx {
          version: COORDS_VERSION,
          start_paragraph: first,
          end_paragraph: last,
        },
      ))
    })
    .collect();

  Ok(pieces)
}

pub(crate) fn extract(path: &Path, start_paragraph: usize, end_paragraph: usize) -> Result<String, ChunkError> {
  let paragraphs = load_paragraphs(path)?;
  if start_paragraph > end_paragraph || end_paragraph >= paragraphs.len() {
    return Err(ChunkError::Parse(format!(
      "paragraph range {start_paragraph}..={end_paragraph} outside document of {} paragraphs",
      paragraphs.len()
    )));
  }
  Ok(render_paragraphs(&paragraphs, start_paragraph, end_paragraph))
}

#[cfg(test)]
mod tests {
  use super::super::ooxml::testing::write_archive;
  use super::*;
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  fn docx_body(paragraphs: &[&str]) -> String {
    let body: String = paragraphs
      .iter()
      .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
      .collect();
    format!(
      r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    )
  }

  fn write_docx(dir: &TempDir, name: &str, paragraphs: &[&str]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    write_archive(&path, &[("word/document.xml", &docx_body(paragraphs))]);
    path
  }

  #[test]
  fn test_paragraph_stream() {
    let dir = TempDir::new().unwrap();
    let path = write_docx(&dir, "a.docx", &["First paragraph", "", "Third paragraph"]);

    let paragraphs = load_paragraphs(&path).unwrap();
    assert_eq!(
      paragraphs,
      vec!["First paragraph".to_string(), String::new(), "Third paragraph".to_string()]
    );
  }

  #[test]
  fn test_chunk_and_reextract() {
    let dir = TempDir::new().unwrap();
    let long: Vec<String> = (0..20)
      .map(|i| format!("Paragraph number {i} with a reasonable amount of text in it."))
      .collect();
    let refs: Vec<&str> = long.iter().map(|s| s.as_str()).collect();
    let path = write_docx(&dir, "long.docx", &refs);

    let config = ChunkerConfig {
      target_tokens: 60,
      overlap_tokens: 0,
    };
    let pieces = chunk(&path, &config).unwrap();
    assert!(pieces.len() > 1);

    for (text, coords) in &pieces {
      let ExtractionCoords::Docx {
        start_paragraph,
        end_paragraph,
        ..
      } = coords
      else {
        panic!("expected docx coords");
      };
      assert_eq!(&extract(&path, *start_paragraph, *end_paragraph).unwrap(), text);
    }
  }

  #[test]
  fn test_duplicate_paragraphs_do_not_alias() {
    let dir = TempDir::new().unwrap();
    let same = "Identical paragraph text appearing twice in this document.";
    let path = write_docx(&dir, "dup.docx", &[same, same]);

    let config = ChunkerConfig {
      target_tokens: 10,
      overlap_tokens: 0,
    };
    let pieces = chunk(&path, &config).unwrap();
    assert_eq!(pieces.len(), 2);

    let ranges: Vec<(usize, usize)> = pieces
      .iter()
      .map(|(_, coords)| match coords {
        ExtractionCoords::Docx {
          start_paragraph,
          end_paragraph,
          ..
        } => (*start_paragraph, *end_paragraph),
        _ => panic!("expected docx coords"),
      })
      .collect();
    // Paragraph-stream indices distinguish the two copies.
    assert_eq!(ranges, vec![(0, 0), (1, 1)]);
  }

  #[test]
  fn test_extract_out_of_range() {
    let dir = TempDir::new().unwrap();
    let path = write_docx(&dir, "small.docx", &["Only one paragraph"]);
    assert!(matches!(extract(&path, 0, 5), Err(ChunkError::Parse(_))));
  }

  #[test]
  fn test_missing_document_part() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.docx");
    write_archive(&path, &[("other.xml", "<x/>")]);
    assert!(matches!(chunk(&path, &ChunkerConfig::default()), Err(ChunkError::Parse(_))));
  }
}
