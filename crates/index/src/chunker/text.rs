//! Plain text and Markdown chunking over byte offsets.
//!
//! Units are paragraphs; paragraphs past the target size split at sentence
//! boundaries, never inside one. Chunk text is always the literal byte
//! slice `content[start..end]`, the same formula `extract` uses.

use docshelf_core::{COORDS_VERSION, ExtractionCoords, estimate_tokens};
use std::path::Path;

use super::{ChunkError, ChunkerConfig, MIN_CHUNK_CHARS, Piece, accumulate_units};

pub(crate) fn chunk(path: &Path, config: &ChunkerConfig) -> Result<Vec<Piece>, ChunkError> {
  let content = read_text(path)?;
  Ok(chunk_content(&content, config))
}

pub(crate) fn extract(path: &Path, start: usize, end: usize) -> Result<String, ChunkError> {
  let content = read_text(path)?;
  slice_exact(&content, start, end).map(str::to_string)
}

fn read_text(path: &Path) -> Result<String, ChunkError> {
  match std::fs::read_to_string(path) {
    Ok(content) => Ok(content),
    Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
      Err(ChunkError::Parse(format!("{}: not valid UTF-8", path.display())))
    }
    Err(e) => Err(e.into()),
  }
}

fn slice_exact(content: &str, start: usize, end: usize) -> Result<&str, ChunkError> {
  if start > end || end > content.len() {
    return Err(ChunkError::Parse(format!(
      "offset range {start}..{end} outside content of {} bytes",
      content.len()
    )));
  }
  content
    .get(start..end)
    .ok_or_else(|| ChunkError::Parse(format!("offset range {start}..{end} splits a UTF-8 sequence")))
}

pub(crate) fn chunk_content(content: &str, config: &ChunkerConfig) -> Vec<Piece> {
  if content.is_empty() {
    return Vec::new();
  }

  // Oversized paragraphs break into sentence-bounded units.
  let max_unit_tokens = config.target_tokens.max(1);
  let mut units: Vec<(usize, usize)> = Vec::new();
  for (start, end) in paragraph_ranges(content) {
    if estimate_tokens(&content[start..end]) as usize > max_unit_tokens {
      units.extend(sentence_ranges(content, start, end));
    } else {
      units.push((start, end));
    }
  }
  if units.is_empty() {
    units.push((0, content.len()));
  }

  let token_counts: Vec<u32> = units.iter().map(|&(s, e)| estimate_tokens(&content[s..e])).collect();

  accumulate_units(&token_counts, config.target_tokens, config.overlap_tokens)
    .into_iter()
    .filter_map(|(first, last)| {
      let start = units[first].0;
      let end = units[last].1;
      let text = &content[start..end];
      // Viability and extraction share the slice formula; tiny tail
      // fragments are dropped unless they are the whole file.
      if text.len() < MIN_CHUNK_CHARS && units.len() > 1 {
        return None;
      }
      Some((
        text.to_string(),
        ExtractionCoords::Text {
          version: COORDS_VERSION,
          start_offset: start,
          end_offset: end,
        },
      ))
    })
    .collect()
}

/// Byte ranges of paragraphs, trimmed of surrounding blank lines.
fn paragraph_ranges(content: &str) -> Vec<(usize, usize)> {
  let mut ranges = Vec::new();
  let mut start: Option<usize> = None;
  let mut offset = 0;

  for line in content.split_inclusive('\n') {
    let blank = line.trim().is_empty();
    match (blank, start) {
      (false, None) => start = Some(offset),
      (true, Some(s)) => {
        ranges.push((s, trim_end_offset(content, s, offset)));
        start = None;
      }
      _ => {}
    }
    offset += line.len();
  }
  if let Some(s) = start {
    ranges.push((s, trim_end_offset(content, s, content.len())));
  }
  ranges
}

/// Pull the end of a range back over trailing whitespace.
fn trim_end_offset(content: &str, start: usize, end: usize) -> usize {
  start + content[start..end].trim_end().len()
}

/// Sentence-bounded sub-ranges of a paragraph.
fn sentence_ranges(content: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
  let paragraph = &content[start..end];
  let mut ranges = Vec::new();
  let mut sentence_start = 0usize;
  let mut chars = paragraph.char_indices().peekable();

  while let Some((i, c)) = chars.next() {
    let terminal = matches!(c, '.' | '!' | '?');
    let at_break = terminal
      && chars
        .peek()
        .is_none_or(|&(_, next)| next.is_whitespace());
    if at_break {
      let sentence_end = i + c.len_utf8();
      ranges.push((start + sentence_start, start + sentence_end));
      // Skip whitespace to the next sentence start.
      let mut next_start = sentence_end;
      while let Some(&(j, w)) = chars.peek() {
        if w.is_whitespace() {
          next_start = j + w.len_utf8();
          chars.next();
        } else {
          next_start = j;
          break;
        }
      }
      sentence_start = next_start;
    }
  }

  if sentence_start < paragraph.len() {
    ranges.push((start + sentence_start, start + paragraph.trim_end().len().max(sentence_start)));
  }
  if ranges.is_empty() {
    ranges.push((start, end));
  }
  ranges
}
