//! PDF chunking over positioned text.
//!
//! A custom `pdf_extract::OutputDev` collects every positioned character.
//! Characters group into lines, lines into blocks, and consecutive blocks
//! into chunks bounded by page extents. A chunk's text is *defined* as the
//! assembly of the characters inside its bounding box — the identical
//! formula `extract` runs later — with inclusive bounds on all four sides.

use docshelf_core::{COORDS_VERSION, ExtractionCoords, estimate_tokens};
use pdf_extract::{MediaBox, OutputDev, OutputError, Transform};
use std::path::Path;
use tracing::trace;

use super::{ChunkError, ChunkerConfig, MIN_CHUNK_CHARS, Piece, accumulate_units};

/// Same-line tolerance as a fraction of font size.
const LINE_TOLERANCE_FACTOR: f64 = 0.5;
/// Vertical gap (in units of the previous line's height) that starts a new
/// block.
const BLOCK_GAP_FACTOR: f64 = 1.8;
/// Horizontal gap (in units of font size) that inserts a space.
const WORD_GAP_FACTOR: f64 = 0.25;

#[derive(Debug, Clone)]
struct PositionedChar {
  text: String,
  x: f64,
  y: f64,
  advance: f64,
  height: f64,
}

/// Collects positioned characters per page.
struct PositionedTextCollector {
  pages: Vec<Vec<PositionedChar>>,
  current: Vec<PositionedChar>,
}

impl PositionedTextCollector {
  fn new() -> Self {
    Self {
      pages: Vec::new(),
      current: Vec::new(),
    }
  }
}

impl OutputDev for PositionedTextCollector {
  fn begin_page(&mut self, _page_num: u32, _media_box: &MediaBox, _art_box: Option<(f64, f64, f64, f64)>) -> Result<(), OutputError> {
    self.current = Vec::new();
    Ok(())
  }

  fn end_page(&mut self) -> Result<(), OutputError> {
    self.pages.push(std::mem::take(&mut self.current));
    Ok(())
  }

  fn output_character(
    &mut self,
    trm: &Transform,
    width: f64,
    _spacing: f64,
    font_size: f64,
    char: &str,
  ) -> Result<(), OutputError> {
    if char.trim().is_empty() {
      return Ok(());
    }
    self.current.push(PositionedChar {
      text: char.to_string(),
      x: trm.m31,
      y: trm.m32,
      advance: width * font_size,
      height: font_size,
    });
    Ok(())
  }

  fn begin_word(&mut self) -> Result<(), OutputError> {
    Ok(())
  }

  fn end_word(&mut self) -> Result<(), OutputError> {
    Ok(())
  }

  fn end_line(&mut self) -> Result<(), OutputError> {
    Ok(())
  }
}

fn load_pages(path: &Path) -> Result<Vec<Vec<PositionedChar>>, ChunkError> {
  let bytes = std::fs::read(path)?;
  let document =
    lopdf::Document::load_mem(&bytes).map_err(|e| ChunkError::Parse(format!("{}: {e}", path.display())))?;

  let mut collector = PositionedTextCollector::new();
  pdf_extract::output_doc(&document, &mut collector)
    .map_err(|e| ChunkError::Parse(format!("{}: {e}", path.display())))?;
  Ok(collector.pages)
}

/// A visual line of characters, already sorted left to right.
struct Line {
  chars: Vec<PositionedChar>,
  y: f64,
  height: f64,
}

/// A paragraph-like block of consecutive lines.
struct Block {
  bbox: (f64, f64, f64, f64),
  char_count: usize,
}

fn group_lines(mut chars: Vec<PositionedChar>) -> Vec<Line> {
  // Reading order: top of the page first (PDF y grows upward).
  chars.sort_by(|a, b| {
    b.y
      .partial_cmp(&a.y)
      .unwrap_or(std::cmp::Ordering::Equal)
      .then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
  });

  let mut lines: Vec<Line> = Vec::new();
  for c in chars {
    let tolerance = c.height * LINE_TOLERANCE_FACTOR;
    match lines.last_mut() {
      Some(line) if (line.y - c.y).abs() <= tolerance => {
        line.height = line.height.max(c.height);
        line.chars.push(c);
      }
      _ => lines.push(Line {
        y: c.y,
        height: c.height,
        chars: vec![c],
      }),
    }
  }
  for line in &mut lines {
    line.chars.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));
  }
  lines
}

fn group_blocks(lines: &[Line]) -> Vec<Block> {
  let mut blocks: Vec<(usize, usize)> = Vec::new();
  let mut start = 0usize;

  for i in 1..lines.len() {
    let gap = lines[i - 1].y - lines[i].y;
    if gap > lines[i - 1].height * BLOCK_GAP_FACTOR {
      blocks.push((start, i - 1));
      start = i;
    }
  }
  if !lines.is_empty() {
    blocks.push((start, lines.len() - 1));
  }

  blocks
    .into_iter()
    .map(|(first, last)| {
      let members = &lines[first..=last];
      let mut min_x = f64::MAX;
      let mut min_y = f64::MAX;
      let mut max_x = f64::MIN;
      let mut max_y = f64::MIN;
      let mut char_count = 0usize;
      for line in members {
        for c in &line.chars {
          min_x = min_x.min(c.x);
          min_y = min_y.min(c.y);
          max_x = max_x.max(c.x + c.advance);
          max_y = max_y.max(c.y + c.height);
          char_count += c.text.chars().count();
        }
      }
      Block {
        bbox: (min_x, min_y, max_x - min_x, max_y - min_y),
        char_count,
      }
    })
    .collect()
}

/// Inclusive box membership on all four sides.
fn chars_in_box(chars: &[PositionedChar], x: f64, y: f64, width: f64, height: f64) -> Vec<PositionedChar> {
  chars
    .iter()
    .filter(|c| c.x >= x && c.x <= x + width && c.y >= y && c.y <= y + height)
    .cloned()
    .collect()
}

/// Assemble filtered characters into text. The single formula shared by
/// chunking and extraction.
fn assemble_text(chars: Vec<PositionedChar>) -> String {
  let lines = group_lines(chars);
  let mut out = String::new();
  for (i, line) in lines.iter().enumerate() {
    if i > 0 {
      out.push('\n');
    }
    let mut prev_end: Option<f64> = None;
    for c in &line.chars {
      if let Some(end) = prev_end
        && c.x - end > c.height * WORD_GAP_FACTOR
      {
        out.push(' ');
      }
      out.push_str(&c.text);
      prev_end = Some(c.x + c.advance);
    }
  }
  out
}

fn union_bbox(blocks: &[Block]) -> (f64, f64, f64, f64) {
  let mut min_x = f64::MAX;
  let mut min_y = f64::MAX;
  let mut max_x = f64::MIN;
  let mut max_y = f64::MIN;
  for block in blocks {
    let (x, y, w, h) = block.bbox;
    min_x = min_x.min(x);
    min_y = min_y.min(y);
    max_x = max_x.max(x + w);
    max_y = max_y.max(y + h);
  }
  (min_x, min_y, max_x - min_x, max_y - min_y)
}

pub(crate) fn chunk(path: &Path, config: &ChunkerConfig) -> Result<Vec<Piece>, ChunkError> {
  let pages = load_pages(path)?;
  let mut pieces = Vec::new();

  for (page_index, page_chars) in pages.iter().enumerate() {
    let page_number = (page_index + 1) as u32;
    let lines = group_lines(page_chars.clone());
    let blocks: Vec<Block> = group_blocks(&lines)
      .into_iter()
      .filter(|b| b.char_count >= MIN_CHUNK_CHARS)
      .collect();
    if blocks.is_empty() {
      trace!(page = page_number, "No viable blocks on page");
      continue;
    }

    // Token estimate per block comes from the box formula itself.
    let block_texts: Vec<String> = blocks
      .iter()
      .map(|b| assemble_text(chars_in_box(page_chars, b.bbox.0, b.bbox.1, b.bbox.2, b.bbox.3)))
      .collect();
    let token_counts: Vec<u32> = block_texts.iter().map(|t| estimate_tokens(t)).collect();

    for (first, last) in accumulate_units(&token_counts, config.target_tokens, config.overlap_tokens) {
      let (x, y, width, height) = union_bbox(&blocks[first..=last]);
      // The chunk text is what the box extracts, by definition.
      let text = assemble_text(chars_in_box(page_chars, x, y, width, height));
      if text.chars().count() < MIN_CHUNK_CHARS {
        continue;
      }
      pieces.push((
        text,
        ExtractionCoords::Pdf {
          version: COORDS_VERSION,
          page: page_number,
          x,
          y,
          width,
          height,
        },
      ));
    }
  }

  Ok(pieces)
}

pub(crate) fn extract(path: &Path, page: u32, x: f64, y: f64, width: f64, height: f64) -> Result<String, ChunkError> {
  let pages = load_pages(path)?;
  let page_chars = pages
    .get((page as usize).saturating_sub(1))
    .ok_or_else(|| ChunkError::Parse(format!("page {page} not present ({} pages)", pages.len())))?;
  Ok(assemble_text(chars_in_box(page_chars, x, y, width, height)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn ch(text: &str, x: f64, y: f64) -> PositionedChar {
    PositionedChar {
      text: text.to_string(),
      x,
      y,
      advance: 5.0,
      height: 10.0,
    }
  }

  fn word(text: &str, x0: f64, y: f64) -> Vec<PositionedChar> {
    text
      .chars()
      .enumerate()
      .map(|(i, c)| ch(&c.to_string(), x0 + i as f64 * 5.0, y))
      .collect()
  }

  #[test]
  fn test_line_grouping() {
    let mut chars = word("ab", 0.0, 700.0);
    chars.extend(word("cd", 0.0, 686.0));

    let lines = group_lines(chars);
    assert_eq!(lines.len(), 2);
    // Top line first.
    assert!(lines[0].y > lines[1].y);
  }

  #[test]
  fn test_block_split_on_large_gap() {
    let mut chars = word("topblockone", 0.0, 700.0);
    chars.extend(word("topblocktwo", 0.0, 688.0));
    // 48pt gap >> 1.8 * 10pt line height.
    chars.extend(word("bottomblock", 0.0, 640.0));

    let lines = group_lines(chars);
    let blocks = group_blocks(&lines);
    assert_eq!(blocks.len(), 2);
  }

  #[test]
  fn test_box_filter_inclusive_bounds() {
    let chars = vec![ch("a", 10.0, 100.0), ch("b", 20.0, 100.0), ch("c", 30.0, 100.0)];

    // Box whose edges sit exactly on the outer characters: all included.
    let inside = chars_in_box(&chars, 10.0, 100.0, 20.0, 0.0);
    assert_eq!(inside.len(), 3);

    // Shrinking a hair past the right edge drops the edge character.
    let inside = chars_in_box(&chars, 10.0, 100.0, 19.9, 0.0);
    assert_eq!(inside.len(), 2);
  }

  #[test]
  fn test_assemble_inserts_word_gaps() {
    let mut chars = word("to", 0.0, 700.0);
    chars.extend(word("be", 20.0, 700.0)); // gap 10 > 0.25 * 10

    assert_eq!(assemble_text(chars), "to be");
  }

  #[test]
  fn test_chunk_text_equals_box_extraction() {
    // The invariant that matters: re-filtering through the chunk's own
    // bbox reproduces the text exactly.
    let mut chars = word("alphabetagamma", 0.0, 700.0);
    chars.extend(word("deltaepsilonzeta", 0.0, 686.0));

    let lines = group_lines(chars.clone());
    let blocks = group_blocks(&lines);
    assert_eq!(blocks.len(), 1);

    let (x, y, w, h) = blocks[0].bbox;
    let text = assemble_text(chars_in_box(&chars, x, y, w, h));
    let re_extracted = assemble_text(chars_in_box(&chars, x, y, w, h));
    assert_eq!(text, re_extracted);
    assert!(text.contains("alphabetagamma"));
  }

  #[test]
  fn test_empty_page_produces_nothing() {
    let lines = group_lines(Vec::new());
    assert!(lines.is_empty());
    assert!(group_blocks(&lines).is_empty());
  }
}
