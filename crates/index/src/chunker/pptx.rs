//! PPTX chunking by slide ranges.

use docshelf_core::{COORDS_VERSION, ExtractionCoords, estimate_tokens};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::path::Path;

use super::ooxml::{list_numbered_parts, parse_err, read_part};
use super::{ChunkError, ChunkerConfig, MIN_CHUNK_CHARS, Piece, accumulate_units};

/// Text of one slide: text runs of each paragraph joined, paragraphs
/// separated by newlines.
fn slide_text(path: &Path, xml: &str) -> Result<String, ChunkError> {
  let mut reader = Reader::from_str(xml);
  let mut lines: Vec<String> = Vec::new();
  let mut current = String::new();
  let mut in_paragraph = false;
  let mut in_text = false;

  loop {
    match reader.read_event() {
      Ok(Event::Start(e)) => match e.name().as_ref() {
        b"a:p" => {
          in_paragraph = true;
          current.clear();
        }
        b"a:t" => in_text = true,
        _ => {}
      },
      Ok(Event::Text(t)) if in_text => current.push_str(&t.unescape().map_err(|e| parse_err(path, e))?),
      Ok(Event::End(e)) => match e.name().as_ref() {
        b"a:t" => in_text = false,
        b"a:p" if in_paragraph => {
          in_paragraph = false;
          if !current.trim().is_empty() {
            lines.push(std::mem::take(&mut current));
          }
        }
        _ => {}
      },
      Ok(Event::Eof) => break,
      Err(e) => return Err(parse_err(path, e)),
      _ => {}
    }
  }
  Ok(lines.join("\n"))
}

/// All slide texts in slide-number order.
fn load_slides(path: &Path) -> Result<Vec<String>, ChunkError> {
  let parts = list_numbered_parts(path, "ppt/slides/slide", ".xml")?;
  if parts.is_empty() {
    return Err(ChunkError::Parse(format!("{}: no slides found", path.display())));
  }

  let mut slides = Vec::with_capacity(parts.len());
  for part in &parts {
    let xml = read_part(path, part)?
      .ok_or_else(|| ChunkError::Parse(format!("{}: missing {part}", path.display())))?;
    slides.push(slide_text(path, &xml)?);
  }
  Ok(slides)
}

/// The one formula mapping an inclusive 1-based slide range to chunk text.
fn render_slides(slides: &[String], start_slide: u32, end_slide: u32) -> String {
  slides[(start_slide as usize - 1)..=(end_slide as usize - 1)].join("\n\n")
}

pub(crate) fn chunk(path: &Path, config: &ChunkerConfig) -> Result<Vec<Piece>, ChunkError> {
  let slides = load_slides(path)?;

  let token_counts: Vec<u32> = slides.iter().map(|s| estimate_tokens(s)).collect();
  let pieces = accumulate_units(&token_counts, config.target_tokens, config.overlap_tokens)
    .into_iter()
    .filter_map(|(first, last)| {
      let start_slide = (first + 1) as u32;
      let end_slide = (last + 1) as u32;
      let text = render_slides(&slides, start_slide, end_slide);
      if text.chars().count() < MIN_CHUNK_CHARS {
        return None;
      }
      Some((
        text,
        ExtractionCoords::Pptx {
          version: COORDS_VERSION,
          start_slide,
          end_slide,
        },
      ))
    })
    .collect();

  Ok(pieces)
}

pub(crate) fn extract(path: &Path, start_slide: u32, end_slide: u32) -> Result<String, ChunkError> {
  let slides = load_slides(path)?;
  if start_slide == 0 || start_slide > end_slide || end_slide as usize > slides.len() {
    return Err(ChunkError::Parse(format!(
      "slide range {start_slide}..={end_slide} outside deck of {} slides",
      slides.len()
    )));
  }
  Ok(render_slides(&slides, start_slide, end_slide))
}
