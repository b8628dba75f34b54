//! XLSX chunking by contiguous row ranges under a required header row.

use docshelf_core::{COORDS_VERSION, ExtractionCoords, estimate_tokens};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::path::Path;

use super::ooxml::{list_numbered_parts, parse_err, read_part};
use super::{ChunkError, ChunkerConfig, Piece, accumulate_units};

#[derive(Debug)]
struct Sheet {
  name: String,
  /// `(row_number, cells)` in file order; row numbers are 1-based.
  rows: Vec<(u32, Vec<String>)>,
}

fn attr_value(path: &Path, e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, ChunkError> {
  for attr in e.attributes() {
    let attr = attr.map_err(|err| parse_err(path, err))?;
    if attr.key.as_ref() == key {
      return Ok(Some(
        attr
          .unescape_value()
          .map_err(|err| parse_err(path, err))?
          .into_owned(),
      ));
    }
  }
  Ok(None)
}

/// Sheet names in workbook order. By OOXML convention the n-th sheet
/// element pairs with `xl/worksheets/sheet{n}.xml`.
fn sheet_names(path: &Path) -> Result<Vec<String>, ChunkError> {
  let xml = read_part(path, "xl/workbook.xml")?
    .ok_or_else(|| ChunkError::Parse(format!("{}: missing xl/workbook.xml", path.display())))?;

  let mut reader = Reader::from_str(&xml);
  let mut names = Vec::new();
  loop {
    match reader.read_event() {
      Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"sheet" => {
        if let Some(name) = attr_value(path, &e, b"name")? {
          names.push(name);
        }
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(parse_err(path, e)),
      _ => {}
    }
  }
  Ok(names)
}

fn shared_strings(path: &Path) -> Result<Vec<String>, ChunkError> {
  let Some(xml) = read_part(path, "xl/sharedStrings.xml")? else {
    return Ok(Vec::new());
  };

  let mut reader = Reader::from_str(&xml);
  let mut strings = Vec::new();
  let mut current = String::new();
  let mut in_si = false;
  let mut in_t = false;

  loop {
    match reader.read_event() {
      Ok(Event::Start(e)) => match e.name().as_ref() {
        b"si" => {
          in_si = true;
          current.clear();
        }
        b"t" if in_si => in_t = true,
        _ => {}
      },
      Ok(Event::Text(t)) if in_t => current.push_str(&t.unescape().map_err(|e| parse_err(path, e))?),
      Ok(Event::End(e)) => match e.name().as_ref() {
        b"t" => in_t = false,
        b"si" => {
          in_si = false;
          strings.push(std::mem::take(&mut current));
        }
        _ => {}
      },
      Ok(Event::Eof) => break,
      Err(e) => return Err(parse_err(path, e)),
      _ => {}
    }
  }
  Ok(strings)
}

fn parse_worksheet(path: &Path, xml: &str, shared: &[String]) -> Result<Vec<(u32, Vec<String>)>, ChunkError> {
  let mut reader = Reader::from_str(xml);
  let mut rows: Vec<(u32, Vec<String>)> = Vec::new();
  let mut cells: Vec<String> = Vec::new();
  let mut row_number = 0u32;
  let mut cell_type = String::new();
  let mut value = String::new();
  let mut capture = false;

  loop {
    match reader.read_event() {
      Ok(Event::Start(e)) => match e.name().as_ref() {
        b"row" => {
          row_number = attr_value(path, &e, b"r")?
            .and_then(|r| r.parse().ok())
            .unwrap_or(rows.len() as u32 + 1);
          cells.clear();
        }
        b"c" => {
          cell_type = attr_value(path, &e, b"t")?.unwrap_or_default();
          value.clear();
        }
        b"v" | b"t" => capture = true,
        _ => {}
      },
      Ok(Event::Empty(e)) if e.name().as_ref() == b"c" => {
        cells.push(String::new());
      }
      Ok(Event::Text(t)) if capture => value.push_str(&t.unescape().map_err(|e| parse_err(path, e))?),
      Ok(Event::End(e)) => match e.name().as_ref() {
        b"v" | b"t" => capture = false,
        b"c" => {
          let resolved = if cell_type == "s" {
            value
              .trim()
              .parse::<usize>()
              .ok()
              .and_then(|i| shared.get(i).cloned())
              .unwrap_or_default()
          } else {
            std::mem::take(&mut value)
          };
          cells.push(resolved);
          value.clear();
        }
        b"row" => rows.push((row_number, std::mem::take(&mut cells))),
        _ => {}
      },
      Ok(Event::Eof) => break,
      Err(e) => return Err(parse_err(path, e)),
      _ => {}
    }
  }
  Ok(rows)
}

fn load_sheets(path: &Path) -> Result<Vec<Sheet>, ChunkError> {
  let names = sheet_names(path)?;
  let shared = shared_strings(path)?;
  let parts = list_numbered_parts(path, "xl/worksheets/sheet", ".xml")?;

  let mut sheets = Vec::new();
  for (i, part) in parts.iter().enumerate() {
    let Some(xml) = read_part(path, part)? else { continue };
    let rows = parse_worksheet(path, &xml, &shared)?;
    let name = names.get(i).cloned().unwrap_or_else(|| format!("Sheet{}", i + 1));
    sheets.push(Sheet { name, rows });
  }
  Ok(sheets)
}

/// The one formula mapping header + row range to chunk text.
fn render_rows(header: &[String], rows: &[(u32, Vec<String>)]) -> String {
  let mut lines = Vec::with_capacity(rows.len() + 1);
  lines.push(header.join("\t"));
  for (_, cells) in rows {
    lines.push(cells.join("\t"));
  }
  lines.join("\n")
}

pub(crate) fn chunk(path: &Path, config: &ChunkerConfig) -> Result<Vec<Piece>, ChunkError> {
  let sheets = load_sheets(path)?;
  let mut pieces = Vec::new();
  let mut any_header = false;

  for sheet in &sheets {
    let Some((header_row, header)) = sheet.rows.first() else {
      continue;
    };
    any_header = true;
    let data = &sheet.rows[1..];
    if data.is_empty() {
      continue;
    }

    let token_counts: Vec<u32> = data
      .iter()
      .map(|(_, cells)| estimate_tokens(&cells.join("\t")))
      .collect();

    for (first, last) in accumulate_units(&token_counts, config.target_tokens, config.overlap_tokens) {
      let rows = &data[first..=last];
      let text = render_rows(header, rows);
      pieces.push((
        text,
        ExtractionCoords::Xlsx {
          version: COORDS_VERSION,
          sheet: sheet.name.clone(),
          header_row: *header_row,
          start_row: rows[0].0,
          end_row: rows[rows.len() - 1].0,
        },
      ));
    }
  }

  // The first data row is the header; a workbook without one is malformed.
  if !any_header {
    return Err(ChunkError::Parse(format!("{}: missing header row", path.display())));
  }
  Ok(pieces)
}

pub(crate) fn extract(path: &Path, sheet: &str, header_row: u32, start_row: u32, end_row: u32) -> Result<String, ChunkError> {
  let sheets = load_sheets(path)?;
  let sheet = sheets
    .iter()
    .find(|s| s.name == sheet)
    .ok_or_else(|| ChunkError::Parse(format!("sheet {sheet:?} not found")))?;

  let header = sheet
    .rows
    .iter()
    .find(|(number, _)| *number == header_row)
    .map(|(_, cells)| cells)
    .ok_or_else(|| ChunkError::Parse(format!("header row {header_row} not found")))?;

  let rows: Vec<(u32, Vec<String>)> = sheet
    .rows
    .iter()
    .filter(|(number, _)| *number != header_row && *number >= start_row && *number <= end_row)
    .cloned()
    .collect();

  Ok(render_rows(header, &rows))
}
