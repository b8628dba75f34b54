//! Shared helpers for the zip + XML office formats.

use std::io::Read;
use std::path::Path;

use super::ChunkError;

pub(crate) fn parse_err(path: &Path, e: impl std::fmt::Display) -> ChunkError {
  ChunkError::Parse(format!("{}: {e}", path.display()))
}

/// Read one part out of the archive. `Ok(None)` when the part is absent.
pub(crate) fn read_part(path: &Path, name: &str) -> Result<Option<String>, ChunkError> {
  let file = std::fs::File::open(path)?;
  let mut archive = zip::ZipArchive::new(file).map_err(|e| parse_err(path, e))?;
  match archive.by_name(name) {
    Ok(mut entry) => {
      let mut content = String::new();
      entry
        .read_to_string(&mut content)
        .map_err(|e| parse_err(path, e))?;
      Ok(Some(content))
    }
    Err(zip::result::ZipError::FileNotFound) => Ok(None),
    Err(e) => Err(parse_err(path, e)),
  }
}

/// Part names matching `<prefix><number><suffix>`, sorted by number.
pub(crate) fn list_numbered_parts(path: &Path, prefix: &str, suffix: &str) -> Result<Vec<String>, ChunkError> {
  let file = std::fs::File::open(path)?;
  let archive = zip::ZipArchive::new(file).map_err(|e| parse_err(path, e))?;

  let mut numbered: Vec<(u32, String)> = archive
    .file_names()
    .filter_map(|name| {
      let rest = name.strip_prefix(prefix)?;
      let digits = rest.strip_suffix(suffix)?;
      let number: u32 = digits.parse().ok()?;
      Some((number, name.to_string()))
    })
    .collect();
  numbered.sort_by_key(|(number, _)| *number);
  Ok(numbered.into_iter().map(|(_, name)| name).collect())
}

#[cfg(test)]
pub(crate) mod testing {
  use std::io::Write;
  use std::path::Path;
  use zip::write::SimpleFileOptions;

  /// Build a minimal zip archive with the given parts.
  pub(crate) fn write_archive(path: &Path, parts: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, content) in parts {
      zip.start_file(*name, SimpleFileOptions::default()).unwrap();
      zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
  }
}
