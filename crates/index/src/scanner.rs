use docshelf_core::{Config, Fingerprint};
use ignore::WalkBuilder;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ScanError {
  /// The folder root itself is unreadable; the folder moves to `error`.
  #[error("Folder root unreadable: {0}")]
  RootUnreadable(String),
}

/// A per-path problem encountered during a scan. Never fatal to the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanIssue {
  pub path: String,
  pub reason: String,
}

/// Deterministic classification of the folder against the persisted
/// fingerprint map. All lists are in lexicographic path order.
#[derive(Debug, Default)]
pub struct ScanOutcome {
  pub added: Vec<(String, Fingerprint)>,
  pub modified: Vec<(String, Fingerprint)>,
  pub removed: Vec<String>,
  pub unchanged: Vec<String>,
  pub errors: Vec<ScanIssue>,
}

impl ScanOutcome {
  pub fn change_count(&self) -> usize {
    self.added.len() + self.modified.len() + self.removed.len()
  }

  pub fn is_clean(&self) -> bool {
    self.change_count() == 0
  }
}

/// Scan-time filtering rules, derived from the configuration.
#[derive(Debug, Clone)]
pub struct ScanConfig {
  /// Lowercase extensions without the dot.
  pub file_extensions: Vec<String>,
  /// Gitignore-style patterns matched against relative path segments.
  pub ignore_patterns: Vec<String>,
  pub max_file_size: u64,
}

impl From<&Config> for ScanConfig {
  fn from(config: &Config) -> Self {
    Self {
      file_extensions: config.file_extensions.clone(),
      ignore_patterns: config.ignore_patterns.clone(),
      max_file_size: config.max_file_size,
    }
  }
}

/// Build the ignore matcher shared by the scanner and the watch router.
pub fn build_ignore_matcher(root: &Path, patterns: &[String]) -> Gitignore {
  let mut builder = GitignoreBuilder::new(root);
  for pattern in patterns {
    if let Err(e) = builder.add_line(None, pattern) {
      warn!(pattern = %pattern, error = %e, "Skipping unparsable ignore pattern");
    }
  }
  builder.build().unwrap_or_else(|e| {
    warn!(error = %e, "Falling back to empty ignore matcher");
    Gitignore::empty()
  })
}

/// SHA-256 fingerprint of a file's current contents.
pub fn fingerprint_file(path: &Path) -> std::io::Result<Fingerprint> {
  let metadata = std::fs::metadata(path)?;
  let mtime = metadata
    .modified()?
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs();

  let mut file = std::fs::File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 64 * 1024];
  loop {
    let n = file.read(&mut buffer)?;
    if n == 0 {
      break;
    }
    hasher.update(&buffer[..n]);
  }

  Ok(Fingerprint {
    size: metadata.len(),
    mtime,
    content_hash: hex::encode(hasher.finalize()),
  })
}

fn is_symlink_loop(err: &ignore::Error) -> bool {
  match err {
    ignore::Error::Loop { .. } => true,
    ignore::Error::WithPath { err, .. } | ignore::Error::WithDepth { err, .. } => is_symlink_loop(err),
    _ => false,
  }
}

struct Candidate {
  relative: String,
  size: u64,
  mtime: u64,
}

/// Directory scanner with fingerprint diffing.
pub struct Scanner {
  config: ScanConfig,
}

impl Scanner {
  pub fn new(config: ScanConfig) -> Self {
    Self { config }
  }

  fn extension_included(&self, path: &Path) -> bool {
    path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_lowercase())
      .is_some_and(|e| self.config.file_extensions.iter().any(|inc| inc == &e))
  }

  /// Walk the root and classify every retained file against the persisted
  /// fingerprints.
  ///
  /// Unchanged files are detected from `(size, mtime)` without reading
  /// bytes; everything else is hashed in parallel. Paths present in the
  /// persisted map but absent from the walk are `removed`. Per-path read
  /// errors land in `errors` and keep the path out of every change list.
  pub fn scan(&self, root: &Path, previous: &HashMap<String, Fingerprint>) -> Result<ScanOutcome, ScanError> {
    std::fs::read_dir(root).map_err(|e| ScanError::RootUnreadable(format!("{}: {e}", root.display())))?;

    let ignore = build_ignore_matcher(root, &self.config.ignore_patterns);
    let mut outcome = ScanOutcome::default();
    let mut candidates: Vec<Candidate> = Vec::new();

    let walker = WalkBuilder::new(root)
      .follow_links(true)
      .hidden(true)
      .git_ignore(false)
      .git_global(false)
      .git_exclude(false)
      .add_custom_ignore_filename(".docshelfignore")
      .build();

    for entry in walker {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
          // The walker reports symlink cycles and unreadable directories
          // here; record and keep going.
          let reason = if is_symlink_loop(&e) { "symlink-cycle" } else { "io" };
          outcome.errors.push(ScanIssue {
            path: format!("{e}"),
            reason: reason.to_string(),
          });
          continue;
        }
      };

      if entry.file_type().is_none_or(|ft| ft.is_dir()) {
        continue;
      }
      let path = entry.path();
      // Parent directories count: a pattern naming a directory excludes
      // everything under it.
      if ignore
        .matched_path_or_any_parents(path.strip_prefix(root).unwrap_or(path), false)
        .is_ignore()
      {
        continue;
      }
      if !self.extension_included(path) {
        continue;
      }

      let relative = match path.strip_prefix(root) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => continue,
      };

      let metadata = match entry.metadata() {
        Ok(m) => m,
        Err(e) => {
          outcome.errors.push(ScanIssue {
            path: relative,
            reason: format!("io: {e}"),
          });
          continue;
        }
      };

      if metadata.len() > self.config.max_file_size {
        outcome.errors.push(ScanIssue {
          path: relative,
          reason: "too-large".to_string(),
        });
        continue;
      }

      let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

      candidates.push(Candidate {
        relative,
        size: metadata.len(),
        mtime,
      });
    }

    // Cheap pass: size + mtime equality means unchanged, no bytes read.
    let mut to_hash: Vec<Candidate> = Vec::new();
    for candidate in candidates {
      match previous.get(&candidate.relative) {
        Some(prev) if prev.size == candidate.size && prev.mtime == candidate.mtime => {
          outcome.unchanged.push(candidate.relative);
        }
        _ => to_hash.push(candidate),
      }
    }

    // Content hashes in parallel for everything that might have changed.
    enum Hashed {
      Ok(String, Fingerprint),
      Vanished(String),
      Failed(ScanIssue),
    }

    let hashed: Vec<Hashed> = to_hash
      .into_par_iter()
      .map(|candidate| {
        let absolute = root.join(&candidate.relative);
        match fingerprint_file(&absolute) {
          Ok(fingerprint) => Hashed::Ok(candidate.relative, fingerprint),
          Err(e) if e.kind() == std::io::ErrorKind::NotFound => Hashed::Vanished(candidate.relative),
          Err(e) => Hashed::Failed(ScanIssue {
            path: candidate.relative,
            reason: format!("io: {e}"),
          }),
        }
      })
      .collect();

    let mut seen_with_errors: Vec<String> = Vec::new();
    for result in hashed {
      match result {
        Hashed::Ok(relative, fingerprint) => match previous.get(&relative) {
          None => outcome.added.push((relative, fingerprint)),
          Some(prev) if prev.content_hash == fingerprint.content_hash => outcome.unchanged.push(relative),
          Some(_) => outcome.modified.push((relative, fingerprint)),
        },
        // Disappeared mid-walk: silently demoted to removed (if it was
        // ever persisted; otherwise it is simply gone).
        Hashed::Vanished(relative) => {
          if previous.contains_key(&relative) {
            outcome.removed.push(relative);
          }
        }
        Hashed::Failed(issue) => {
          seen_with_errors.push(issue.path.clone());
          outcome.errors.push(issue);
        }
      }
    }

    // Persisted paths absent from the walk are removed. Paths that merely
    // failed to read stay persisted until a successful read reclassifies
    // them.
    let mut walked: Vec<String> = Vec::new();
    walked.extend(outcome.unchanged.iter().cloned());
    walked.extend(outcome.added.iter().map(|(p, _)| p.clone()));
    walked.extend(outcome.modified.iter().map(|(p, _)| p.clone()));
    walked.extend(outcome.removed.iter().cloned());
    walked.extend(seen_with_errors.iter().cloned());
    let walked: std::collections::HashSet<String> = walked.into_iter().collect();

    for path in previous.keys() {
      if !walked.contains(path) {
        outcome.removed.push(path.clone());
      }
    }

    outcome.added.sort_by(|a, b| a.0.cmp(&b.0));
    outcome.modified.sort_by(|a, b| a.0.cmp(&b.0));
    outcome.removed.sort();
    outcome.removed.dedup();
    outcome.unchanged.sort();
    outcome.errors.sort_by(|a, b| a.path.cmp(&b.path));

    debug!(
      added = outcome.added.len(),
      modified = outcome.modified.len(),
      removed = outcome.removed.len(),
      unchanged = outcome.unchanged.len(),
      errors = outcome.errors.len(),
      "Scan classified"
    );

    Ok(outcome)
  }
}
