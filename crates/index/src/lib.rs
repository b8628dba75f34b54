//! Folder scanning, change watching, and format-aware chunking.

pub mod chunker;
mod debounce;
mod scanner;
mod watcher;

pub use chunker::{ChunkError, ChunkedDocument, Chunker, ChunkerConfig};
pub use debounce::{DebounceConfig, DebounceRouter, RouterEvent};
pub use scanner::{ScanConfig, ScanError, ScanIssue, ScanOutcome, Scanner, build_ignore_matcher, fingerprint_file};
pub use watcher::{ChangeKind, FileChange, FileWatcher, WatchError};
