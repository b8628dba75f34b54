//! Per-folder lifecycle orchestration and the daemon around it.

mod lifecycle;
mod queue;
mod registry;
mod runner;
mod supervisor;
pub mod tools;

pub use lifecycle::{Daemon, DaemonError, DaemonOptions};
pub use registry::FolderRegistry;
pub use supervisor::{FolderHandle, FolderSupervisor, SupervisorConfig, SupervisorError, classify_changes};
