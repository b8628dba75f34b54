//! Embedding pipeline: worker process ownership, model lifecycle, request
//! multiplexing, and capability-driven pre/post processing.

mod pipeline;
mod protocol;
mod transport;

pub use pipeline::{EmbedOutput, PipelineConfig, PipelineError, PipelineHandle, WorkerState, global, init_global};
pub use protocol::{EmbedResult, SemanticsResult, WorkerRequest, WorkerResponse, WorkerRpcError};
pub use transport::{ProcessSpawner, ProcessTransport, WorkerSpawner, WorkerTransport};

#[doc(hidden)]
pub use transport::{ScriptedSpawner, ScriptedTransport};
