//! The embedding pipeline coordinator.
//!
//! Exactly one coordinator exists per process. It owns the worker child,
//! is the only writer to its stdin and the only reader of its stdout, and
//! serializes every request. Two queues feed it: interactive requests
//! (search-time) preempt indexing requests at batch boundaries — a batch
//! in flight is never interrupted.

use docshelf_core::{ChunkSemantics, EmbedKind, ModelCaps, lookup_model, postprocess_vector, prepare_text};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{EmbedResult, SemanticsResult, WorkerRequest, WorkerResponse};
use crate::transport::{WorkerSpawner, WorkerTransport};

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
  #[error("Worker lost: {0}")]
  WorkerLost(String),
  #[error("Worker request timed out")]
  WorkerTimeout,
  #[error("Unsupported model: {0}")]
  UnsupportedModel(String),
  #[error("Worker protocol violation: {0}")]
  Protocol(String),
  #[error("Worker error {code}: {message}")]
  Worker { code: i32, message: String },
  #[error("Pipeline has shut down")]
  Closed,
}

impl PipelineError {
  pub fn class(&self) -> docshelf_core::ErrorClass {
    use docshelf_core::ErrorClass;
    match self {
      Self::WorkerLost(_) | Self::Protocol(_) | Self::Closed => ErrorClass::WorkerLost,
      Self::WorkerTimeout => ErrorClass::WorkerTimeout,
      Self::UnsupportedModel(_) => ErrorClass::UnsupportedModel,
      // Worker-reported request errors retry with a bounded budget; only
      // actual worker loss re-queues without one.
      Self::Worker { .. } => ErrorClass::Io,
    }
  }

  /// Worker-loss failures mean in-flight tasks must be re-queued.
  pub fn is_worker_loss(&self) -> bool {
    matches!(self, Self::WorkerLost(_) | Self::Protocol(_))
  }
}

/// Worker model residency. Swaps are strictly sequential; two models are
/// never co-resident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
  Idle,
  Loading(String),
  Ready(String),
  Unloading,
}

/// Output of an embed batch: dense vectors always, the other kinds only
/// when the model declares them.
#[derive(Debug, Clone)]
pub struct EmbedOutput {
  pub vectors: Vec<Vec<f32>>,
  pub sparse: Option<serde_json::Value>,
  pub colbert: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// Per-request timeout; expiry restarts the worker.
  pub request_timeout: Duration,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      request_timeout: Duration::from_secs(60),
    }
  }
}

enum PipelineRequest {
  Embed {
    model_id: String,
    texts: Vec<String>,
    kind: EmbedKind,
    reply: oneshot::Sender<Result<EmbedOutput, PipelineError>>,
  },
  ExtractSemantics {
    model_id: String,
    text: String,
    reuse_embedding: Option<Vec<f32>>,
    reply: oneshot::Sender<Result<ChunkSemantics, PipelineError>>,
  },
  EnsureModel {
    model_id: String,
    reply: oneshot::Sender<Result<(), PipelineError>>,
  },
}

/// Cloneable handle to the coordinator.
#[derive(Clone)]
pub struct PipelineHandle {
  indexing_tx: mpsc::Sender<PipelineRequest>,
  interactive_tx: mpsc::Sender<PipelineRequest>,
  state_rx: watch::Receiver<WorkerState>,
}

static GLOBAL: OnceLock<PipelineHandle> = OnceLock::new();

/// Initialize the process-wide coordinator. The second call is refused:
/// a second worker process is a correctness bug, not a degraded mode.
pub fn init_global(
  spawner: Arc<dyn WorkerSpawner>,
  config: PipelineConfig,
  cancel: CancellationToken,
) -> Result<PipelineHandle, PipelineError> {
  let handle = PipelineHandle::spawn_with_spawner(spawner, config, cancel);
  match GLOBAL.set(handle.clone()) {
    Ok(()) => Ok(handle),
    Err(_) => Err(PipelineError::Protocol("embedding pipeline already initialized".to_string())),
  }
}

/// The process-wide coordinator, if initialized.
pub fn global() -> Option<PipelineHandle> {
  GLOBAL.get().cloned()
}

impl PipelineHandle {
  /// Spawn a coordinator with an explicit spawner. Production code goes
  /// through [`init_global`]; this entry exists for the test suites.
  #[doc(hidden)]
  pub fn spawn_with_spawner(
    spawner: Arc<dyn WorkerSpawner>,
    config: PipelineConfig,
    cancel: CancellationToken,
  ) -> Self {
    let (indexing_tx, indexing_rx) = mpsc::channel(64);
    let (interactive_tx, interactive_rx) = mpsc::channel(16);
    let (state_tx, state_rx) = watch::channel(WorkerState::Idle);

    let coordinator = Coordinator {
      spawner,
      config,
      transport: None,
      resident: None,
      state_tx,
      next_request_id: 0,
    };
    tokio::spawn(coordinator.run(indexing_rx, interactive_rx, cancel));

    Self {
      indexing_tx,
      interactive_tx,
      state_rx,
    }
  }

  /// Current worker state snapshot.
  pub fn state(&self) -> WorkerState {
    self.state_rx.borrow().clone()
  }

  /// Await a particular worker state.
  pub async fn wait_for_state(&self, target: WorkerState, timeout: Duration) -> Result<(), PipelineError> {
    let mut rx = self.state_rx.clone();
    tokio::time::timeout(timeout, rx.wait_for(|state| *state == target))
      .await
      .map_err(|_| PipelineError::WorkerTimeout)?
      .map_err(|_| PipelineError::Closed)?;
    Ok(())
  }

  /// Drive the worker to `ready(model_id)`.
  pub async fn ensure_model(&self, model_id: &str) -> Result<(), PipelineError> {
    let (reply, rx) = oneshot::channel();
    self
      .indexing_tx
      .send(PipelineRequest::EnsureModel {
        model_id: model_id.to_string(),
        reply,
      })
      .await
      .map_err(|_| PipelineError::Closed)?;
    rx.await.map_err(|_| PipelineError::Closed)?
  }

  /// Embed a batch of texts. `EmbedKind::Passage` rides the fair indexing
  /// queue; `EmbedKind::Query` rides the interactive queue and preempts at
  /// batch boundaries.
  pub async fn embed(&self, model_id: &str, texts: Vec<String>, kind: EmbedKind) -> Result<EmbedOutput, PipelineError> {
    let (reply, rx) = oneshot::channel();
    let tx = match kind {
      EmbedKind::Passage => &self.indexing_tx,
      EmbedKind::Query => &self.interactive_tx,
    };
    tx.send(PipelineRequest::Embed {
      model_id: model_id.to_string(),
      texts,
      kind,
      reply,
    })
    .await
    .map_err(|_| PipelineError::Closed)?;
    rx.await.map_err(|_| PipelineError::Closed)?
  }

  /// Semantic enrichment for one chunk.
  ///
  /// Models declaring the richer output kinds run the worker-side
  /// extractor (reusing the chunk embedding); plain dense models take the
  /// n-gram + cosine fallback. Either way the result is never silently
  /// empty.
  pub async fn enrich(&self, model_id: &str, text: &str, embedding: &[f32]) -> Result<ChunkSemantics, PipelineError> {
    let caps = lookup_model(model_id).map_err(|_| PipelineError::UnsupportedModel(model_id.to_string()))?;

    if caps.sparse || caps.colbert {
      let (reply, rx) = oneshot::channel();
      self
        .indexing_tx
        .send(PipelineRequest::ExtractSemantics {
          model_id: model_id.to_string(),
          text: text.to_string(),
          reuse_embedding: Some(embedding.to_vec()),
          reply,
        })
        .await
        .map_err(|_| PipelineError::Closed)?;
      return rx.await.map_err(|_| PipelineError::Closed)?;
    }

    self.enrich_fallback(&caps, text, embedding).await
  }

  /// N-gram + cosine fallback for models without the worker extractor.
  async fn enrich_fallback(
    &self,
    caps: &ModelCaps,
    text: &str,
    embedding: &[f32],
  ) -> Result<ChunkSemantics, PipelineError> {
    let candidates = semantic::candidate_phrases(text);
    let top: Vec<semantic::KeyPhraseCandidate> = candidates.into_iter().take(12).collect();

    let key_phrases = if top.is_empty() {
      Vec::new()
    } else {
      let texts: Vec<String> = top.iter().map(|c| c.phrase.clone()).collect();
      let output = self.embed(&caps.model_id, texts, EmbedKind::Passage).await?;
      semantic::rank_by_cosine(&top, &output.vectors, embedding, 6)
    };

    let with_counts: Vec<(String, usize)> = key_phrases
      .iter()
      .map(|phrase| {
        let count = top.iter().find(|c| &c.phrase == phrase).map(|c| c.count).unwrap_or(1);
        (phrase.clone(), count)
      })
      .collect();

    Ok(ChunkSemantics {
      topics: semantic::cluster_topics(&with_counts),
      key_phrases,
      readability: semantic::readability_score(text),
    })
  }
}

struct Coordinator {
  spawner: Arc<dyn WorkerSpawner>,
  config: PipelineConfig,
  transport: Option<Box<dyn WorkerTransport>>,
  /// Model currently resident in the worker.
  resident: Option<String>,
  state_tx: watch::Sender<WorkerState>,
  next_request_id: u64,
}

impl Coordinator {
  async fn run(
    mut self,
    mut indexing_rx: mpsc::Receiver<PipelineRequest>,
    mut interactive_rx: mpsc::Receiver<PipelineRequest>,
    cancel: CancellationToken,
  ) {
    info!("Embedding pipeline coordinator started");

    loop {
      tokio::select! {
        // Interactive requests win at batch boundaries; a request being
        // handled is never interrupted.
        biased;

        _ = cancel.cancelled() => {
          info!("Coordinator shutting down");
          if let Some(mut transport) = self.transport.take() {
            transport.kill().await;
          }
          return;
        }

        Some(request) = interactive_rx.recv() => {
          self.handle(request).await;
        }

        Some(request) = indexing_rx.recv() => {
          self.handle(request).await;
        }

        else => {
          info!("Coordinator channels closed");
          return;
        }
      }
    }
  }

  async fn handle(&mut self, request: PipelineRequest) {
    match request {
      PipelineRequest::EnsureModel { model_id, reply } => {
        let result = self.ensure_model(&model_id).await;
        let _ = reply.send(result);
      }
      PipelineRequest::Embed {
        model_id,
        texts,
        kind,
        reply,
      } => {
        let result = self.embed(&model_id, texts, kind).await;
        let _ = reply.send(result);
      }
      PipelineRequest::ExtractSemantics {
        model_id,
        text,
        reuse_embedding,
        reply,
      } => {
        let result = self.extract_semantics(&model_id, &text, reuse_embedding).await;
        let _ = reply.send(result);
      }
    }
  }

  fn set_state(&self, state: WorkerState) {
    debug!(state = ?state, "Worker state");
    let _ = self.state_tx.send(state);
  }

  async fn ensure_worker(&mut self) -> Result<(), PipelineError> {
    if self.transport.is_none() {
      let transport = self
        .spawner
        .spawn()
        .await
        .map_err(|e| PipelineError::WorkerLost(format!("spawn failed: {e}")))?;
      self.transport = Some(transport);
      self.resident = None;
      self.set_state(WorkerState::Idle);
    }
    Ok(())
  }

  /// Kill and forget the worker; the next request respawns it.
  async fn drop_worker(&mut self) {
    if let Some(mut transport) = self.transport.take() {
      transport.kill().await;
    }
    self.resident = None;
    self.set_state(WorkerState::Idle);
  }

  /// One request/reply round trip with the per-request timeout. Any
  /// malformed stdout line or reply-id mismatch invalidates the stream.
  async fn round_trip(&mut self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, PipelineError> {
    self.ensure_worker().await?;
    let transport = self.transport.as_mut().ok_or(PipelineError::Closed)?;

    self.next_request_id += 1;
    let request = WorkerRequest::new(self.next_request_id, method, params);

    if let Err(e) = transport.send(&request.to_line()).await {
      self.drop_worker().await;
      return Err(PipelineError::WorkerLost(format!("write failed: {e}")));
    }

    let line = match tokio::time::timeout(self.config.request_timeout, transport.recv()).await {
      // A reply pending past the timeout leaves the stream in an unknown
      // state: restart the worker.
      Err(_) => {
        warn!(method, "Worker request timed out; restarting worker");
        self.drop_worker().await;
        return Err(PipelineError::WorkerTimeout);
      }
      Ok(Err(e)) => {
        self.drop_worker().await;
        return Err(PipelineError::WorkerLost(format!("read failed: {e}")));
      }
      Ok(Ok(None)) => {
        warn!(method, "Worker EOF; restarting worker");
        self.drop_worker().await;
        return Err(PipelineError::WorkerLost("worker exited".to_string()));
      }
      Ok(Ok(Some(line))) => line,
    };

    let response: WorkerResponse = match serde_json::from_str(&line) {
      Ok(response) => response,
      Err(e) => {
        warn!(method, error = %e, "Non-JSON line on worker stdout; restarting worker");
        self.drop_worker().await;
        return Err(PipelineError::Protocol(format!("invalid stdout line: {e}")));
      }
    };

    if response.id != Some(request.id) {
      self.drop_worker().await;
      return Err(PipelineError::Protocol(format!(
        "reply id {:?} does not match request {}",
        response.id, request.id
      )));
    }
    if let Some(error) = response.error {
      return Err(PipelineError::Worker {
        code: error.code,
        message: error.message,
      });
    }
    response
      .result
      .ok_or_else(|| PipelineError::Protocol("reply carries neither result nor error".to_string()))
  }

  /// Drive the model lifecycle to `ready(model_id)`.
  ///
  /// idle → loading → ready, with a full unloading → idle pass first when
  /// a different model is resident. Never cancelled mid-swap.
  async fn ensure_model(&mut self, model_id: &str) -> Result<(), PipelineError> {
    lookup_model(model_id).map_err(|_| PipelineError::UnsupportedModel(model_id.to_string()))?;

    if self.resident.as_deref() == Some(model_id) && self.transport.is_some() {
      return Ok(());
    }
    self.ensure_worker().await?;

    if let Some(previous) = self.resident.clone() {
      debug!(from = %previous, to = %model_id, "Sequential model swap");
      self.set_state(WorkerState::Unloading);
      self.round_trip("unload_model", serde_json::Value::Null).await?;
      self.resident = None;
      self.set_state(WorkerState::Idle);
    }

    self.set_state(WorkerState::Loading(model_id.to_string()));
    match self
      .round_trip("load_model", serde_json::json!({ "modelId": model_id }))
      .await
    {
      Ok(_) => {
        self.resident = Some(model_id.to_string());
        self.set_state(WorkerState::Ready(model_id.to_string()));
        Ok(())
      }
      Err(PipelineError::Worker { message, .. }) => {
        // The worker refused the model; residency is unchanged (nothing
        // loaded), so return to idle.
        self.set_state(WorkerState::Idle);
        Err(PipelineError::UnsupportedModel(message))
      }
      Err(e) => {
        self.set_state(WorkerState::Idle);
        Err(e)
      }
    }
  }

  async fn embed(&mut self, model_id: &str, texts: Vec<String>, kind: EmbedKind) -> Result<EmbedOutput, PipelineError> {
    let caps = lookup_model(model_id).map_err(|_| PipelineError::UnsupportedModel(model_id.to_string()))?;
    self.ensure_model(model_id).await?;

    let prepared: Vec<String> = texts.iter().map(|t| prepare_text(t, &caps, kind)).collect();
    let result = self
      .round_trip("embed", serde_json::json!({ "texts": prepared, "class": class_name(kind) }))
      .await?;

    let parsed: EmbedResult =
      serde_json::from_value(result).map_err(|e| PipelineError::Protocol(format!("bad embed result: {e}")))?;
    if parsed.vectors.len() != texts.len() {
      return Err(PipelineError::Protocol(format!(
        "embed returned {} vectors for {} texts",
        parsed.vectors.len(),
        texts.len()
      )));
    }

    let vectors: Vec<Vec<f32>> = parsed
      .vectors
      .into_iter()
      .map(|v| postprocess_vector(v, &caps))
      .collect();

    // Forward only the vector kinds the model declares.
    Ok(EmbedOutput {
      vectors,
      sparse: if caps.sparse { parsed.sparse } else { None },
      colbert: if caps.colbert { parsed.colbert } else { None },
    })
  }

  async fn extract_semantics(
    &mut self,
    model_id: &str,
    text: &str,
    reuse_embedding: Option<Vec<f32>>,
  ) -> Result<ChunkSemantics, PipelineError> {
    self.ensure_model(model_id).await?;

    let mut params = serde_json::json!({ "text": text });
    if let Some(embedding) = reuse_embedding {
      params["reuseEmbedding"] = serde_json::json!(embedding);
    }

    let result = self.round_trip("extract_semantics", params).await?;
    let parsed: SemanticsResult =
      serde_json::from_value(result).map_err(|e| PipelineError::Protocol(format!("bad semantics result: {e}")))?;

    Ok(ChunkSemantics {
      key_phrases: parsed.key_phrases,
      topics: parsed.topics,
      readability: parsed.readability,
    })
  }
}

fn class_name(kind: EmbedKind) -> &'static str {
  match kind {
    EmbedKind::Passage => "indexing",
    EmbedKind::Query => "interactive",
  }
}
