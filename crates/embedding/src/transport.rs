//! Transport seam between the coordinator and the worker process.
//!
//! Production uses a child process over piped stdin/stdout; tests script
//! the trait directly.

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// A line-oriented bidirectional channel to one worker instance.
#[async_trait]
pub trait WorkerTransport: Send {
  /// Write one request line (newline appended by the transport).
  async fn send(&mut self, line: &str) -> io::Result<()>;

  /// Read the next stdout line. `Ok(None)` means EOF: the worker died.
  async fn recv(&mut self) -> io::Result<Option<String>>;

  /// Tear the worker down. Idempotent.
  async fn kill(&mut self);
}

/// Creates transports; the coordinator respawns through this after a
/// worker loss.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
  async fn spawn(&self) -> io::Result<Box<dyn WorkerTransport>>;
}

/// Child process transport. stderr is inherited so worker logs pass
/// through without ever touching the protocol stream.
pub struct ProcessTransport {
  child: Child,
  stdin: ChildStdin,
  lines: Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl WorkerTransport for ProcessTransport {
  async fn send(&mut self, line: &str) -> io::Result<()> {
    self.stdin.write_all(line.as_bytes()).await?;
    self.stdin.write_all(b"\n").await?;
    self.stdin.flush().await
  }

  async fn recv(&mut self) -> io::Result<Option<String>> {
    self.lines.next_line().await
  }

  async fn kill(&mut self) {
    if let Err(e) = self.child.kill().await {
      warn!(error = %e, "Failed to kill worker process");
    }
  }
}

/// Spawns the configured worker executable.
pub struct ProcessSpawner {
  pub command: String,
  pub args: Vec<String>,
}

impl ProcessSpawner {
  pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
    Self {
      command: command.into(),
      args,
    }
  }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
  async fn spawn(&self) -> io::Result<Box<dyn WorkerTransport>> {
    debug!(command = %self.command, "Spawning embedding worker");
    let mut child = Command::new(&self.command)
      .args(&self.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .kill_on_drop(true)
      .spawn()?;

    let stdin = child
      .stdin
      .take()
      .ok_or_else(|| io::Error::other("worker stdin unavailable"))?;
    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| io::Error::other("worker stdout unavailable"))?;

    Ok(Box::new(ProcessTransport {
      child,
      stdin,
      lines: BufReader::new(stdout).lines(),
    }))
  }
}

/// Scripted in-process transport for tests and the integration suite.
///
/// Behaves like a tiny worker: `load_model` / `unload_model` succeed for
/// any model except those listed in `unknown_models`, `embed` returns
/// deterministic vectors derived from the text, and `extract_semantics`
/// echoes canned values. A `crash_after` budget makes it die mid-stream.
#[doc(hidden)]
pub struct ScriptedTransport {
  dimension: usize,
  unknown_models: Vec<String>,
  crash_after: Option<usize>,
  handled: usize,
  queue: std::collections::VecDeque<String>,
  dead: bool,
}

#[doc(hidden)]
impl ScriptedTransport {
  pub fn new(dimension: usize) -> Self {
    Self {
      dimension,
      unknown_models: Vec::new(),
      crash_after: None,
      handled: 0,
      queue: std::collections::VecDeque::new(),
      dead: false,
    }
  }

  pub fn with_unknown_models(mut self, models: Vec<String>) -> Self {
    self.unknown_models = models;
    self
  }

  pub fn with_crash_after(mut self, requests: usize) -> Self {
    self.crash_after = Some(requests);
    self
  }

  /// Deterministic pseudo-embedding: a hash of the text spread over the
  /// dimensions.
  pub fn embed_text(text: &str, dimension: usize) -> Vec<f32> {
    let mut seed: u32 = 2166136261;
    for b in text.bytes() {
      seed ^= b as u32;
      seed = seed.wrapping_mul(16777619);
    }
    (0..dimension)
      .map(|_| {
        seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
        ((seed >> 8) as f32 / (1 << 24) as f32) - 0.5
      })
      .collect()
  }
}

#[async_trait]
impl WorkerTransport for ScriptedTransport {
  async fn send(&mut self, line: &str) -> io::Result<()> {
    use crate::protocol::{WorkerRequest, WorkerResponse, WorkerRpcError};

    if self.dead {
      return Err(io::Error::new(io::ErrorKind::BrokenPipe, "worker dead"));
    }
    if let Some(limit) = self.crash_after
      && self.handled >= limit
    {
      self.dead = true;
      return Ok(()); // Request written; the reply never comes.
    }
    self.handled += 1;

    let request: WorkerRequest = serde_json::from_str(line).map_err(io::Error::other)?;
    let respond = |result: serde_json::Value| WorkerResponse {
      id: Some(request.id),
      result: Some(result),
      error: None,
    };

    let response = match request.method.as_str() {
      "load_model" => {
        let model = request.params["modelId"].as_str().unwrap_or_default().to_string();
        if self.unknown_models.contains(&model) {
          WorkerResponse {
            id: Some(request.id),
            result: None,
            error: Some(WorkerRpcError {
              code: -32001,
              message: format!("unknown model: {model}"),
            }),
          }
        } else {
          respond(serde_json::json!("ready"))
        }
      }
      "unload_model" => respond(serde_json::json!("idle")),
      "embed" => {
        let texts: Vec<String> = serde_json::from_value(request.params["texts"].clone()).unwrap_or_default();
        let vectors: Vec<Vec<f32>> = texts.iter().map(|t| Self::embed_text(t, self.dimension)).collect();
        respond(serde_json::json!({ "vectors": vectors }))
      }
      "extract_semantics" => respond(serde_json::json!({
        "keyPhrases": ["scripted key phrase", "worker side extraction"],
        "topics": ["scripted topic"],
        "readability": 52.0
      })),
      other => WorkerResponse {
        id: Some(request.id),
        result: None,
        error: Some(WorkerRpcError {
          code: -32601,
          message: format!("method not found: {other}"),
        }),
      },
    };

    self
      .queue
      .push_back(serde_json::to_string(&response).map_err(io::Error::other)?);
    Ok(())
  }

  async fn recv(&mut self) -> io::Result<Option<String>> {
    if let Some(line) = self.queue.pop_front() {
      return Ok(Some(line));
    }
    // No queued reply: a dead worker reads as EOF, a live one would block.
    // The scripted worker never blocks; absence of a reply means death.
    Ok(None)
  }

  async fn kill(&mut self) {
    self.dead = true;
  }
}

/// Spawner producing scripted transports, configured per test.
#[doc(hidden)]
pub struct ScriptedSpawner {
  pub dimension: usize,
  pub unknown_models: Vec<String>,
  pub crash_after: std::sync::Mutex<Option<usize>>,
  pub spawned: std::sync::atomic::AtomicUsize,
}

#[doc(hidden)]
impl ScriptedSpawner {
  pub fn new(dimension: usize) -> Self {
    Self {
      dimension,
      unknown_models: Vec::new(),
      crash_after: std::sync::Mutex::new(None),
      spawned: std::sync::atomic::AtomicUsize::new(0),
    }
  }

  pub fn with_unknown_models(mut self, models: Vec<String>) -> Self {
    self.unknown_models = models;
    self
  }

  /// Make only the NEXT spawned worker crash after `requests` requests.
  pub fn crash_next_after(&self, requests: usize) {
    *self.crash_after.lock().unwrap() = Some(requests);
  }

  pub fn spawn_count(&self) -> usize {
    self.spawned.load(std::sync::atomic::Ordering::SeqCst)
  }
}

#[async_trait]
impl WorkerSpawner for ScriptedSpawner {
  async fn spawn(&self) -> io::Result<Box<dyn WorkerTransport>> {
    self.spawned.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    let mut transport = ScriptedTransport::new(self.dimension).with_unknown_models(self.unknown_models.clone());
    if let Some(crash_after) = self.crash_after.lock().unwrap().take() {
      transport = transport.with_crash_after(crash_after);
    }
    Ok(Box::new(transport))
  }
}
