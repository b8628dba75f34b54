//! Line-delimited JSON-RPC between the coordinator and the worker.
//!
//! Every stdout line from the worker must parse as a [`WorkerResponse`];
//! anything else invalidates the stream and forces a worker restart.
//! stderr is log-only and never parsed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
  pub id: u64,
  pub method: String,
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub params: serde_json::Value,
}

impl WorkerRequest {
  pub fn new(id: u64, method: &str, params: serde_json::Value) -> Self {
    Self {
      id,
      method: method.to_string(),
      params,
    }
  }

  pub fn to_line(&self) -> String {
    serde_json::to_string(self).unwrap_or_default()
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
  #[serde(default)]
  pub id: Option<u64>,
  #[serde(default)]
  pub result: Option<serde_json::Value>,
  #[serde(default)]
  pub error: Option<WorkerRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRpcError {
  pub code: i32,
  pub message: String,
}

/// Result payload of an `embed` request. Unknown vector kinds in the raw
/// result are dropped during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResult {
  pub vectors: Vec<Vec<f32>>,
  #[serde(default)]
  pub sparse: Option<serde_json::Value>,
  #[serde(default)]
  pub colbert: Option<serde_json::Value>,
}

/// Result payload of an `extract_semantics` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticsResult {
  pub key_phrases: Vec<String>,
  pub topics: Vec<String>,
  pub readability: f32,
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_request_line_shape() {
    let request = WorkerRequest::new(7, "load_model", serde_json::json!({ "modelId": "bge-m3" }));
    let line = request.to_line();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["id"], 7);
    assert_eq!(value["method"], "load_model");
    assert_eq!(value["params"]["modelId"], "bge-m3");
  }

  #[test]
  fn test_response_parses_result_or_error() {
    let ok: WorkerResponse = serde_json::from_str(r#"{"id":1,"result":"ready"}"#).unwrap();
    assert_eq!(ok.id, Some(1));
    assert!(ok.error.is_none());

    let err: WorkerResponse = serde_json::from_str(r#"{"id":2,"error":{"code":-1,"message":"no such model"}}"#).unwrap();
    assert_eq!(err.error.unwrap().message, "no such model");
  }

  #[test]
  fn test_semantics_result_wire_keys() {
    let raw = serde_json::json!({
      "keyPhrases": ["alpha beta"],
      "topics": ["alpha"],
      "readability": 48.5
    });
    let result: SemanticsResult = serde_json::from_value(raw).unwrap();
    assert_eq!(result.key_phrases, vec!["alpha beta"]);
    assert_eq!(result.readability, 48.5);
  }

  #[test]
  fn test_embed_result_ignores_unknown_kinds() {
    let raw = serde_json::json!({
      "vectors": [[0.1, 0.2]],
      "sparse": {"7": 0.5},
      "experimental": [1, 2, 3]
    });
    let result: EmbedResult = serde_json::from_value(raw).unwrap();
    assert_eq!(result.vectors.len(), 1);
    assert!(result.sparse.is_some());
    assert!(result.colbert.is_none());
  }
}
