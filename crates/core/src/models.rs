//! Model capability registry.
//!
//! A declarative table drives every per-model behavior: input prefixes,
//! output normalization, and which vector kinds the worker returns. The
//! preprocessing itself is two pure functions so there is exactly one place
//! where capabilities turn into behavior.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelCapsError {
  #[error("Model capability entry missing required field: {0}")]
  MissingField(&'static str),
  #[error("Unknown model: {0}")]
  UnknownModel(String),
}

/// How a text is being embedded; selects the instruction prefix for models
/// that require one, and the scheduling class on the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedKind {
  /// Document chunks at indexing time. Batched, fair-queued.
  #[default]
  Passage,
  /// Search queries. Preempts indexing at batch boundaries.
  Query,
}

/// Declared capabilities of an embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCaps {
  pub model_id: String,
  #[serde(default)]
  pub dense: bool,
  #[serde(default)]
  pub sparse: bool,
  #[serde(default)]
  pub colbert: bool,
  #[serde(default)]
  pub requires_passage_prefix: bool,
  #[serde(default)]
  pub requires_l2_normalization: bool,
  pub dimension: usize,
}

impl ModelCaps {
  /// Parse an entry from JSON. Unknown keys are ignored; a missing
  /// `model_id` or `dimension` rejects the entry.
  pub fn from_json(raw: &serde_json::Value) -> Result<Self, ModelCapsError> {
    if raw.get("model_id").and_then(|v| v.as_str()).is_none() {
      return Err(ModelCapsError::MissingField("model_id"));
    }
    if raw.get("dimension").and_then(|v| v.as_u64()).is_none() {
      return Err(ModelCapsError::MissingField("dimension"));
    }
    serde_json::from_value(raw.clone()).map_err(|_| ModelCapsError::MissingField("dimension"))
  }
}

fn caps(
  model_id: &str,
  dimension: usize,
  requires_passage_prefix: bool,
  requires_l2_normalization: bool,
  sparse: bool,
  colbert: bool,
) -> ModelCaps {
  ModelCaps {
    model_id: model_id.to_string(),
    dense: true,
    sparse,
    colbert,
    requires_passage_prefix,
    requires_l2_normalization,
    dimension,
  }
}

/// The curated model table.
pub fn builtin_models() -> Vec<ModelCaps> {
  vec![
    caps("multilingual-e5-small", 384, true, true, false, false),
    caps("multilingual-e5-large", 1024, true, true, false, false),
    caps("bge-m3", 1024, false, true, true, true),
    caps("all-minilm-l6-v2", 384, false, true, false, false),
  ]
}

/// Look a model up in the builtin table.
pub fn lookup_model(model_id: &str) -> Result<ModelCaps, ModelCapsError> {
  builtin_models()
    .into_iter()
    .find(|m| m.model_id == model_id)
    .ok_or_else(|| ModelCapsError::UnknownModel(model_id.to_string()))
}

/// Apply the model's input transformation to a text.
///
/// Prefix choice must agree between indexing and search: chunks get
/// `passage: `, queries get `query: `.
pub fn prepare_text(text: &str, caps: &ModelCaps, kind: EmbedKind) -> String {
  if !caps.requires_passage_prefix {
    return text.to_string();
  }
  match kind {
    EmbedKind::Passage => format!("passage: {text}"),
    EmbedKind::Query => format!("query: {text}"),
  }
}

/// Apply the model's output transformation to a vector.
pub fn postprocess_vector(mut vector: Vec<f32>, caps: &ModelCaps) -> Vec<f32> {
  if caps.requires_l2_normalization {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
      for v in &mut vector {
        *v /= norm;
      }
    }
  }
  vector
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_lookup_known_model() {
    let caps = lookup_model("multilingual-e5-small").unwrap();
    assert_eq!(caps.dimension, 384);
    assert!(caps.requires_passage_prefix);
    assert!(caps.dense);
    assert!(!caps.sparse);
  }

  #[test]
  fn test_lookup_unknown_model() {
    assert!(matches!(
      lookup_model("made-up-model"),
      Err(ModelCapsError::UnknownModel(_))
    ));
  }

  #[test]
  fn test_prefixes_match_kind() {
    let caps = lookup_model("multilingual-e5-large").unwrap();
    assert_eq!(prepare_text("hello", &caps, EmbedKind::Passage), "passage: hello");
    assert_eq!(prepare_text("hello", &caps, EmbedKind::Query), "query: hello");
  }

  #[test]
  fn test_no_prefix_when_not_required() {
    let caps = lookup_model("bge-m3").unwrap();
    assert_eq!(prepare_text("hello", &caps, EmbedKind::Query), "hello");
  }

  #[test]
  fn test_l2_normalization() {
    let caps = lookup_model("all-minilm-l6-v2").unwrap();
    let vector = postprocess_vector(vec![3.0, 4.0], &caps);
    assert!((vector[0] - 0.6).abs() < 1e-6);
    assert!((vector[1] - 0.8).abs() < 1e-6);

    // Zero vectors pass through untouched.
    let zero = postprocess_vector(vec![0.0, 0.0], &caps);
    assert_eq!(zero, vec![0.0, 0.0]);
  }

  #[test]
  fn test_from_json_ignores_unknown_keys() {
    let raw = serde_json::json!({
      "model_id": "custom",
      "dimension": 512,
      "dense": true,
      "experimental_quantization": "int8"
    });
    let caps = ModelCaps::from_json(&raw).unwrap();
    assert_eq!(caps.model_id, "custom");
    assert_eq!(caps.dimension, 512);
    assert!(!caps.requires_passage_prefix);
  }

  #[test]
  fn test_from_json_missing_required_field() {
    let raw = serde_json::json!({ "model_id": "custom" });
    assert!(matches!(
      ModelCaps::from_json(&raw),
      Err(ModelCapsError::MissingField("dimension"))
    ));

    let raw = serde_json::json!({ "dimension": 128 });
    assert!(matches!(
      ModelCaps::from_json(&raw),
      Err(ModelCapsError::MissingField("model_id"))
    ));
  }

  #[test]
  fn test_bge_m3_vector_kinds() {
    let caps = lookup_model("bge-m3").unwrap();
    assert!(caps.dense && caps.sparse && caps.colbert);
  }
}
