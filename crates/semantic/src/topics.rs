//! Topic labels from key phrases.
//!
//! Greedy single-pass clustering: phrases sharing a content token join the
//! same cluster, and each cluster is labeled by its most frequent phrase.

use std::collections::HashSet;

/// Maximum topics returned per chunk.
const MAX_TOPICS: usize = 4;
/// Jaccard threshold for joining an existing cluster.
const JOIN_THRESHOLD: f32 = 0.25;

struct Cluster {
  tokens: HashSet<String>,
  label: String,
  label_count: usize,
}

fn phrase_tokens(phrase: &str) -> HashSet<String> {
  phrase.split_whitespace().map(|t| t.to_string()).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
  if a.is_empty() || b.is_empty() {
    return 0.0;
  }
  let intersection = a.intersection(b).count();
  let union = a.len() + b.len() - intersection;
  intersection as f32 / union as f32
}

/// Derive topic labels from ranked key phrases and their counts.
///
/// `phrases` must be ordered best-first; counts default to 1 when the
/// caller has no frequency information.
pub fn cluster_topics(phrases: &[(String, usize)]) -> Vec<String> {
  let mut clusters: Vec<Cluster> = Vec::new();

  for (phrase, count) in phrases {
    let tokens = phrase_tokens(phrase);
    let joined = clusters.iter_mut().find(|c| jaccard(&c.tokens, &tokens) >= JOIN_THRESHOLD);

    match joined {
      Some(cluster) => {
        cluster.tokens.extend(tokens);
        if *count > cluster.label_count {
          cluster.label = phrase.clone();
          cluster.label_count = *count;
        }
      }
      None => clusters.push(Cluster {
        tokens,
        label: phrase.clone(),
        label_count: *count,
      }),
    }
  }

  clusters.into_iter().take(MAX_TOPICS).map(|c| c.label).collect()
}
