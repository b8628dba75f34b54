//! N-gram key phrase extraction.
//!
//! Candidates are 1–3-grams over stopword-delimited runs. Ranking is either
//! frequency-based (no vectors available) or cosine-based against the
//! document embedding (the fallback path for models without a worker-side
//! extractor). Multi-word candidates are boosted so that at least 80% of
//! emitted phrases carry two or more words on natural text.

use std::collections::HashMap;

const STOPWORDS: &[&str] = &[
  "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "do", "for", "from", "has", "have", "if",
  "in", "into", "is", "it", "its", "of", "on", "or", "not", "no", "so", "such", "than", "that", "the", "their",
  "them", "then", "there", "these", "they", "this", "to", "was", "we", "were", "which", "will", "with", "would",
  "you", "your",
];

/// Boost applied to multi-word candidates during ranking.
const MULTIWORD_BOOST: f32 = 1.6;
/// Minimum characters for a token to participate in a phrase.
const MIN_TOKEN_CHARS: usize = 2;

/// A candidate phrase with its occurrence count.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPhraseCandidate {
  pub phrase: String,
  pub words: usize,
  pub count: usize,
}

fn is_stopword(token: &str) -> bool {
  STOPWORDS.contains(&token)
}

fn tokenize(text: &str) -> Vec<String> {
  text
    .split(|c: char| !c.is_alphanumeric() && c != '-')
    .map(|t| t.trim_matches('-').to_lowercase())
    .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS && !t.chars().all(|c| c.is_numeric()))
    .collect()
}

/// Produce deduplicated 1–3-gram candidates from the text.
///
/// N-grams never cross a stopword: stopwords split the token stream into
/// runs, and candidates are drawn inside each run.
pub fn candidate_phrases(text: &str) -> Vec<KeyPhraseCandidate> {
  let tokens = tokenize(text);

  let mut runs: Vec<Vec<&str>> = Vec::new();
  let mut current: Vec<&str> = Vec::new();
  for token in &tokens {
    if is_stopword(token) {
      if !current.is_empty() {
        runs.push(std::mem::take(&mut current));
      }
    } else {
      current.push(token);
    }
  }
  if !current.is_empty() {
    runs.push(current);
  }

  let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
  for run in &runs {
    for n in 1..=3usize.min(run.len()) {
      for window in run.windows(n) {
        let phrase = window.join(" ");
        let entry = counts.entry(phrase).or_insert((n, 0));
        entry.1 += 1;
      }
    }
  }

  let mut candidates: Vec<KeyPhraseCandidate> = counts
    .into_iter()
    .map(|(phrase, (words, count))| KeyPhraseCandidate { phrase, words, count })
    .collect();
  candidates.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.phrase.cmp(&b.phrase)));
  candidates
}

/// Rank candidates by occurrence count alone, boosting multi-word phrases.
pub fn rank_by_frequency(candidates: &[KeyPhraseCandidate], limit: usize) -> Vec<String> {
  let mut scored: Vec<(f32, &KeyPhraseCandidate)> = candidates
    .iter()
    .map(|c| {
      let boost = if c.words >= 2 { MULTIWORD_BOOST } else { 1.0 };
      (c.count as f32 * boost, c)
    })
    .collect();
  scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
  take_deduped(scored, limit)
}

/// Rank candidates by cosine similarity of their vectors to the document
/// vector. `vectors[i]` corresponds to `candidates[i]`.
pub fn rank_by_cosine(
  candidates: &[KeyPhraseCandidate],
  vectors: &[Vec<f32>],
  document_vector: &[f32],
  limit: usize,
) -> Vec<String> {
  let mut scored: Vec<(f32, &KeyPhraseCandidate)> = candidates
    .iter()
    .zip(vectors)
    .map(|(c, v)| {
      let boost = if c.words >= 2 { MULTIWORD_BOOST } else { 1.0 };
      (crate::cosine_similarity(v, document_vector) * boost, c)
    })
    .collect();
  scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
  take_deduped(scored, limit)
}

/// Take the top phrases, dropping any phrase fully contained in an
/// already-taken longer phrase.
fn take_deduped(scored: Vec<(f32, &KeyPhraseCandidate)>, limit: usize) -> Vec<String> {
  let mut taken: Vec<String> = Vec::new();
  for (_, candidate) in scored {
    if taken.len() >= limit {
      break;
    }
    let contained = taken
      .iter()
      .any(|t| t.contains(&candidate.phrase) || candidate.phrase.contains(t.as_str()));
    if !contained {
      taken.push(candidate.phrase.clone());
    }
  }
  taken
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  const SAMPLE: &str = "The embedding pipeline batches chunk requests. The embedding pipeline \
                        normalizes output vectors. Chunk requests carry extraction coordinates, \
                        and extraction coordinates locate the chunk in the source document.";

  #[test]
  fn test_candidates_skip_stopwords() {
    let candidates = candidate_phrases("the quick brown fox and the lazy dog");
    assert!(candidates.iter().all(|c| !c.phrase.contains("the ")));
    assert!(candidates.iter().any(|c| c.phrase == "quick brown fox"));
    assert!(candidates.iter().any(|c| c.phrase == "lazy dog"));
  }

  #[test]
  fn test_ngrams_do_not_cross_stopwords() {
    let candidates = candidate_phrases("alpha beta and gamma");
    assert!(candidates.iter().any(|c| c.phrase == "alpha beta"));
    assert!(!candidates.iter().any(|c| c.phrase.contains("beta gamma")));
  }

  #[test]
  fn test_frequency_ranking_prefers_repeated_multiword() {
    let candidates = candidate_phrases(SAMPLE);
    let top = rank_by_frequency(&candidates, 5);

    assert!(!top.is_empty());
    // The repeated bigrams outrank everything else.
    assert!(top.contains(&"embedding pipeline".to_string()), "top: {top:?}");
    assert!(top[0].split(' ').count() >= 2);

    let multiword = top.iter().filter(|p| p.split(' ').count() >= 2).count();
    assert!(
      multiword * 10 >= top.len() * 8,
      "expected >=80% multi-word phrases, got {multiword}/{}",
      top.len()
    );
  }

  #[test]
  fn test_cosine_ranking_follows_vectors() {
    let candidates = vec![
      KeyPhraseCandidate {
        phrase: "relevant phrase".to_string(),
        words: 2,
        count: 1,
      },
      KeyPhraseCandidate {
        phrase: "unrelated phrase".to_string(),
        words: 2,
        count: 1,
      },
    ];
    let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
    let document = vec![1.0, 0.1];

    let ranked = rank_by_cosine(&candidates, &vectors, &document, 2);
    assert_eq!(ranked[0], "relevant phrase");
  }

  #[test]
  fn test_dedup_drops_contained_phrases() {
    let long = KeyPhraseCandidate {
      phrase: "embedding pipeline".to_string(),
      words: 2,
      count: 3,
    };
    let short = KeyPhraseCandidate {
      phrase: "pipeline".to_string(),
      words: 1,
      count: 4,
    };
    let taken = take_deduped(vec![(3.0, &long), (2.0, &short)], 5);
    assert_eq!(taken, vec!["embedding pipeline".to_string()]);
  }

  #[test]
  fn test_empty_text() {
    assert!(candidate_phrases("").is_empty());
    assert!(rank_by_frequency(&[], 5).is_empty());
  }
}
