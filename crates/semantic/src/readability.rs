//! Coleman-Liau readability, calibrated for technical documents.

/// Grade at which the calibrated score sits exactly at the midpoint.
const MIDPOINT_GRADE: f64 = 12.0;
/// Score points per grade away from the midpoint.
const GRADE_SLOPE: f64 = 2.5;
/// Calibrated band for technical text.
const SCORE_MIN: f64 = 40.0;
const SCORE_MAX: f64 = 60.0;
/// Returned for degenerate inputs (no words or no sentences).
const SCORE_NEUTRAL: f32 = 50.0;

/// Readability of a text in the calibrated [40, 60] band.
///
/// The raw Coleman-Liau grade `0.0588·L − 0.296·S − 15.8` (L = letters per
/// 100 words, S = sentences per 100 words) maps linearly onto the band with
/// grade 12 at the midpoint. Texts with zero words or zero sentences score
/// exactly 50.
pub fn readability_score(text: &str) -> f32 {
  let words = count_words(text);
  let sentences = count_sentences(text);
  let letters = count_letters(text);

  if words == 0 || sentences == 0 {
    return SCORE_NEUTRAL;
  }

  let l = letters as f64 / words as f64 * 100.0;
  let s = sentences as f64 / words as f64 * 100.0;
  let grade = 0.0588 * l - 0.296 * s - 15.8;

  let score = 50.0 + (MIDPOINT_GRADE - grade) * GRADE_SLOPE;
  score.clamp(SCORE_MIN, SCORE_MAX) as f32
}

fn count_words(text: &str) -> usize {
  text.split_whitespace().count()
}

fn count_letters(text: &str) -> usize {
  text.chars().filter(|c| c.is_alphanumeric()).count()
}

fn count_sentences(text: &str) -> usize {
  let mut count = 0;
  let mut in_terminator = false;
  for c in text.chars() {
    let terminal = matches!(c, '.' | '!' | '?');
    if terminal && !in_terminator {
      count += 1;
    }
    in_terminator = terminal;
  }
  count
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_text_is_neutral() {
    assert_eq!(readability_score(""), 50.0);
    assert_eq!(readability_score("   \n\t  "), 50.0);
  }

  #[test]
  fn test_no_sentence_terminator_is_neutral() {
    assert_eq!(readability_score("a heading without punctuation"), 50.0);
  }

  #[test]
  fn test_score_within_band() {
    let simple = "The cat sat. The dog ran. We went home. It was fun.";
    let dense = "Multidimensional heterogeneous configurations necessitate systematically orchestrated \
                 initialization procedures notwithstanding architectural considerations.";

    for text in [simple, dense] {
      let score = readability_score(text);
      assert!((40.0..=60.0).contains(&score), "score {score} out of band");
    }
  }

  #[test]
  fn test_simpler_text_scores_higher() {
    let simple = "The cat sat on the mat. The dog ran to us. We all went home.";
    let dense = "Multidimensional heterogeneous configurations necessitate systematically orchestrated \
                 initialization procedures notwithstanding countervailing architectural considerations \
                 pertaining to infrastructural interdependencies.";

    assert!(readability_score(simple) > readability_score(dense));
  }

  #[test]
  fn test_ellipsis_counts_once() {
    // Three dots are one sentence boundary, not three.
    assert_eq!(count_sentences("Wait... what? Yes."), 3);
  }
}
