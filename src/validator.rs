//! Layered quality gate applied to every generated question.
//!
//! Checks run in order and short-circuit on the first failure; each failure
//! carries a distinct `RejectReason` so rejections can be counted per cause.
//! Layer 7 (subject relevance) is deliberately soft: it only runs in strict
//! mode, only logs, and never rejects — legitimately keyword-sparse
//! questions must not be thrown away.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::domain::{Question, RejectReason};
use crate::mathtext::normalize_math;
use crate::subjects::keywords_for;

static STEM_SUBJECT: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?i)math|physic|chem|engineer").expect("static regex"));

/// Phrases that mark a question as talking about its source material or the
/// generation process instead of testing subject knowledge.
const META_PHRASES: &[&str] = &[
  "the text",
  "the passage",
  "the source",
  "the document",
  "the excerpt",
  "the material",
  "the article",
  "the author",
  "the following text",
  "according to the text",
  "as stated in",
  "as mentioned in",
  "mentioned above",
  "refer to the",
  "based on the passage",
  "in the given text",
  "instruction",
  "curriculum",
  "examination questions",
  "this prompt",
  "study guide",
];

/// Running tally of rejections by reason, reported with each batch.
#[derive(Clone, Debug, Default)]
pub struct RejectionTally {
  counts: HashMap<&'static str, u32>,
}

impl RejectionTally {
  pub fn add(&mut self, reason: RejectReason) {
    *self.counts.entry(reason.as_str()).or_insert(0) += 1;
  }

  pub fn total(&self) -> u32 {
    self.counts.values().sum()
  }

  pub fn merge(&mut self, other: &RejectionTally) {
    for (reason, n) in &other.counts {
      *self.counts.entry(reason).or_insert(0) += n;
    }
  }

  pub fn summary(&self) -> String {
    if self.counts.is_empty() {
      return "none".into();
    }
    let mut parts: Vec<String> = self.counts.iter().map(|(r, n)| format!("{r}={n}")).collect();
    parts.sort();
    parts.join(", ")
  }
}

/// Validate one (already cleaned) question. `Ok(())` means accepted.
pub fn validate(q: &Question, subject: &str, strict: bool) -> Result<(), RejectReason> {
  // 1. Structure: stem length, option count, answer letter.
  if q.question.trim().chars().count() < 10
    || q.options.len() != 4
    || q.answer_index().is_none()
  {
    return Err(RejectReason::BadStructure);
  }

  // Strict sources must carry an explanation.
  if strict && q.explanation.trim().is_empty() {
    return Err(RejectReason::BadStructure);
  }

  // 2. No empty/whitespace-only options.
  if q.options.iter().any(|o| o.trim().is_empty()) {
    return Err(RejectReason::EmptyOption);
  }

  // 3. All four options must be distinct under the subject's equality.
  let math_aware = STEM_SUBJECT.is_match(subject);
  let mut seen: Vec<String> = Vec::with_capacity(4);
  for opt in &q.options {
    let key = if math_aware {
      normalize_math(opt)
    } else {
      opt.trim().to_lowercase()
    };
    if seen.contains(&key) {
      return Err(RejectReason::DuplicateOptions);
    }
    seen.push(key);
  }

  // 4. The answer letter must index a non-empty option.
  let idx = q.answer_index().ok_or(RejectReason::UnresolvableAnswer)?;
  if q.options.get(idx).map(|o| o.trim().is_empty()).unwrap_or(true) {
    return Err(RejectReason::UnresolvableAnswer);
  }

  // 5. Meta-content: a single blocklisted phrase invalidates the question.
  let combined = format!("{} {}", q.question, q.explanation).to_lowercase();
  if META_PHRASES.iter().any(|p| combined.contains(p)) {
    return Err(RejectReason::MetaContent);
  }

  // 6. Questions end with a question mark.
  if !q.question.trim_end().ends_with('?') {
    return Err(RejectReason::NoQuestionMark);
  }

  // 7. Soft relevance: heuristic only, logged but never enforced.
  if strict {
    let keywords = keywords_for(subject);
    if !keywords.is_empty() {
      let haystack = format!("{} {}", combined, q.options.join(" ").to_lowercase());
      if !keywords.iter().any(|k| haystack.contains(k)) {
        debug!(
          target: "generation",
          %subject,
          question = %q.question,
          "relevance_miss: no subject keyword found (soft check, kept)"
        );
      }
    }
  }

  Ok(())
}

/// Density heuristic for whole knowledge-base documents: reference material
/// legitimately mentions a few instructional-sounding words, so it is only
/// unusable once at least three distinct meta phrases appear. This threshold
/// is intentionally looser than the per-question check above.
pub fn content_is_meta(content: &str) -> bool {
  let lower = content.to_lowercase();
  let distinct = META_PHRASES.iter().filter(|p| lower.contains(*p)).count();
  distinct >= 3
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base_question() -> Question {
    Question {
      question: "What is the value of $2 + 2$?".into(),
      options: vec!["4".into(), "5".into(), "6".into(), "7".into()],
      answer: "A".into(),
      explanation: "Two plus two equals four.".into(),
    }
  }

  #[test]
  fn well_formed_question_passes() {
    assert!(validate(&base_question(), "Mathematics", false).is_ok());
  }

  #[test]
  fn short_stem_is_bad_structure() {
    let mut q = base_question();
    q.question = "Eh?".into();
    assert_eq!(validate(&q, "Mathematics", false), Err(RejectReason::BadStructure));
  }

  #[test]
  fn wrong_option_count_is_bad_structure() {
    let mut q = base_question();
    q.options.pop();
    assert_eq!(validate(&q, "Mathematics", false), Err(RejectReason::BadStructure));
  }

  #[test]
  fn empty_option_is_rejected() {
    let mut q = base_question();
    q.options[2] = "   ".into();
    assert_eq!(validate(&q, "Mathematics", false), Err(RejectReason::EmptyOption));
  }

  #[test]
  fn math_equivalent_options_are_duplicates_in_stem() {
    let mut q = base_question();
    q.options = vec!["0.5".into(), "1/2".into(), "2".into(), "3".into()];
    assert_eq!(
      validate(&q, "Mathematics", false),
      Err(RejectReason::DuplicateOptions)
    );
  }

  #[test]
  fn math_equivalence_does_not_apply_outside_stem() {
    let mut q = base_question();
    q.question = "Which number is written as one half?".into();
    q.options = vec!["0.5".into(), "1/2".into(), "2".into(), "3".into()];
    assert!(validate(&q, "Literature", false).is_ok());
  }

  #[test]
  fn case_insensitive_duplicates_outside_stem() {
    let mut q = base_question();
    q.question = "Which word is a synonym of large?".into();
    q.options = vec!["Big".into(), " big ".into(), "tiny".into(), "small".into()];
    assert_eq!(
      validate(&q, "English Language", false),
      Err(RejectReason::DuplicateOptions)
    );
  }

  #[test]
  fn invalid_answer_letter_is_bad_structure() {
    let mut q = base_question();
    q.answer = "E".into();
    assert_eq!(validate(&q, "Mathematics", false), Err(RejectReason::BadStructure));
  }

  #[test]
  fn meta_content_is_always_rejected() {
    let mut q = base_question();
    q.explanation = "According to the text, the answer is four.".into();
    assert_eq!(validate(&q, "Mathematics", false), Err(RejectReason::MetaContent));

    let mut q2 = base_question();
    q2.question = "According to the text, what is $2 + 2$?".into();
    assert_eq!(validate(&q2, "Mathematics", true), Err(RejectReason::MetaContent));
  }

  #[test]
  fn missing_question_mark_is_rejected() {
    let mut q = base_question();
    q.question = "Compute the value of $2 + 2$.".into();
    assert_eq!(validate(&q, "Mathematics", false), Err(RejectReason::NoQuestionMark));
  }

  #[test]
  fn strict_mode_requires_an_explanation() {
    let mut q = base_question();
    q.explanation = "  ".into();
    assert!(validate(&q, "Mathematics", false).is_ok());
    assert_eq!(validate(&q, "Mathematics", true), Err(RejectReason::BadStructure));
  }

  #[test]
  fn strict_mode_never_rejects_on_relevance() {
    let mut q = base_question();
    q.question = "Which of these is the odd one out?".into();
    q.options = vec!["p".into(), "q".into(), "r".into(), "s".into()];
    // No Mathematics keyword anywhere, strict on: still accepted.
    assert!(validate(&q, "Mathematics", true).is_ok());
  }

  #[test]
  fn content_meta_density_needs_three_distinct_phrases() {
    let two = "This unit follows the curriculum and gives one instruction per topic.";
    assert!(!content_is_meta(two));
    let three = "This study guide follows the curriculum and gives one instruction per topic.";
    assert!(content_is_meta(three));
  }

  #[test]
  fn tally_counts_by_reason() {
    let mut tally = RejectionTally::default();
    tally.add(RejectReason::MetaContent);
    tally.add(RejectReason::MetaContent);
    tally.add(RejectReason::NoQuestionMark);
    assert_eq!(tally.total(), 3);
    assert_eq!(tally.summary(), "meta_content=2, no_question_mark=1");
  }
}
