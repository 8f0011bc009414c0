//! Domain models: generated questions, difficulty levels, rejection reasons,
//! and the parameter objects accepted by the generation facade.

use serde::{Deserialize, Serialize};

/// A single multiple-choice question as produced by the generation pipeline.
/// Options are positional: index 0 = A, 1 = B, 2 = C, 3 = D.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Question {
  pub question: String,
  pub options: Vec<String>,
  /// One of "A".."D"; must index into `options`.
  pub answer: String,
  #[serde(default)]
  pub explanation: String,
}

impl Question {
  /// Index of the answer letter into `options`, if the letter is valid.
  pub fn answer_index(&self) -> Option<usize> {
    match self.answer.as_str() {
      "A" => Some(0),
      "B" => Some(1),
      "C" => Some(2),
      "D" => Some(3),
      _ => None,
    }
  }
}

/// Requested difficulty. Serialized lowercase on the wire.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
}

impl Difficulty {
  pub fn as_str(&self) -> &'static str {
    match self {
      Difficulty::Easy => "easy",
      Difficulty::Medium => "medium",
      Difficulty::Hard => "hard",
    }
  }
}

impl std::fmt::Display for Difficulty {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Why a generated question was discarded. Each variant is a distinct metrics
/// bucket; rejections are counted, never surfaced as errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RejectReason {
  BadStructure,
  EmptyOption,
  DuplicateOptions,
  UnresolvableAnswer,
  MetaContent,
  NoQuestionMark,
}

impl RejectReason {
  pub fn as_str(&self) -> &'static str {
    match self {
      RejectReason::BadStructure => "bad_structure",
      RejectReason::EmptyOption => "empty_option",
      RejectReason::DuplicateOptions => "duplicate_options",
      RejectReason::UnresolvableAnswer => "unresolvable_answer",
      RejectReason::MetaContent => "meta_content",
      RejectReason::NoQuestionMark => "no_question_mark",
    }
  }
}

/// Parameters for the content-provided generation path.
#[derive(Clone, Debug)]
pub struct ContentRequest {
  pub content: String,
  pub subject: String,
  pub topic: String,
  pub difficulty: Difficulty,
  pub total_questions: usize,
  pub user_id: String,
}

/// Parameters for the knowledge-base-assisted generation path.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
  pub subject: String,
  pub topic: String,
  pub difficulty: Difficulty,
  pub total_questions: usize,
  pub user_id: String,
}

/// Progress snapshot reported before each batch starts.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
  pub completed: usize,
  pub total: usize,
  pub batch_index: usize,
  pub total_batches: usize,
}

/// Persistence-oriented shape produced by bulk extraction.
#[derive(Clone, Debug, Serialize)]
pub struct BulkQuestion {
  pub question_text: String,
  pub options: Vec<String>,
  pub correct_answer: String,
  pub explanation: String,
}

impl From<Question> for BulkQuestion {
  fn from(q: Question) -> Self {
    BulkQuestion {
      question_text: q.question,
      options: q.options,
      correct_answer: q.answer,
      explanation: q.explanation,
    }
  }
}
