//! Loading service configuration (tunables + prompts + optional knowledge
//! bank) from TOML.
//!
//! See `AppConfig`, `GenerationConfig` and `Prompts` for the expected schema.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub generation: GenerationConfig,
  #[serde(default)]
  pub prompts: Prompts,
  /// Optional local knowledge bank (subject/topic-tagged reference text).
  #[serde(default)]
  pub knowledge: Vec<KnowledgeCfg>,
}

/// One knowledge-bank entry accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct KnowledgeCfg {
  pub subject: String,
  pub topic: String,
  pub content: String,
  #[serde(default = "default_source_type")]
  pub source_type: String,
  #[serde(default = "default_true")]
  pub active: bool,
}

fn default_source_type() -> String {
  "manual".into()
}
fn default_true() -> bool {
  true
}

/// Tunables for the generation pipeline. Every field has a sensible default
/// so an empty `[generation]` table (or no config file at all) works.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
  /// Questions requested per model call.
  pub batch_size: usize,
  /// Maximum concurrently in-flight batches.
  pub max_concurrency: usize,
  /// Extra attempts on the primary model after the first failure.
  pub max_retries: u32,
  /// Extra attempts on the fallback model after its first failure.
  pub fallback_retries: u32,
  /// Base backoff delay; attempt N sleeps base * 2^N.
  pub base_delay_ms: u64,
  /// Additional backoff multiplier applied to rate-limit errors.
  pub rate_limit_multiplier: u32,
  /// Pause between queue-drain iterations to smooth request rate.
  pub batch_pause_ms: u64,
  /// Consecutive failures before the circuit opens.
  pub circuit_threshold: u32,
  /// Seconds the circuit stays open after the last failure.
  pub circuit_cooldown_secs: u64,
  /// Per-request HTTP timeout towards the model endpoint.
  pub request_timeout_secs: u64,
  /// Enables the soft subject-relevance check and requires explanations.
  pub strict_validation: bool,
  pub cache_enabled: bool,
  pub cache_ttl_secs: u64,
  /// Minimum accepted length for caller-provided content.
  pub min_content_len: usize,
}

impl Default for GenerationConfig {
  fn default() -> Self {
    Self {
      batch_size: 10,
      max_concurrency: 3,
      max_retries: 2,
      fallback_retries: 1,
      base_delay_ms: 1000,
      rate_limit_multiplier: 3,
      batch_pause_ms: 250,
      circuit_threshold: 5,
      circuit_cooldown_secs: 60,
      request_timeout_secs: 45,
      strict_validation: false,
      cache_enabled: true,
      cache_ttl_secs: 3600,
      min_content_len: 50,
    }
  }
}

/// Prompts used by the model client. Defaults produce exam-style
/// multiple-choice questions; override in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub generation_system: String,
  pub generation_user_template: String,
  pub bulk_system: String,
  pub bulk_user_template: String,
  /// Stand-in content used when the knowledge base has nothing usable.
  pub fallback_content_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      generation_system: "You are an exam question generator for a tutoring platform. \
Respond ONLY with a strict JSON array of question objects, no prose, no markdown fences. \
Each object has: question (string ending in '?'), options (exactly 4 distinct strings), \
answer ('A'|'B'|'C'|'D'), explanation (string). \
Questions must be fully self-contained: NEVER refer to 'the text', 'the passage', \
'the source', instructions, or any study material. Test the knowledge itself. \
Write every mathematical expression in LaTeX wrapped in $...$ delimiters."
        .into(),
      generation_user_template: "Generate exactly {count} {difficulty} multiple-choice \
questions on {subject} ({topic}).\n\nSubject rules:\n{rules}\n\nBase the questions on the \
following reference content, but never mention or cite it:\n{content}"
        .into(),
      bulk_system: "You extract exam questions from raw text. Respond ONLY with a strict \
JSON array of question objects (question, options[4], answer 'A'-'D', explanation). \
Extract only well-formed multiple-choice questions; ignore instructions, headers, \
answer keys and any other non-question material. Rephrase references to source \
material so every question stands alone."
        .into(),
      bulk_user_template: "Extract all multiple-choice questions from this text:\n\n{text}".into(),
      fallback_content_template: "An overview of {topic} as studied in {subject} at \
secondary-school level: core definitions, standard methods, typical applications and \
common misconceptions students face when learning {topic}."
        .into(),
    }
  }
}

/// Attempt to load `AppConfig` from QUIZFORGE_CONFIG_PATH. On any parsing/IO
/// error, returns None and the defaults apply.
pub fn load_app_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("QUIZFORGE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AppConfig>(&s) {
      Ok(cfg) => {
        info!(target: "quizforge_backend", %path, knowledge_entries = cfg.knowledge.len(), "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quizforge_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quizforge_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_toml_yields_defaults() {
    let cfg: AppConfig = toml::from_str("").expect("parse");
    assert_eq!(cfg.generation.batch_size, 10);
    assert_eq!(cfg.generation.max_concurrency, 3);
    assert!(cfg.knowledge.is_empty());
    assert!(cfg.prompts.generation_system.contains("JSON"));
  }

  #[test]
  fn partial_generation_table_keeps_other_defaults() {
    let cfg: AppConfig = toml::from_str("[generation]\nbatch_size = 5\n").expect("parse");
    assert_eq!(cfg.generation.batch_size, 5);
    assert_eq!(cfg.generation.circuit_threshold, 5);
  }

  #[test]
  fn knowledge_entries_default_active() {
    let cfg: AppConfig = toml::from_str(
      "[[knowledge]]\nsubject = \"Biology\"\ntopic = \"cells\"\ncontent = \"Cells are the basic unit of life.\"\n",
    )
    .expect("parse");
    assert_eq!(cfg.knowledge.len(), 1);
    assert!(cfg.knowledge[0].active);
    assert_eq!(cfg.knowledge[0].source_type, "manual");
  }
}
