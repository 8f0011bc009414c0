//! Model invocation layer: a minimal Gemini REST client plus the retrying
//! two-tier invoker.
//!
//! We only call `generateContent` with a strict JSON response schema. Calls
//! are instrumented and log model names, latencies, and token counts (not
//! question contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::breaker::CircuitBreaker;
use crate::domain::Question;
use crate::error::{GenerateError, ModelError};

/// One successful model call: the raw questions plus token accounting.
#[derive(Clone, Debug)]
pub struct ModelBatch {
  pub questions: Vec<Question>,
  pub input_tokens: Option<u32>,
  pub output_tokens: Option<u32>,
  pub model: String,
}

/// The seam the orchestrator talks through; tests provide mocks here.
#[async_trait]
pub trait QuestionModel: Send + Sync {
  async fn generate(&self, prompt: &str, expected: usize) -> Result<ModelBatch, ModelError>;
  fn name(&self) -> &str;
}

#[derive(Clone)]
pub struct GeminiModel {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
}

impl GeminiModel {
  /// Construct the primary/fallback pair if GEMINI_API_KEY is present;
  /// otherwise return None and the service runs unconfigured.
  pub fn pair_from_env(timeout: Duration) -> Option<(GeminiModel, GeminiModel)> {
    let api_key = std::env::var("GEMINI_API_KEY").ok()?;
    let base_url = std::env::var("GEMINI_BASE_URL")
      .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into());
    let primary =
      std::env::var("GEMINI_PRIMARY_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".into());
    let fallback =
      std::env::var("GEMINI_FALLBACK_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".into());

    let client = reqwest::Client::builder().timeout(timeout).build().ok()?;

    let make = |model: String| GeminiModel {
      client: client.clone(),
      api_key: api_key.clone(),
      base_url: base_url.clone(),
      model,
    };
    Some((make(primary), make(fallback)))
  }

  /// Strict output schema: an array of question objects. Sent with every
  /// request so the model cannot drift into prose.
  fn response_schema() -> serde_json::Value {
    json!({
      "type": "ARRAY",
      "items": {
        "type": "OBJECT",
        "properties": {
          "question": { "type": "STRING" },
          "options": { "type": "ARRAY", "items": { "type": "STRING" }, "minItems": 4, "maxItems": 4 },
          "answer": { "type": "STRING", "enum": ["A", "B", "C", "D"] },
          "explanation": { "type": "STRING" }
        },
        "required": ["question", "options", "answer"]
      }
    })
  }

  /// Block only high-severity harmful content: academic material (biology,
  /// history, chemistry) trips over-eager filters at lower thresholds.
  fn safety_settings() -> serde_json::Value {
    json!([
      { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_ONLY_HIGH" },
      { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_ONLY_HIGH" },
      { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_ONLY_HIGH" },
      { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_ONLY_HIGH" }
    ])
  }
}

#[async_trait]
impl QuestionModel for GeminiModel {
  #[instrument(level = "info", skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len(), expected))]
  async fn generate(&self, prompt: &str, expected: usize) -> Result<ModelBatch, ModelError> {
    let url = format!(
      "{}/models/{}:generateContent?key={}",
      self.base_url, self.model, self.api_key
    );
    let req = GenerateContentRequest {
      contents: vec![Content {
        role: "user".into(),
        parts: vec![Part { text: prompt.to_string() }],
      }],
      generation_config: GenerationConfigDto {
        // Moderate temperature: reproducibility/quality balance.
        temperature: 0.5,
        response_mime_type: "application/json".into(),
        response_schema: Self::response_schema(),
      },
      safety_settings: Self::safety_settings(),
    };

    let start = std::time::Instant::now();
    let res = self
      .client
      .post(&url)
      .header(reqwest::header::CONTENT_TYPE, "application/json")
      .header(reqwest::header::USER_AGENT, "quizforge-backend/0.1")
      .json(&req)
      .send()
      .await?;

    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let message = extract_gemini_error(&body).unwrap_or(body);
      if status.as_u16() == 429 || is_quota_message(&message) {
        return Err(ModelError::RateLimited(message));
      }
      return Err(ModelError::Http { status: status.as_u16(), message });
    }

    let body: GenerateContentResponse = res.json().await?;
    let text = body
      .candidates
      .first()
      .and_then(|c| c.content.parts.first())
      .map(|p| p.text.clone())
      .ok_or_else(|| ModelError::MalformedOutput("response has no candidate text".into()))?;

    let questions: Vec<Question> = serde_json::from_str(strip_markdown_fences(&text))
      .map_err(|e| ModelError::MalformedOutput(format!("JSON parse error: {e}")))?;

    let (input_tokens, output_tokens) = match &body.usage_metadata {
      Some(u) => (u.prompt_token_count, u.candidates_token_count),
      None => (Some(estimate_tokens(prompt)), Some(estimate_tokens(&text))),
    };
    info!(
      target: "generation",
      model = %self.model,
      elapsed_ms = start.elapsed().as_millis() as u64,
      returned = questions.len(),
      expected,
      ?input_tokens,
      ?output_tokens,
      "model call succeeded"
    );
    Ok(ModelBatch {
      questions,
      input_tokens,
      output_tokens,
      model: self.model.clone(),
    })
  }

  fn name(&self) -> &str {
    &self.model
  }
}

/// Rough token estimate used when the endpoint omits usage metadata.
pub fn estimate_tokens(text: &str) -> u32 {
  (text.len() / 4) as u32
}

fn is_quota_message(message: &str) -> bool {
  let lower = message.to_lowercase();
  lower.contains("quota") || lower.contains("resource_exhausted") || lower.contains("rate limit")
}

/// Models occasionally wrap JSON in ```json fences despite the mime type.
fn strip_markdown_fences(content: &str) -> &str {
  let trimmed = content.trim();
  let Some(without_open) = trimmed.strip_prefix("```") else {
    return trimmed;
  };
  let after_header = match without_open.find('\n') {
    Some(idx) => &without_open[idx + 1..],
    None => without_open,
  };
  match after_header.rfind("```") {
    Some(end) => after_header[..end].trim(),
    None => after_header.trim(),
  }
}

/// Wraps primary + fallback models with retry/backoff and circuit-breaker
/// accounting. Every attempt outcome is recorded on the shared breaker.
pub struct ModelInvoker {
  primary: Arc<dyn QuestionModel>,
  fallback: Option<Arc<dyn QuestionModel>>,
  breaker: Arc<CircuitBreaker>,
  max_retries: u32,
  fallback_retries: u32,
  base_delay: Duration,
  rate_limit_multiplier: u32,
}

impl ModelInvoker {
  pub fn new(
    primary: Arc<dyn QuestionModel>,
    fallback: Option<Arc<dyn QuestionModel>>,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    fallback_retries: u32,
    base_delay: Duration,
    rate_limit_multiplier: u32,
  ) -> Self {
    Self {
      primary,
      fallback,
      breaker,
      max_retries,
      fallback_retries,
      base_delay,
      rate_limit_multiplier,
    }
  }

  pub fn breaker(&self) -> &Arc<CircuitBreaker> {
    &self.breaker
  }

  /// One logical invocation: circuit gate, primary with retries, then the
  /// fallback model with its own budget. If the fallback also fails, the
  /// original primary error propagates (it is the more representative one).
  pub async fn invoke(&self, prompt: &str, expected: usize) -> Result<ModelBatch, GenerateError> {
    self.breaker.check()?;

    let primary_err = match self.try_model(&self.primary, self.max_retries, prompt, expected).await
    {
      Ok(batch) => return Ok(batch),
      Err(e) => e,
    };

    if let Some(fallback) = &self.fallback {
      warn!(
        target: "generation",
        primary = %self.primary.name(),
        fallback = %fallback.name(),
        error = %primary_err,
        "primary model exhausted; trying fallback"
      );
      if let Ok(batch) = self.try_model(fallback, self.fallback_retries, prompt, expected).await {
        return Ok(batch);
      }
    }

    Err(primary_err.into())
  }

  async fn try_model(
    &self,
    model: &Arc<dyn QuestionModel>,
    retries: u32,
    prompt: &str,
    expected: usize,
  ) -> Result<ModelBatch, ModelError> {
    let mut last_err: Option<ModelError> = None;
    for attempt in 0..=retries {
      match model.generate(prompt, expected).await {
        Ok(batch) => {
          self.breaker.record_success();
          return Ok(batch);
        }
        Err(e) => {
          self.breaker.record_failure();
          let rate_limited = e.is_rate_limited();
          if rate_limited {
            self.breaker.mark_rate_limited();
          }
          error!(
            target: "generation",
            model = %model.name(),
            attempt,
            retries,
            error = %e,
            "model attempt failed"
          );
          last_err = Some(e);
          if attempt < retries {
            let mut delay = self.base_delay * 2u32.saturating_pow(attempt);
            if rate_limited {
              delay *= self.rate_limit_multiplier.max(1);
            }
            tokio::time::sleep(delay).await;
          }
        }
      }
    }
    Err(last_err.unwrap_or_else(|| ModelError::Network("no attempts were made".into())))
  }
}

// --- Gemini wire DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
  contents: Vec<Content>,
  generation_config: GenerationConfigDto,
  safety_settings: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct Content {
  #[serde(default)]
  role: String,
  parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
  text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfigDto {
  temperature: f32,
  response_mime_type: String,
  response_schema: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
  #[serde(default)]
  usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
  content: Content,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)]
  prompt_token_count: Option<u32>,
  #[serde(default)]
  candidates_token_count: Option<u32>,
}

/// Try to extract a clean error message from a Gemini error body.
fn extract_gemini_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap {
    error: EObj,
  }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
    #[serde(default)]
    status: Option<String>,
  }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => match w.error.status {
      Some(status) => Some(format!("{} ({})", w.error.message, status)),
      None => Some(w.error.message),
    },
    Err(_) => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn sample_question() -> Question {
    Question {
      question: "What is the capital of France?".into(),
      options: vec!["Paris".into(), "Lyon".into(), "Nice".into(), "Lille".into()],
      answer: "A".into(),
      explanation: "Paris is the capital.".into(),
    }
  }

  struct FixedModel {
    calls: AtomicU32,
  }

  #[async_trait]
  impl QuestionModel for FixedModel {
    async fn generate(&self, _prompt: &str, expected: usize) -> Result<ModelBatch, ModelError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(ModelBatch {
        questions: vec![sample_question(); expected],
        input_tokens: Some(100),
        output_tokens: Some(200),
        model: "fixed".into(),
      })
    }
    fn name(&self) -> &str {
      "fixed"
    }
  }

  struct QuotaModel {
    calls: AtomicU32,
  }

  #[async_trait]
  impl QuestionModel for QuotaModel {
    async fn generate(&self, _prompt: &str, _expected: usize) -> Result<ModelBatch, ModelError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Err(ModelError::RateLimited("quota exceeded".into()))
    }
    fn name(&self) -> &str {
      "quota"
    }
  }

  fn invoker(
    primary: Arc<dyn QuestionModel>,
    fallback: Option<Arc<dyn QuestionModel>>,
    breaker: Arc<CircuitBreaker>,
  ) -> ModelInvoker {
    ModelInvoker::new(primary, fallback, breaker, 2, 1, Duration::from_millis(1), 2)
  }

  #[tokio::test]
  async fn success_records_no_failures() {
    let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(60)));
    let primary = Arc::new(FixedModel { calls: AtomicU32::new(0) });
    let inv = invoker(primary.clone(), None, breaker.clone());

    let batch = inv.invoke("prompt", 3).await.expect("batch");
    assert_eq!(batch.questions.len(), 3);
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.failure_count(), 0);
  }

  #[tokio::test]
  async fn exhausted_retries_fall_back_then_propagate_primary_error() {
    let breaker = Arc::new(CircuitBreaker::new(100, Duration::from_secs(60)));
    let primary = Arc::new(QuotaModel { calls: AtomicU32::new(0) });
    let fallback = Arc::new(QuotaModel { calls: AtomicU32::new(0) });
    let inv = invoker(primary.clone(), Some(fallback.clone()), breaker.clone());

    let err = inv.invoke("prompt", 3).await.expect_err("should fail");
    assert!(matches!(err, GenerateError::RateLimited(_)), "{err:?}");

    // max_retries=2 -> 3 primary attempts; fallback_retries=1 -> 2 more.
    assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 2);
    assert_eq!(breaker.failure_count(), 5, "every attempt is recorded");
    assert!(breaker.take_rate_limited());
  }

  #[tokio::test]
  async fn fallback_success_hides_primary_failure() {
    let breaker = Arc::new(CircuitBreaker::new(100, Duration::from_secs(60)));
    let primary = Arc::new(QuotaModel { calls: AtomicU32::new(0) });
    let fallback = Arc::new(FixedModel { calls: AtomicU32::new(0) });
    let inv = invoker(primary, Some(fallback), breaker.clone());

    let batch = inv.invoke("prompt", 2).await.expect("fallback batch");
    assert_eq!(batch.questions.len(), 2);
    // Fallback success zeroes the count recorded by primary failures.
    assert_eq!(breaker.failure_count(), 0);
  }

  #[tokio::test]
  async fn open_circuit_fails_fast_without_calling_models() {
    let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
    breaker.record_failure();
    let primary = Arc::new(FixedModel { calls: AtomicU32::new(0) });
    let inv = invoker(primary.clone(), None, breaker);

    let err = inv.invoke("prompt", 1).await.expect_err("circuit open");
    assert!(matches!(err, GenerateError::CircuitOpen { .. }));
    assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn fence_stripping_handles_plain_and_fenced_json() {
    assert_eq!(strip_markdown_fences("[1,2]"), "[1,2]");
    assert_eq!(strip_markdown_fences("```json\n[1,2]\n```"), "[1,2]");
  }

  #[test]
  fn quota_messages_are_detected() {
    assert!(is_quota_message("Quota exceeded for requests"));
    assert!(is_quota_message("RESOURCE_EXHAUSTED"));
    assert!(!is_quota_message("internal error"));
  }
}
