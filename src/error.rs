//! Error types for the generation pipeline.
//!
//! Request-level failures (bad input, open circuit, total exhaustion) surface
//! as `GenerateError`; per-attempt model failures travel as `ModelError`
//! inside the invocation layer and only escalate once retries and the
//! fallback model are exhausted.

use thiserror::Error;

/// Errors produced by a single model call (before retry handling).
#[derive(Debug, Error)]
pub enum ModelError {
  #[error("model rate-limited: {0}")]
  RateLimited(String),
  #[error("model HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("network error: {0}")]
  Network(String),
  #[error("malformed model output: {0}")]
  MalformedOutput(String),
}

impl ModelError {
  /// Rate limiting gets a longer backoff and sets the shared rate flag.
  pub fn is_rate_limited(&self) -> bool {
    matches!(self, ModelError::RateLimited(_))
  }
}

impl From<reqwest::Error> for ModelError {
  fn from(e: reqwest::Error) -> Self {
    ModelError::Network(e.to_string())
  }
}

/// Errors surfaced to callers of the generation facade.
#[derive(Debug, Error)]
pub enum GenerateError {
  /// Missing credential at construction; no request-time recovery.
  #[error("generation service is not configured (missing GEMINI_API_KEY)")]
  NotConfigured,
  #[error("invalid request: {0}")]
  InvalidRequest(String),
  /// Surfaced immediately with a retry-after hint; consumes no retry budget.
  #[error("generation temporarily unavailable, retry in {retry_in_secs}s")]
  CircuitOpen { retry_in_secs: u64 },
  #[error("generation rate-limited by the model provider: {0}")]
  RateLimited(String),
  #[error("network failure talking to the model provider: {0}")]
  Network(String),
  #[error("model generation failed: {0}")]
  Model(String),
  /// All batches and retries completed with zero valid questions.
  #[error("no valid questions were generated")]
  NoQuestions,
}

impl From<ModelError> for GenerateError {
  fn from(e: ModelError) -> Self {
    match e {
      ModelError::RateLimited(m) => GenerateError::RateLimited(m),
      ModelError::Network(m) => GenerateError::Network(m),
      ModelError::Http { status, message } => {
        GenerateError::Model(format!("HTTP {}: {}", status, message))
      }
      ModelError::MalformedOutput(m) => GenerateError::Model(m),
    }
  }
}

impl GenerateError {
  /// HTTP status used by the thin route handlers.
  pub fn status_code(&self) -> u16 {
    match self {
      GenerateError::InvalidRequest(_) => 400,
      GenerateError::RateLimited(_) => 429,
      GenerateError::CircuitOpen { .. } | GenerateError::NotConfigured => 503,
      GenerateError::Network(_) | GenerateError::Model(_) => 502,
      GenerateError::NoQuestions => 502,
    }
  }
}
