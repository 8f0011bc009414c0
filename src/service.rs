//! The generation facade: four entry points (content-provided, knowledge-base
//! assisted, single-shot fast, bulk parse) over one shared pipeline.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{GenerationConfig, Prompts};
use crate::domain::{BulkQuestion, ContentRequest, Difficulty, GenerateRequest, Question};
use crate::error::GenerateError;
use crate::gemini::ModelInvoker;
use crate::orchestrator::{self, BatchRun, ProgressFn};
use crate::stores::{cache_key, unix_now, KnowledgeBase, QuestionCache, UsageLog, UsageRecord};
use crate::subjects::{normalize_subject, normalize_topic};
use crate::util::fill_template;
use crate::validator::content_is_meta;

const MAX_QUESTIONS_PER_REQUEST: usize = 100;

pub struct QuestionService {
  invoker: Option<Arc<ModelInvoker>>,
  cfg: GenerationConfig,
  prompts: Prompts,
  knowledge: Arc<dyn KnowledgeBase>,
  usage: Arc<dyn UsageLog>,
  cache: Arc<dyn QuestionCache>,
}

impl QuestionService {
  pub fn new(
    invoker: Option<Arc<ModelInvoker>>,
    cfg: GenerationConfig,
    prompts: Prompts,
    knowledge: Arc<dyn KnowledgeBase>,
    usage: Arc<dyn UsageLog>,
    cache: Arc<dyn QuestionCache>,
  ) -> Self {
    Self { invoker, cfg, prompts, knowledge, usage, cache }
  }

  fn invoker(&self) -> Result<&Arc<ModelInvoker>, GenerateError> {
    self.invoker.as_ref().ok_or(GenerateError::NotConfigured)
  }

  /// Generate questions from caller-supplied reference content.
  #[instrument(level = "info", skip_all, fields(subject = %req.subject, total = req.total_questions))]
  pub async fn generate_from_content(
    &self,
    req: ContentRequest,
    on_progress: Option<ProgressFn>,
  ) -> Result<Vec<Question>, GenerateError> {
    let invoker = self.invoker()?;
    invoker.breaker().check()?;
    check_total(req.total_questions)?;

    let subject = normalize_subject(&req.subject)
      .ok_or_else(|| GenerateError::InvalidRequest("subject is required".into()))?;
    let topic = normalize_topic(&req.topic)
      .ok_or_else(|| GenerateError::InvalidRequest("topic is required".into()))?;
    let content = req.content.trim().to_string();
    if content.len() < self.cfg.min_content_len {
      return Err(GenerateError::InvalidRequest(format!(
        "content must be at least {} characters",
        self.cfg.min_content_len
      )));
    }

    self
      .run_pipeline(
        content,
        subject,
        topic,
        req.difficulty,
        req.total_questions,
        req.user_id,
        "generate_from_content",
        on_progress,
      )
      .await
  }

  /// Generate questions with content resolved from the knowledge base, or a
  /// synthesized stand-in when nothing usable is stored.
  #[instrument(level = "info", skip_all, fields(subject = %req.subject, topic = %req.topic, total = req.total_questions))]
  pub async fn generate(
    &self,
    req: GenerateRequest,
    on_progress: Option<ProgressFn>,
  ) -> Result<Vec<Question>, GenerateError> {
    let invoker = self.invoker()?;
    invoker.breaker().check()?;
    check_total(req.total_questions)?;

    let subject = normalize_subject(&req.subject)
      .ok_or_else(|| GenerateError::InvalidRequest("subject is required".into()))?;
    let topic = normalize_topic(&req.topic)
      .ok_or_else(|| GenerateError::InvalidRequest("topic is required".into()))?;

    let content = self.resolve_content(&subject, &topic).await;
    self
      .run_pipeline(
        content,
        subject,
        topic,
        req.difficulty,
        req.total_questions,
        req.user_id,
        "generate",
        on_progress,
      )
      .await
  }

  /// Single-shot path: one model call for the full count, no batching and no
  /// progress reporting.
  #[instrument(level = "info", skip_all, fields(subject = %req.subject, total = req.total_questions))]
  pub async fn generate_fast(&self, req: GenerateRequest) -> Result<Vec<Question>, GenerateError> {
    let invoker = self.invoker()?.clone();
    check_total(req.total_questions)?;

    let subject = normalize_subject(&req.subject)
      .ok_or_else(|| GenerateError::InvalidRequest("subject is required".into()))?;
    let topic = normalize_topic(&req.topic)
      .ok_or_else(|| GenerateError::InvalidRequest("topic is required".into()))?;
    let content = self.resolve_content(&subject, &topic).await;

    let request_id = Uuid::new_v4().to_string();
    let run = BatchRun {
      subject: subject.clone(),
      topic,
      content,
      difficulty: req.difficulty,
      total: req.total_questions,
      user_id: req.user_id.clone(),
      request_id: request_id.clone(),
      operation: "generate_fast",
      on_progress: None,
    };
    let prompt = orchestrator::build_prompt(&self.prompts, &run, req.total_questions);

    let outcome = invoker.invoke(&prompt, req.total_questions).await;
    match outcome {
      Ok(batch) => {
        let (valid, tally) =
          orchestrator::sift_questions(batch.questions, &subject, self.cfg.strict_validation);
        let mut questions = dedup_by_text(valid);
        questions.truncate(req.total_questions);
        self
          .log_usage(
            &req.user_id,
            &request_id,
            "generate_fast",
            "success",
            batch.input_tokens,
            batch.output_tokens,
            Some(questions.len() as u32),
            Some(tally.total()),
            None,
            &batch.model,
          )
          .await;
        if questions.is_empty() {
          return Err(GenerateError::NoQuestions);
        }
        Ok(questions)
      }
      Err(e) => {
        self
          .log_usage(
            &req.user_id,
            &request_id,
            "generate_fast",
            "failed",
            None,
            None,
            None,
            None,
            Some(e.to_string()),
            "",
          )
          .await;
        Err(e)
      }
    }
  }

  /// Extract structured questions from pasted exam text. The extraction
  /// prompt asks the model to rephrase source references away, so the full
  /// clean + validate pipeline applies to the output.
  #[instrument(level = "info", skip_all, fields(text_len = text.len()))]
  pub async fn parse_bulk(&self, text: &str) -> Result<Vec<BulkQuestion>, GenerateError> {
    let invoker = self.invoker()?.clone();
    let trimmed = text.trim();
    if trimmed.is_empty() {
      return Err(GenerateError::InvalidRequest("text is required".into()));
    }

    let prompt = format!(
      "{}\n\n{}",
      self.prompts.bulk_system,
      fill_template(&self.prompts.bulk_user_template, &[("text", trimmed)])
    );
    let request_id = Uuid::new_v4().to_string();

    let batch = match invoker.invoke(&prompt, 0).await {
      Ok(batch) => batch,
      Err(e) => {
        self
          .log_usage("", &request_id, "parse_bulk", "failed", None, None, None, None, Some(e.to_string()), "")
          .await;
        return Err(e);
      }
    };

    let (valid, tally) = orchestrator::sift_questions(batch.questions, "", false);
    let parsed: Vec<BulkQuestion> = valid.into_iter().map(BulkQuestion::from).collect();

    self
      .log_usage(
        "",
        &request_id,
        "parse_bulk",
        "success",
        batch.input_tokens,
        batch.output_tokens,
        Some(parsed.len() as u32),
        Some(tally.total()),
        None,
        &batch.model,
      )
      .await;

    if parsed.is_empty() {
      return Err(GenerateError::NoQuestions);
    }
    Ok(parsed)
  }

  /// Shared batched path with read-through caching.
  #[allow(clippy::too_many_arguments)]
  async fn run_pipeline(
    &self,
    content: String,
    subject: String,
    topic: String,
    difficulty: Difficulty,
    total: usize,
    user_id: String,
    operation: &'static str,
    on_progress: Option<ProgressFn>,
  ) -> Result<Vec<Question>, GenerateError> {
    let key = cache_key(&content, &subject, &topic, difficulty, total);
    if self.cfg.cache_enabled {
      if let Some(hit) = self.cache.get(&key).await {
        info!(target: "generation", subject = %subject, total, "cache hit");
        return Ok(hit);
      }
    }

    let invoker = self.invoker()?.clone();
    let request_id = Uuid::new_v4().to_string();
    let questions = orchestrator::run_batches(
      invoker,
      &self.cfg,
      &self.prompts,
      self.usage.clone(),
      BatchRun {
        subject,
        topic,
        content,
        difficulty,
        total,
        user_id,
        request_id,
        operation,
        on_progress,
      },
    )
    .await?;

    if self.cfg.cache_enabled {
      self
        .cache
        .put(&key, questions.clone(), Duration::from_secs(self.cfg.cache_ttl_secs))
        .await;
    }
    Ok(questions)
  }

  /// Knowledge-base lookup with the synthesized fallback. Stored content that
  /// reads like instructions rather than study material is skipped.
  async fn resolve_content(&self, subject: &str, topic: &str) -> String {
    if let Some(entry) = self.knowledge.search(subject, topic).await {
      if content_is_meta(&entry.content) {
        warn!(target: "generation", subject, topic, "stored content looks meta; using synthesized fallback");
      } else {
        info!(target: "generation", subject, topic, source = %entry.source_type, "using knowledge base content");
        return entry.content;
      }
    } else {
      warn!(target: "generation", subject, topic, "no knowledge base content; using synthesized fallback");
    }
    fill_template(
      &self.prompts.fallback_content_template,
      &[("topic", topic), ("subject", subject)],
    )
  }

  #[allow(clippy::too_many_arguments)]
  async fn log_usage(
    &self,
    user_id: &str,
    request_id: &str,
    operation: &str,
    status: &str,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    valid: Option<u32>,
    rejected: Option<u32>,
    error_message: Option<String>,
    model: &str,
  ) {
    let record = UsageRecord {
      user_id: user_id.into(),
      request_id: request_id.into(),
      operation: operation.into(),
      status: status.into(),
      input_tokens,
      output_tokens,
      valid_questions: valid,
      rejected_questions: rejected,
      error_message,
      service: "question_generation".into(),
      model: model.into(),
      created_at: unix_now(),
    };
    if let Err(e) = self.usage.record(record).await {
      warn!(target: "generation", error = %e, "usage logging failed (ignored)");
    }
  }
}

fn check_total(total: usize) -> Result<(), GenerateError> {
  if total == 0 || total > MAX_QUESTIONS_PER_REQUEST {
    return Err(GenerateError::InvalidRequest(format!(
      "totalQuestions must be between 1 and {MAX_QUESTIONS_PER_REQUEST}"
    )));
  }
  Ok(())
}

fn dedup_by_text(questions: Vec<Question>) -> Vec<Question> {
  let mut seen = std::collections::HashSet::new();
  questions.into_iter().filter(|q| seen.insert(q.question.clone())).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  use crate::breaker::CircuitBreaker;
  use crate::config::KnowledgeCfg;
  use crate::error::ModelError;
  use crate::gemini::{ModelBatch, QuestionModel};
  use crate::stores::{MemoryCache, MemoryKnowledgeBase, MemoryUsageLog, NoopCache, NoopKnowledgeBase};

  fn sample_question(n: usize) -> Question {
    Question {
      question: format!("What is the product of {n} and 2?"),
      options: vec![
        format!("{}", 2 * n),
        format!("{}", 2 * n + 1),
        format!("{}", 2 * n + 2),
        format!("{}", 2 * n + 3),
      ],
      answer: "A".into(),
      explanation: format!("{n} times 2 is {}.", 2 * n),
    }
  }

  /// Serves unique questions, remembers the last prompt, counts calls.
  struct RecordingModel {
    next: AtomicUsize,
    calls: AtomicUsize,
    last_prompt: Mutex<String>,
  }

  impl RecordingModel {
    fn new() -> Arc<Self> {
      Arc::new(Self {
        next: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
        last_prompt: Mutex::new(String::new()),
      })
    }
  }

  #[async_trait]
  impl QuestionModel for RecordingModel {
    async fn generate(&self, prompt: &str, expected: usize) -> Result<ModelBatch, ModelError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      *self.last_prompt.lock().unwrap() = prompt.to_string();
      let start = self.next.fetch_add(expected, Ordering::SeqCst);
      Ok(ModelBatch {
        questions: (start..start + expected).map(sample_question).collect(),
        input_tokens: Some(5),
        output_tokens: Some(9),
        model: "recording".into(),
      })
    }
    fn name(&self) -> &str {
      "recording"
    }
  }

  struct QuotaModel {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl QuestionModel for QuotaModel {
    async fn generate(&self, _prompt: &str, _expected: usize) -> Result<ModelBatch, ModelError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Err(ModelError::RateLimited("quota exceeded for model".into()))
    }
    fn name(&self) -> &str {
      "quota"
    }
  }

  fn fast_cfg() -> GenerationConfig {
    GenerationConfig {
      batch_size: 10,
      max_concurrency: 2,
      max_retries: 1,
      fallback_retries: 0,
      base_delay_ms: 1,
      rate_limit_multiplier: 1,
      batch_pause_ms: 0,
      min_content_len: 20,
      cache_enabled: false,
      ..GenerationConfig::default()
    }
  }

  struct Harness {
    service: QuestionService,
    usage: Arc<MemoryUsageLog>,
    breaker: Arc<CircuitBreaker>,
  }

  fn harness(model: Arc<dyn QuestionModel>, cfg: GenerationConfig, knowledge: Arc<dyn KnowledgeBase>) -> Harness {
    let breaker = Arc::new(CircuitBreaker::new(100, Duration::from_secs(60)));
    let invoker = Arc::new(ModelInvoker::new(
      model,
      None,
      breaker.clone(),
      cfg.max_retries,
      cfg.fallback_retries,
      Duration::from_millis(cfg.base_delay_ms),
      cfg.rate_limit_multiplier,
    ));
    let usage = Arc::new(MemoryUsageLog::new());
    let cache: Arc<dyn QuestionCache> = if cfg.cache_enabled {
      Arc::new(MemoryCache::new())
    } else {
      Arc::new(NoopCache)
    };
    let service = QuestionService::new(
      Some(invoker),
      cfg,
      Prompts::default(),
      knowledge,
      usage.clone(),
      cache,
    );
    Harness { service, usage, breaker }
  }

  fn content_request(total: usize) -> ContentRequest {
    ContentRequest {
      content: "Multiplication is repeated addition of the same number.".into(),
      subject: "Mathematics".into(),
      topic: "multiplication".into(),
      difficulty: Difficulty::Easy,
      total_questions: total,
      user_id: "u1".into(),
    }
  }

  #[tokio::test]
  async fn content_request_yields_questions_and_usage_record() {
    let model = RecordingModel::new();
    let h = harness(model.clone(), fast_cfg(), Arc::new(NoopKnowledgeBase));

    let questions = h.service.generate_from_content(content_request(5), None).await.expect("questions");

    assert_eq!(questions.len(), 5);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1, "5/10 is a single batch");
    assert_eq!(h.usage.len().await, 1);
    let record = h.usage.recent(1).await.pop().expect("record");
    assert_eq!(record.status, "success");
    assert_eq!(record.valid_questions, Some(5));
    assert_eq!(h.breaker.failure_count(), 0);
  }

  #[tokio::test]
  async fn short_content_is_rejected_before_any_model_call() {
    let model = RecordingModel::new();
    let h = harness(model.clone(), fast_cfg(), Arc::new(NoopKnowledgeBase));

    let mut req = content_request(5);
    req.content = "too short".into();
    let err = h.service.generate_from_content(req, None).await.expect_err("rejected");

    assert!(matches!(err, GenerateError::InvalidRequest(_)));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn zero_total_is_rejected() {
    let h = harness(RecordingModel::new(), fast_cfg(), Arc::new(NoopKnowledgeBase));
    let err = h.service.generate_from_content(content_request(0), None).await.expect_err("rejected");
    assert!(matches!(err, GenerateError::InvalidRequest(_)));
  }

  #[tokio::test]
  async fn unconfigured_service_reports_not_configured() {
    let service = QuestionService::new(
      None,
      fast_cfg(),
      Prompts::default(),
      Arc::new(NoopKnowledgeBase),
      Arc::new(MemoryUsageLog::new()),
      Arc::new(NoopCache),
    );
    let err = service.generate_from_content(content_request(5), None).await.expect_err("unconfigured");
    assert!(matches!(err, GenerateError::NotConfigured));
  }

  #[tokio::test]
  async fn generate_prefers_knowledge_base_content() {
    let model = RecordingModel::new();
    let kb = MemoryKnowledgeBase::new(vec![KnowledgeCfg {
      subject: "Biology".into(),
      topic: "photosynthesis".into(),
      content: "Photosynthesis converts light energy into chemical energy in chloroplasts.".into(),
      source_type: "manual".into(),
      active: true,
    }]);
    let h = harness(model.clone(), fast_cfg(), Arc::new(kb));

    let req = GenerateRequest {
      subject: "Biology".into(),
      topic: "Photosynthesis".into(),
      difficulty: Difficulty::Medium,
      total_questions: 3,
      user_id: "u1".into(),
    };
    h.service.generate(req, None).await.expect("questions");

    let prompt = model.last_prompt.lock().unwrap().clone();
    assert!(prompt.contains("chloroplasts"), "knowledge content flows into the prompt");
  }

  #[tokio::test]
  async fn generate_without_knowledge_synthesizes_fallback_content() {
    let model = RecordingModel::new();
    let h = harness(model.clone(), fast_cfg(), Arc::new(NoopKnowledgeBase));

    let req = GenerateRequest {
      subject: "Economics".into(),
      topic: "inflation".into(),
      difficulty: Difficulty::Hard,
      total_questions: 2,
      user_id: "u1".into(),
    };
    h.service.generate(req, None).await.expect("questions");

    let prompt = model.last_prompt.lock().unwrap().clone();
    assert!(prompt.contains("inflation"));
    assert!(prompt.contains("Economics"));
  }

  #[tokio::test]
  async fn misspelled_subject_is_normalized_before_prompting() {
    let model = RecordingModel::new();
    let h = harness(model.clone(), fast_cfg(), Arc::new(NoopKnowledgeBase));

    let mut req = content_request(2);
    req.subject = "Mathemetics".into();
    h.service.generate_from_content(req, None).await.expect("questions");

    let prompt = model.last_prompt.lock().unwrap().clone();
    assert!(prompt.contains("Mathematics"));
  }

  #[tokio::test]
  async fn cache_serves_repeat_requests_without_model_calls() {
    let model = RecordingModel::new();
    let cfg = GenerationConfig { cache_enabled: true, cache_ttl_secs: 60, ..fast_cfg() };
    let h = harness(model.clone(), cfg, Arc::new(NoopKnowledgeBase));

    let first = h.service.generate_from_content(content_request(3), None).await.expect("first");
    let second = h.service.generate_from_content(content_request(3), None).await.expect("second");

    assert_eq!(first, second);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1, "second request is a cache hit");
    assert_eq!(h.usage.len().await, 1, "cache hits do not log usage");
  }

  #[tokio::test]
  async fn quota_exhaustion_propagates_as_rate_limited() {
    let model = Arc::new(QuotaModel { calls: AtomicUsize::new(0) });
    let h = harness(model.clone(), fast_cfg(), Arc::new(NoopKnowledgeBase));

    let req = GenerateRequest {
      subject: "Physics".into(),
      topic: "motion".into(),
      difficulty: Difficulty::Easy,
      total_questions: 5,
      user_id: "u1".into(),
    };
    let err = h.service.generate_fast(req).await.expect_err("quota error");

    assert!(matches!(err, GenerateError::RateLimited(_)));
    // max_retries = 1: first attempt plus one retry, each recorded.
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.breaker.failure_count(), 2);
    let record = h.usage.recent(1).await.pop().expect("failure record");
    assert_eq!(record.status, "failed");
  }

  #[tokio::test]
  async fn content_request_fails_after_quota_exhaustion() {
    let model = Arc::new(QuotaModel { calls: AtomicUsize::new(0) });
    let h = harness(model.clone(), fast_cfg(), Arc::new(NoopKnowledgeBase));

    let err = h.service.generate_from_content(content_request(5), None).await.expect_err("fails");

    // One batch, max_retries = 1: two attempts, both recorded; the batch
    // failure is contained so the request fails on the empty merge.
    assert!(matches!(err, GenerateError::NoQuestions));
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.breaker.failure_count(), 2);
  }

  #[tokio::test]
  async fn parse_bulk_maps_questions_and_drops_broken_ones() {
    struct BulkModel;
    #[async_trait]
    impl QuestionModel for BulkModel {
      async fn generate(&self, _prompt: &str, _expected: usize) -> Result<ModelBatch, ModelError> {
        let good = sample_question(1);
        let broken = Question {
          question: "Which option is correct?".into(),
          options: vec!["only".into(), "three".into(), "options".into()],
          answer: "A".into(),
          explanation: String::new(),
        };
        Ok(ModelBatch {
          questions: vec![good, broken],
          input_tokens: Some(3),
          output_tokens: Some(6),
          model: "bulk".into(),
        })
      }
      fn name(&self) -> &str {
        "bulk"
      }
    }

    let h = harness(Arc::new(BulkModel), fast_cfg(), Arc::new(NoopKnowledgeBase));
    let parsed = h.service.parse_bulk("1. What is 2 x 1? A) 2 B) 3 C) 4 D) 5 Answer: A").await.expect("parsed");

    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].correct_answer, "A");
    assert!(parsed[0].question_text.contains("product"));
  }

  #[tokio::test]
  async fn empty_bulk_text_is_rejected() {
    let h = harness(RecordingModel::new(), fast_cfg(), Arc::new(NoopKnowledgeBase));
    let err = h.service.parse_bulk("   ").await.expect_err("rejected");
    assert!(matches!(err, GenerateError::InvalidRequest(_)));
  }
}
