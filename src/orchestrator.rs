//! Batch orchestration: partitioning, bounded concurrency, progress
//! reporting, per-batch usage logging, and result merging.
//!
//! Batches are independent units of work: each one builds its own prompt,
//! calls the model (with the invoker's retry/fallback budget), and cleans +
//! validates every returned question. A failed batch contributes an empty
//! result and the rest continue; only a fully empty merged result fails the
//! request.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::cleaner::clean;
use crate::config::{GenerationConfig, Prompts};
use crate::domain::{Difficulty, Progress, Question};
use crate::error::GenerateError;
use crate::gemini::ModelInvoker;
use crate::stores::{unix_now, UsageLog, UsageRecord};
use crate::subjects::rules_for;
use crate::util::fill_template;
use crate::validator::{validate, RejectionTally};

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Everything one orchestrated generation run needs.
pub struct BatchRun {
  pub subject: String,
  pub topic: String,
  pub content: String,
  pub difficulty: Difficulty,
  pub total: usize,
  pub user_id: String,
  pub request_id: String,
  pub operation: &'static str,
  pub on_progress: Option<ProgressFn>,
}

/// Split a total into batch sizes: ceil(total/batch_size) batches, the last
/// one holding the remainder.
pub fn partition(total: usize, batch_size: usize) -> Vec<usize> {
  let batch_size = batch_size.max(1);
  let mut sizes = Vec::with_capacity(total.div_ceil(batch_size));
  let mut remaining = total;
  while remaining > 0 {
    let take = remaining.min(batch_size);
    sizes.push(take);
    remaining -= take;
  }
  sizes
}

/// Run the batched pipeline to completion. Merged results keep batch
/// completion order; duplicates (by exact question text) keep the first
/// occurrence; the final list is truncated to the requested total.
#[instrument(level = "info", skip_all, fields(request_id = %run.request_id, subject = %run.subject, total = run.total))]
pub async fn run_batches(
  invoker: Arc<ModelInvoker>,
  cfg: &GenerationConfig,
  prompts: &Prompts,
  usage: Arc<dyn UsageLog>,
  run: BatchRun,
) -> Result<Vec<Question>, GenerateError> {
  let sizes = partition(run.total, cfg.batch_size);
  let total_batches = sizes.len();
  let mut queue: VecDeque<(usize, usize)> = sizes.into_iter().enumerate().collect();

  let mut tasks = tokio::task::JoinSet::new();
  let mut merged: Vec<Question> = Vec::new();
  let mut tally = RejectionTally::default();

  while !queue.is_empty() || !tasks.is_empty() {
    while tasks.len() < cfg.max_concurrency.max(1) && !queue.is_empty() {
      // A rate-limited response on any batch pauses the whole queue once
      // before the next launch.
      if invoker.breaker().take_rate_limited() {
        let pause = Duration::from_millis(cfg.base_delay_ms * cfg.rate_limit_multiplier as u64);
        warn!(target: "generation", request_id = %run.request_id, pause_ms = pause.as_millis() as u64, "rate-limited; pausing batch launches");
        tokio::time::sleep(pause).await;
      }

      let Some((batch_index, requested)) = queue.pop_front() else {
        break;
      };
      if let Some(cb) = &run.on_progress {
        cb(Progress {
          completed: merged.len(),
          total: run.total,
          batch_index,
          total_batches,
        });
      }

      let prompt = build_prompt(prompts, &run, requested);
      tasks.spawn(process_batch(
        invoker.clone(),
        usage.clone(),
        BatchCtx {
          prompt,
          batch_index,
          requested,
          subject: run.subject.clone(),
          strict: cfg.strict_validation,
          user_id: run.user_id.clone(),
          request_id: run.request_id.clone(),
          operation: run.operation,
        },
      ));

      if cfg.batch_pause_ms > 0 {
        tokio::time::sleep(Duration::from_millis(cfg.batch_pause_ms)).await;
      }
    }

    if let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((questions, batch_tally)) => {
          merged.extend(questions);
          tally.merge(&batch_tally);
        }
        Err(e) => {
          warn!(target: "generation", request_id = %run.request_id, error = %e, "batch task panicked; skipping");
        }
      }
    }
  }

  // Dedup by exact question text, first occurrence (in completion order) wins.
  let mut seen: HashSet<String> = HashSet::with_capacity(merged.len());
  let mut unique: Vec<Question> = Vec::with_capacity(merged.len());
  for q in merged {
    if seen.insert(q.question.clone()) {
      unique.push(q);
    }
  }
  unique.truncate(run.total);

  info!(
    target: "generation",
    request_id = %run.request_id,
    produced = unique.len(),
    requested = run.total,
    rejected = tally.total(),
    rejections = %tally.summary(),
    "generation run finished"
  );

  if unique.is_empty() {
    return Err(GenerateError::NoQuestions);
  }
  Ok(unique)
}

/// Assemble the full prompt for one batch: system rules, subject rule block,
/// and the reference content.
pub fn build_prompt(prompts: &Prompts, run: &BatchRun, count: usize) -> String {
  let user = fill_template(
    &prompts.generation_user_template,
    &[
      ("count", &count.to_string()),
      ("difficulty", run.difficulty.as_str()),
      ("subject", &run.subject),
      ("topic", &run.topic),
      ("rules", rules_for(&run.subject)),
      ("content", &run.content),
    ],
  );
  format!("{}\n\n{}", prompts.generation_system, user)
}

struct BatchCtx {
  prompt: String,
  batch_index: usize,
  requested: usize,
  subject: String,
  strict: bool,
  user_id: String,
  request_id: String,
  operation: &'static str,
}

/// One batch: invoke, clean + validate, log usage. Model failure is
/// contained here: the batch yields nothing and the run continues.
async fn process_batch(
  invoker: Arc<ModelInvoker>,
  usage: Arc<dyn UsageLog>,
  ctx: BatchCtx,
) -> (Vec<Question>, RejectionTally) {
  match invoker.invoke(&ctx.prompt, ctx.requested).await {
    Ok(batch) => {
      let (valid, tally) = sift_questions(batch.questions, &ctx.subject, ctx.strict);
      log_usage(
        &usage,
        &ctx,
        "success",
        batch.input_tokens,
        batch.output_tokens,
        valid.len() as u32,
        tally.total(),
        None,
        &batch.model,
      )
      .await;
      (valid, tally)
    }
    Err(e) => {
      warn!(
        target: "generation",
        request_id = %ctx.request_id,
        batch_index = ctx.batch_index,
        error = %e,
        "batch failed after retries; continuing with remaining batches"
      );
      log_usage(&usage, &ctx, "failed", None, None, 0, 0, Some(e.to_string()), "").await;
      (Vec::new(), RejectionTally::default())
    }
  }
}

/// Clean then validate each question, tallying rejections by reason.
pub fn sift_questions(
  raw: Vec<Question>,
  subject: &str,
  strict: bool,
) -> (Vec<Question>, RejectionTally) {
  let mut tally = RejectionTally::default();
  let mut valid = Vec::with_capacity(raw.len());
  for q in raw {
    let cleaned = clean(q);
    match validate(&cleaned, subject, strict) {
      Ok(()) => valid.push(cleaned),
      Err(reason) => tally.add(reason),
    }
  }
  (valid, tally)
}

#[allow(clippy::too_many_arguments)]
async fn log_usage(
  usage: &Arc<dyn UsageLog>,
  ctx: &BatchCtx,
  status: &str,
  input_tokens: Option<u32>,
  output_tokens: Option<u32>,
  valid: u32,
  rejected: u32,
  error_message: Option<String>,
  model: &str,
) {
  let record = UsageRecord {
    user_id: ctx.user_id.clone(),
    request_id: format!("{}#{}", ctx.request_id, ctx.batch_index),
    operation: ctx.operation.into(),
    status: status.into(),
    input_tokens,
    output_tokens,
    valid_questions: Some(valid),
    rejected_questions: Some(rejected),
    error_message,
    service: "question_generation".into(),
    model: model.into(),
    created_at: unix_now(),
  };
  // Fire-and-forget relative to the generation result.
  if let Err(e) = usage.record(record).await {
    warn!(target: "generation", request_id = %ctx.request_id, error = %e, "usage logging failed (ignored)");
  }
}
