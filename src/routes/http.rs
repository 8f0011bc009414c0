//! HTTP endpoint handlers. These are thin wrappers that forward to the
//! question service and map `GenerateError` onto HTTP status codes.

use std::sync::Arc;

use axum::{
  extract::{Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::error::GenerateError;
use crate::protocol::*;
use crate::state::AppState;

fn error_response(e: GenerateError) -> Response {
  let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
  warn!(target: "quizforge_backend", status = %status, error = %e, "request failed");
  (status, Json(ErrorOut { error: e.to_string() })).into_response()
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut {
    status: "ok",
    model_configured: state.model_configured,
    breaker_failures: state.breaker.failure_count(),
  })
}

#[instrument(level = "info", skip(state, body), fields(subject = %body.subject, total = body.total_questions))]
pub async fn http_generate(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerateIn>,
) -> Response {
  match state.service.generate(body.into(), None).await {
    Ok(questions) => {
      info!(target: "generation", count = questions.len(), "HTTP generate served");
      let count = questions.len();
      Json(QuestionsOut { questions, count }).into_response()
    }
    Err(e) => error_response(e),
  }
}

#[instrument(level = "info", skip(state, body), fields(subject = %body.subject, content_len = body.content.len(), total = body.total_questions))]
pub async fn http_from_content(
  State(state): State<Arc<AppState>>,
  Json(body): Json<ContentIn>,
) -> Response {
  match state.service.generate_from_content(body.into(), None).await {
    Ok(questions) => {
      info!(target: "generation", count = questions.len(), "HTTP from_content served");
      let count = questions.len();
      Json(QuestionsOut { questions, count }).into_response()
    }
    Err(e) => error_response(e),
  }
}

#[instrument(level = "info", skip(state, body), fields(subject = %body.subject, total = body.total_questions))]
pub async fn http_generate_fast(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerateIn>,
) -> Response {
  match state.service.generate_fast(body.into()).await {
    Ok(questions) => {
      info!(target: "generation", count = questions.len(), "HTTP fast generate served");
      let count = questions.len();
      Json(QuestionsOut { questions, count }).into_response()
    }
    Err(e) => error_response(e),
  }
}

#[instrument(level = "info", skip(state, body), fields(text_len = body.text.len()))]
pub async fn http_parse_bulk(
  State(state): State<Arc<AppState>>,
  Json(body): Json<BulkIn>,
) -> Response {
  match state.service.parse_bulk(&body.text).await {
    Ok(questions) => {
      info!(target: "generation", count = questions.len(), "HTTP parse_bulk served");
      let count = questions.len();
      Json(BulkOut { questions, count }).into_response()
    }
    Err(e) => error_response(e),
  }
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
  pub limit: Option<usize>,
}

#[instrument(level = "info", skip(state))]
pub async fn http_usage(
  State(state): State<Arc<AppState>>,
  Query(q): Query<UsageQuery>,
) -> impl IntoResponse {
  let limit = q.limit.unwrap_or(100).min(1000);
  let records = state.usage.recent(limit).await;
  let count = records.len();
  Json(UsageOut { records, count })
}
