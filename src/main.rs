//! QuizForge · AI Question Generation Backend
//!
//! - Axum HTTP + WebSocket API
//! - Gemini integration with retry, fallback, and a circuit breaker
//! - Knowledge-base assisted and content-provided generation paths
//!
//! Important env variables:
//!   PORT                  : u16 (default 3000)
//!   GEMINI_API_KEY        : enables Gemini integration if present
//!   GEMINI_BASE_URL       : default "https://generativelanguage.googleapis.com/v1beta"
//!   GEMINI_PRIMARY_MODEL  : default "gemini-2.0-flash"
//!   GEMINI_FALLBACK_MODEL : default "gemini-1.5-flash"
//!   QUIZFORGE_CONFIG_PATH : path to TOML config (tuning + prompts + knowledge bank)
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod subjects;
mod mathtext;
mod cleaner;
mod validator;
mod breaker;
mod gemini;
mod stores;
mod orchestrator;
mod service;
mod state;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (config, stores, Gemini invoker, service).
  let state = Arc::new(AppState::new());

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "quizforge_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}
