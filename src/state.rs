//! Application state: configuration, stores, the Gemini invoker, and the
//! question service wired together.
//!
//! This module owns:
//!   - the TOML config (generation tuning + prompts + optional knowledge bank)
//!   - the circuit breaker shared by every model call
//!   - the in-memory knowledge base, usage log, and question cache
//!   - the question service the routes call into

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::breaker::CircuitBreaker;
use crate::config::load_app_config_from_env;
use crate::gemini::{GeminiModel, ModelInvoker, QuestionModel};
use crate::service::QuestionService;
use crate::stores::{
    MemoryCache, MemoryKnowledgeBase, MemoryUsageLog, NoopCache, QuestionCache,
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QuestionService>,
    pub usage: Arc<MemoryUsageLog>,
    pub breaker: Arc<CircuitBreaker>,
    pub model_configured: bool,
}

impl AppState {
    /// Build state from env: load config, wire stores, init the Gemini pair.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_app_config_from_env().unwrap_or_default();
        let generation = cfg.generation.clone();
        let prompts = cfg.prompts.clone();

        let breaker = Arc::new(CircuitBreaker::new(
            generation.circuit_threshold,
            Duration::from_secs(generation.circuit_cooldown_secs),
        ));

        // Build the optional Gemini invoker (if API key present).
        let timeout = Duration::from_secs(generation.request_timeout_secs);
        let invoker = match GeminiModel::pair_from_env(timeout) {
            Some((primary, fallback)) => {
                info!(
                    target: "quizforge_backend",
                    primary = %primary.name(),
                    fallback = %fallback.name(),
                    "Gemini enabled"
                );
                Some(Arc::new(ModelInvoker::new(
                    Arc::new(primary),
                    Some(Arc::new(fallback) as Arc<dyn QuestionModel>),
                    breaker.clone(),
                    generation.max_retries,
                    generation.fallback_retries,
                    Duration::from_millis(generation.base_delay_ms),
                    generation.rate_limit_multiplier,
                )))
            }
            None => {
                warn!(target: "quizforge_backend", "Gemini disabled (no GEMINI_API_KEY). Generation endpoints will return 503.");
                None
            }
        };
        let model_configured = invoker.is_some();

        let knowledge = Arc::new(MemoryKnowledgeBase::new(cfg.knowledge.clone()));
        if !cfg.knowledge.is_empty() {
            info!(target: "quizforge_backend", entries = cfg.knowledge.len(), "Loaded knowledge bank");
        }

        let usage = Arc::new(MemoryUsageLog::new());
        let cache: Arc<dyn QuestionCache> = if generation.cache_enabled {
            Arc::new(MemoryCache::new())
        } else {
            Arc::new(NoopCache)
        };

        let service = Arc::new(QuestionService::new(
            invoker,
            generation,
            prompts,
            knowledge,
            usage.clone(),
            cache,
        ));

        Self {
            service,
            usage,
            breaker,
            model_configured,
        }
    }
}
