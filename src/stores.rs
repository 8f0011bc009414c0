//! External collaborator interfaces: knowledge base, usage log, and cache.
//!
//! Each concern is a capability trait with a null-object default, injected
//! at service construction. The in-memory implementations back the server
//! (knowledge entries are seeded from TOML config) and double as test
//! fixtures. A deployment talking to a managed store implements the same
//! traits.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::config::KnowledgeCfg;
use crate::domain::{Difficulty, Question};

// --- Knowledge base ---

#[derive(Clone, Debug)]
pub struct KnowledgeEntry {
  pub content: String,
  pub source_type: String,
  pub subject: String,
  pub topic: String,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
  /// Subject matches exactly (case-insensitive), topic by substring,
  /// active entries only, most recent first, limit 1.
  async fn search(&self, subject: &str, topic: &str) -> Option<KnowledgeEntry>;
}

pub struct NoopKnowledgeBase;

#[async_trait]
impl KnowledgeBase for NoopKnowledgeBase {
  async fn search(&self, _subject: &str, _topic: &str) -> Option<KnowledgeEntry> {
    None
  }
}

/// TOML-seeded in-memory knowledge bank. Entries keep config order; later
/// entries are treated as more recent.
pub struct MemoryKnowledgeBase {
  entries: Vec<KnowledgeCfg>,
}

impl MemoryKnowledgeBase {
  pub fn new(entries: Vec<KnowledgeCfg>) -> Self {
    Self { entries }
  }
}

#[async_trait]
impl KnowledgeBase for MemoryKnowledgeBase {
  async fn search(&self, subject: &str, topic: &str) -> Option<KnowledgeEntry> {
    let topic_lower = topic.to_lowercase();
    self
      .entries
      .iter()
      .rev()
      .find(|e| {
        e.active
          && e.subject.eq_ignore_ascii_case(subject)
          && e.topic.to_lowercase().contains(&topic_lower)
      })
      .map(|e| KnowledgeEntry {
        content: e.content.clone(),
        source_type: e.source_type.clone(),
        subject: e.subject.clone(),
        topic: e.topic.clone(),
      })
  }
}

// --- Usage log ---

/// Append-only record of one generation batch (or one failed request).
#[derive(Clone, Debug, Serialize)]
pub struct UsageRecord {
  pub user_id: String,
  pub request_id: String,
  pub operation: String,
  pub status: String,
  pub input_tokens: Option<u32>,
  pub output_tokens: Option<u32>,
  pub valid_questions: Option<u32>,
  pub rejected_questions: Option<u32>,
  pub error_message: Option<String>,
  pub service: String,
  pub model: String,
  pub created_at: u64,
}

pub fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

#[async_trait]
pub trait UsageLog: Send + Sync {
  /// Failures here are caught and logged by the caller, never propagated.
  async fn record(&self, record: UsageRecord) -> Result<(), String>;
}

pub struct NoopUsageLog;

#[async_trait]
impl UsageLog for NoopUsageLog {
  async fn record(&self, _record: UsageRecord) -> Result<(), String> {
    Ok(())
  }
}

#[derive(Default)]
pub struct MemoryUsageLog {
  records: RwLock<Vec<UsageRecord>>,
}

impl MemoryUsageLog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Most recent records first.
  pub async fn recent(&self, limit: usize) -> Vec<UsageRecord> {
    let records = self.records.read().await;
    records.iter().rev().take(limit).cloned().collect()
  }

  pub async fn len(&self) -> usize {
    self.records.read().await.len()
  }
}

#[async_trait]
impl UsageLog for MemoryUsageLog {
  async fn record(&self, record: UsageRecord) -> Result<(), String> {
    self.records.write().await.push(record);
    Ok(())
  }
}

// --- Question cache ---

#[async_trait]
pub trait QuestionCache: Send + Sync {
  async fn get(&self, key: &str) -> Option<Vec<Question>>;
  async fn put(&self, key: &str, questions: Vec<Question>, ttl: Duration);
}

/// Always-miss cache used when caching is disabled.
pub struct NoopCache;

#[async_trait]
impl QuestionCache for NoopCache {
  async fn get(&self, _key: &str) -> Option<Vec<Question>> {
    None
  }
  async fn put(&self, _key: &str, _questions: Vec<Question>, _ttl: Duration) {}
}

#[derive(Default)]
pub struct MemoryCache {
  entries: RwLock<HashMap<String, (Instant, Vec<Question>)>>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl QuestionCache for MemoryCache {
  async fn get(&self, key: &str) -> Option<Vec<Question>> {
    let mut entries = self.entries.write().await;
    match entries.get(key) {
      Some((expires, questions)) if *expires > Instant::now() => Some(questions.clone()),
      Some(_) => {
        entries.remove(key);
        None
      }
      None => None,
    }
  }

  async fn put(&self, key: &str, questions: Vec<Question>, ttl: Duration) {
    let mut entries = self.entries.write().await;
    entries.insert(key.to_string(), (Instant::now() + ttl, questions));
  }
}

/// Cache key for the content-provided path: a digest of everything that
/// influences the output.
pub fn cache_key(
  content: &str,
  subject: &str,
  topic: &str,
  difficulty: Difficulty,
  total: usize,
) -> String {
  let mut hasher = Sha256::new();
  hasher.update(content.as_bytes());
  hasher.update([0u8]);
  hasher.update(subject.as_bytes());
  hasher.update([0u8]);
  hasher.update(topic.as_bytes());
  hasher.update([0u8]);
  hasher.update(difficulty.as_str().as_bytes());
  hasher.update([0u8]);
  hasher.update(total.to_le_bytes());
  let digest = hasher.finalize();
  digest.iter().map(|b| format!("{b:02x}")).collect()
}
