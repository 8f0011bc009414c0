//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{BulkQuestion, ContentRequest, Difficulty, GenerateRequest, Progress, Question};
use crate::stores::UsageRecord;

fn default_difficulty() -> Difficulty {
    Difficulty::Medium
}
fn default_total() -> usize {
    10
}

/// Body for the knowledge-base-assisted and fast generation endpoints.
#[derive(Clone, Debug, Deserialize)]
pub struct GenerateIn {
    pub subject: String,
    pub topic: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: Difficulty,
    #[serde(rename = "totalQuestions", default = "default_total")]
    pub total_questions: usize,
    #[serde(rename = "userId", default)]
    pub user_id: String,
}

impl From<GenerateIn> for GenerateRequest {
    fn from(inp: GenerateIn) -> Self {
        Self {
            subject: inp.subject,
            topic: inp.topic,
            difficulty: inp.difficulty,
            total_questions: inp.total_questions,
            user_id: inp.user_id,
        }
    }
}

/// Body for the content-provided generation endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct ContentIn {
    pub content: String,
    pub subject: String,
    pub topic: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: Difficulty,
    #[serde(rename = "totalQuestions", default = "default_total")]
    pub total_questions: usize,
    #[serde(rename = "userId", default)]
    pub user_id: String,
}

impl From<ContentIn> for ContentRequest {
    fn from(inp: ContentIn) -> Self {
        Self {
            content: inp.content,
            subject: inp.subject,
            topic: inp.topic,
            difficulty: inp.difficulty,
            total_questions: inp.total_questions,
            user_id: inp.user_id,
        }
    }
}

/// Body for the bulk-parse endpoint.
#[derive(Debug, Deserialize)]
pub struct BulkIn {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct QuestionsOut {
    pub questions: Vec<Question>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct BulkOut {
    pub questions: Vec<BulkQuestion>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct UsageOut {
    pub records: Vec<UsageRecord>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    #[serde(rename = "modelConfigured")]
    pub model_configured: bool,
    #[serde(rename = "breakerFailures")]
    pub breaker_failures: u32,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
}

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Generate {
        subject: String,
        topic: String,
        #[serde(default = "default_difficulty")]
        difficulty: Difficulty,
        #[serde(rename = "totalQuestions", default = "default_total")]
        total_questions: usize,
        #[serde(rename = "userId", default)]
        user_id: String,
    },
    GenerateFromContent {
        content: String,
        subject: String,
        topic: String,
        #[serde(default = "default_difficulty")]
        difficulty: Difficulty,
        #[serde(rename = "totalQuestions", default = "default_total")]
        total_questions: usize,
        #[serde(rename = "userId", default)]
        user_id: String,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Progress {
        #[serde(flatten)]
        progress: Progress,
    },
    Questions {
        questions: Vec<Question>,
        count: usize,
    },
    Error {
        message: String,
    },
}
