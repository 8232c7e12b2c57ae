/// AI provider routing and usage accounting
pub mod history;
pub mod router;
pub mod usage;

pub use history::{ChatEntry, ChatHistoryManager};
pub use router::{route_model, Endpoint, Provider, ProviderRoute, ProviderRouter, UpstreamFailure};
pub use usage::{ModelUsage, UsageEntry, UsageManager, UsageTotals};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Answer returned when a provider replies without any choices
pub const PLACEHOLDER_ANSWER: &str = "Could not get a response from AI.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// OpenAI-style chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Normalized provider answer
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl Completion {
    /// Answer that carries no usage (placeholder or provider-reported error)
    pub fn soft(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }
    }
}

/// Uniform response shape returned by the gateway for every provider
pub fn completion_body(content: &str) -> Value {
    json!({
        "choices": [
            { "message": { "content": content } }
        ]
    })
}
