//! Dialogue generation backends (chat completions).

use crate::error::{FailureClass, Phase, VoiceError, VoiceResult};
use crate::http;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Optional sampling overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogueRequest {
    pub system: String,
    /// Bounded history, oldest first; the last entry is the message being answered.
    pub history: Vec<ChatTurn>,
    pub params: GenerationParams,
    /// Ask the service for a JSON object body.
    pub json_mode: bool,
}

#[async_trait]
pub trait DialogueBackend: Send + Sync {
    /// Raw completion text.
    async fn complete(&self, request: &DialogueRequest) -> VoiceResult<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
/// Uses `LLM_API_URL`, `LLM_API_KEY` (or `PANEL_API_KEY` / `OPENAI_API_KEY`) and `LLM_MODEL`.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn from_env() -> VoiceResult<Self> {
        let api_key = http::env_api_key("LLM_API_KEY").ok_or_else(|| {
            VoiceError::Config("LLM requires LLM_API_KEY, PANEL_API_KEY, or OPENAI_API_KEY".to_string())
        })?;
        Self::new(
            http::env_or("LLM_API_URL", http::DEFAULT_API_URL),
            api_key,
            http::env_or("LLM_MODEL", "gpt-4o-mini"),
        )
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: http::build_client()?,
        })
    }

    /// Set the model (e.g. `gpt-4o`, `meta-llama/llama-3.3-70b-instruct`).
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

#[async_trait]
impl DialogueBackend for OpenAiChat {
    async fn complete(&self, request: &DialogueRequest) -> VoiceResult<String> {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        messages.push(ChatTurn {
            role: ChatRole::System,
            content: request.system.clone(),
        });
        messages.extend(request.history.iter().cloned());
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
            response_format: request
                .json_mode
                .then(|| serde_json::json!({ "type": "json_object" })),
        };

        debug!(
            target: "panel::pipeline",
            model = %self.model,
            history = request.history.len(),
            json_mode = request.json_mode,
            "LLM request"
        );
        let res = self
            .client
            .post(http::endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::from_reqwest(Phase::Generation, e))?;
        let res = http::check_status(Phase::Generation, res).await?;
        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| VoiceError::from_reqwest(Phase::Generation, e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                VoiceError::upstream(Phase::Generation, FailureClass::Validation, "response had no choices")
            })
    }
}

/// Offline dialogue: a fixed follow-up question (with a neutral judgment in JSON mode).
#[derive(Debug, Default)]
pub struct PlaceholderDialogue {
    pub reply: Option<String>,
}

impl PlaceholderDialogue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DialogueBackend for PlaceholderDialogue {
    async fn complete(&self, request: &DialogueRequest) -> VoiceResult<String> {
        let reply = self
            .reply
            .clone()
            .unwrap_or_else(|| "Thanks. Can you walk me through a concrete example of that?".to_string());
        if request.json_mode {
            return Ok(serde_json::json!({
                "reply": reply,
                "judgment": {
                    "relevance": 3,
                    "clarity": 3,
                    "depth": 3,
                    "inner_thought": "placeholder judgment",
                    "follow_up": true
                }
            })
            .to_string());
        }
        Ok(reply)
    }
}

/// Priority: (1) OpenAiChat if an API key is set, (2) PlaceholderDialogue.
pub fn create_best_dialogue() -> Arc<dyn DialogueBackend> {
    match OpenAiChat::from_env() {
        Ok(llm) => {
            info!(target: "panel::pipeline", model = %llm.model, "LLM: OpenAI-compatible backend");
            Arc::new(llm)
        }
        Err(_) => {
            info!(target: "panel::pipeline", "LLM: no API key, using placeholder");
            Arc::new(PlaceholderDialogue::new())
        }
    }
}
