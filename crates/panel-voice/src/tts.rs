//! **Text-to-Speech (TTS)**: Stream the interviewer's reply as audio chunks.
//!
//! `synthesize_stream` yields chunks as the service produces them so playback can start
//! before the whole utterance is ready.

use crate::error::{Phase, VoiceError, VoiceResult};
use crate::http;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Ordered audio chunks; an `Err` item ends the utterance.
pub type AudioStream = BoxStream<'static, VoiceResult<Vec<u8>>>;

#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Open a synthesis stream for `text` spoken with `voice`.
    async fn synthesize_stream(&self, text: &str, voice: &str) -> VoiceResult<AudioStream>;

    /// Whole utterance as one buffer.
    async fn synthesize(&self, text: &str, voice: &str) -> VoiceResult<Vec<u8>> {
        let chunks: Vec<Vec<u8>> = self.synthesize_stream(text, voice).await?.try_collect().await?;
        Ok(chunks.concat())
    }
}

/// Placeholder TTS: silent audio, one small chunk per sentence. Use for offline runs.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

#[async_trait]
impl TtsBackend for PlaceholderTts {
    async fn synthesize_stream(&self, text: &str, _voice: &str) -> VoiceResult<AudioStream> {
        let chunks: Vec<VoiceResult<Vec<u8>>> = text
            .split_terminator(&['.', '?', '!'][..])
            .filter(|s| !s.trim().is_empty())
            .map(|s| Ok(vec![0u8; s.len().min(256)]))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

/// Production TTS backend: OpenAI-compatible `/audio/speech`, streamed via `bytes_stream`.
/// Uses `TTS_API_URL`, `TTS_API_KEY` (or `PANEL_API_KEY` / `OPENAI_API_KEY`) and `TTS_MODEL`.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    pub base_url: String,
    pub api_key: String,
    /// tts-1 (fast) or tts-1-hd (higher quality).
    pub model: String,
    /// mp3, opus, aac, wav, pcm.
    pub format: String,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn from_env() -> VoiceResult<Self> {
        let api_key = http::env_api_key("TTS_API_KEY").ok_or_else(|| {
            VoiceError::Config("TTS requires TTS_API_KEY, PANEL_API_KEY, or OPENAI_API_KEY".to_string())
        })?;
        Self::new(
            http::env_or("TTS_API_URL", http::DEFAULT_API_URL),
            api_key,
            http::env_or("TTS_MODEL", "tts-1"),
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
            format: "mp3".to_string(),
            client: http::build_client()?,
        })
    }
}

#[async_trait]
impl TtsBackend for OpenAiTts {
    async fn synthesize_stream(&self, text: &str, voice: &str) -> VoiceResult<AudioStream> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(stream::empty().boxed());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice,
            "response_format": self.format,
        });
        debug!(target: "panel::pipeline", chars = text.len(), voice, "TTS request");
        let res = self
            .client
            .post(http::endpoint(&self.base_url, "audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::from_reqwest(Phase::Synthesis, e))?;
        let res = http::check_status(Phase::Synthesis, res).await?;
        Ok(res
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| VoiceError::from_reqwest(Phase::Synthesis, e))
            })
            .boxed())
    }
}

/// Priority: (1) OpenAiTts if an API key is set, (2) PlaceholderTts.
pub fn create_best_tts() -> Arc<dyn TtsBackend> {
    match OpenAiTts::from_env() {
        Ok(tts) => {
            info!(target: "panel::pipeline", model = %tts.model, "TTS: OpenAI-compatible backend");
            Arc::new(tts)
        }
        Err(_) => {
            info!(target: "panel::pipeline", "TTS: no API key, using placeholder");
            Arc::new(PlaceholderTts)
        }
    }
}
