//! **Speech-to-Text (STT)**: Turn a candidate's recorded answer into text.
//!
//! Implement `SttBackend` for any transcription service. `OpenAiStt` talks to an
//! OpenAI-compatible `/audio/transcriptions` endpoint; `PlaceholderStt` answers offline.

use crate::error::{Phase, VoiceError, VoiceResult};
use crate::http;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f32,
    pub end: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTiming>>,
}

impl Transcript {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            words: None,
        }
    }
}

/// Backend for converting an audio payload (opaque bytes) to text.
#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Transcribe one answer. An empty `text` means nothing intelligible was heard.
    async fn transcribe(&self, audio: &[u8], language_hint: Option<&str>) -> VoiceResult<Transcript>;
}

/// Guess a filename the transcription API will accept from the container magic bytes.
fn upload_name(audio: &[u8]) -> (&'static str, &'static str) {
    if audio.starts_with(b"RIFF") {
        ("audio.wav", "audio/wav")
    } else if audio.starts_with(b"OggS") {
        ("audio.ogg", "audio/ogg")
    } else if audio.starts_with(b"ID3") || audio.starts_with(&[0xFF, 0xFB]) {
        ("audio.mp3", "audio/mpeg")
    } else {
        ("audio.webm", "audio/webm")
    }
}

/// Placeholder STT: returns a fixed string. Use for running the pipeline without an API key.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    /// If set, return this instead of the default message.
    pub response: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

#[async_trait]
impl SttBackend for PlaceholderStt {
    async fn transcribe(&self, audio: &[u8], _language_hint: Option<&str>) -> VoiceResult<Transcript> {
        if let Some(ref r) = self.response {
            return Ok(Transcript::text(r.clone()));
        }
        Ok(Transcript::text(format!(
            "[STT placeholder: {} bytes of audio, connect a transcription service]",
            audio.len()
        )))
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    words: Option<Vec<WordTiming>>,
}

/// Production STT backend: OpenAI-compatible transcription API.
/// Uses `STT_API_URL`, `STT_API_KEY` (or `PANEL_API_KEY` / `OPENAI_API_KEY`) and `STT_MODEL` (default whisper-1).
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Ask for word-level timestamps (`verbose_json`).
    pub word_timings: bool,
    client: reqwest::Client,
}

impl OpenAiStt {
    pub fn from_env() -> VoiceResult<Self> {
        let api_key = http::env_api_key("STT_API_KEY").ok_or_else(|| {
            VoiceError::Config("STT requires STT_API_KEY, PANEL_API_KEY, or OPENAI_API_KEY".to_string())
        })?;
        Self::new(
            http::env_or("STT_API_URL", http::DEFAULT_API_URL),
            api_key,
            http::env_or("STT_MODEL", "whisper-1"),
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
            word_timings: true,
            client: http::build_client()?,
        })
    }
}

#[async_trait]
impl SttBackend for OpenAiStt {
    async fn transcribe(&self, audio: &[u8], language_hint: Option<&str>) -> VoiceResult<Transcript> {
        if audio.is_empty() {
            return Ok(Transcript::default());
        }
        let (file_name, mime) = upload_name(audio);
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| VoiceError::from_reqwest(Phase::Transcription, e))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if let Some(lang) = language_hint.filter(|l| !l.trim().is_empty()) {
            form = form.text("language", lang.trim().to_string());
        }
        if self.word_timings {
            form = form
                .text("response_format", "verbose_json")
                .text("timestamp_granularities[]", "word");
        }

        debug!(target: "panel::pipeline", bytes = audio.len(), model = %self.model, "STT request");
        let res = self
            .client
            .post(http::endpoint(&self.base_url, "audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::from_reqwest(Phase::Transcription, e))?;
        let res = http::check_status(Phase::Transcription, res).await?;
        let parsed: TranscriptionResponse = res
            .json()
            .await
            .map_err(|e| VoiceError::from_reqwest(Phase::Transcription, e))?;
        Ok(Transcript {
            text: parsed.text.trim().to_string(),
            words: parsed.words,
        })
    }
}

/// Create the best available STT backend from environment.
/// Priority: (1) OpenAiStt if an API key is set, (2) PlaceholderStt.
pub fn create_best_stt() -> Arc<dyn SttBackend> {
    match OpenAiStt::from_env() {
        Ok(stt) => {
            info!(target: "panel::pipeline", model = %stt.model, "STT: OpenAI-compatible backend");
            Arc::new(stt)
        }
        Err(_) => {
            info!(target: "panel::pipeline", "STT: no API key, using placeholder");
            Arc::new(PlaceholderStt::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_returns_message() {
        let stt = PlaceholderStt::new();
        let t = stt.transcribe(&[0u8; 480], Some("en")).await.unwrap();
        assert!(t.text.contains("STT placeholder"));
        assert!(t.text.contains("480"));
    }

    #[tokio::test]
    async fn placeholder_with_response() {
        let stt = PlaceholderStt::with_response("hello world");
        assert_eq!(stt.transcribe(&[], None).await.unwrap().text, "hello world");
    }

    #[test]
    fn container_sniffing() {
        assert_eq!(upload_name(b"RIFF....WAVE").0, "audio.wav");
        assert_eq!(upload_name(b"OggS\0").0, "audio.ogg");
        assert_eq!(upload_name(&[0x1A, 0x45, 0xDF, 0xA3]).0, "audio.webm");
    }
}
