//! Turn lifecycle events and the bounded sink that carries them to the caller.
//!
//! Wire format, one JSON object per event:
//!
//! ```json
//! {"type": "tts_chunk", "data": {"index": 0, "audio": "<base64>"}, "timestamp_ms": 812}
//! ```
//!
//! Timestamps are milliseconds since the pipeline started and never decrease.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SttStart,
    SttComplete,
    LlmStart,
    LlmComplete,
    TtsStart,
    TtsChunk,
    TtsComplete,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SttStart => "stt_start",
            EventType::SttComplete => "stt_complete",
            EventType::LlmStart => "llm_start",
            EventType::LlmComplete => "llm_complete",
            EventType::TtsStart => "tts_start",
            EventType::TtsChunk => "tts_chunk",
            EventType::TtsComplete => "tts_complete",
            EventType::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp_ms: u64,
}

/// Producer side of a turn's event stream.
///
/// `emit` waits for channel capacity, so a slow consumer throttles the pipeline instead of
/// letting events pile up. After cancellation nothing more is sent. Dropping or calling
/// [`close`](Self::close) ends the stream.
pub struct EventSink {
    tx: Option<mpsc::Sender<PipelineEvent>>,
    cancel: CancellationToken,
    started: Instant,
    last_ms: u64,
}

impl EventSink {
    pub fn channel(capacity: usize, cancel: CancellationToken) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Some(tx),
                cancel,
                started: Instant::now(),
                last_ms: 0,
            },
            rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map(|tx| tx.is_closed()).unwrap_or(true)
    }

    fn timestamp(&mut self) -> u64 {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_ms = self.last_ms.max(elapsed);
        self.last_ms
    }

    /// Send one event. Fails with `Cancelled` once the turn is cancelled or the consumer is gone.
    pub async fn emit(&mut self, kind: EventType, data: Option<Value>) -> VoiceResult<()> {
        if self.cancel.is_cancelled() {
            return Err(VoiceError::Cancelled);
        }
        let timestamp_ms = self.timestamp();
        let tx = self.tx.as_ref().ok_or(VoiceError::Cancelled)?;
        let event = PipelineEvent {
            kind,
            data,
            timestamp_ms,
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(VoiceError::Cancelled),
            sent = tx.send(event) => sent.map_err(|_| {
                tracing::debug!(target: "panel::pipeline", "event consumer dropped");
                VoiceError::Cancelled
            }),
        }
    }

    /// Terminal `error` event for a failed turn. Nothing is sent for a cancelled turn.
    pub async fn emit_error(&mut self, err: &VoiceError) {
        if matches!(err, VoiceError::Cancelled) {
            return;
        }
        let data = serde_json::json!({
            "kind": err.kind(),
            "message": err.user_message(),
        });
        let _ = self.emit(EventType::Error, Some(data)).await;
    }

    /// Explicit end of stream.
    pub fn close(&mut self) {
        self.tx = None;
    }
}
