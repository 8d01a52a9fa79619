//! **TurnPipeline**: One conversational turn (transcribe → generate → synthesize).
//!
//! Phases always run in dependency order. In `Overlap` mode the synthesis stream is drained
//! chunk by chunk so the caller can start playback early; in `Sequential` mode the whole
//! utterance is synthesized first and delivered as a single chunk.
//!
//! Every upstream call has its own timeout, is retried only for transient failures, and
//! races the turn's [`CancellationToken`]. After cancellation no further events are emitted.

use crate::context::{build_request, parse_reply, ContextLimits, DialogueReply, TurnContext};
use crate::error::{FailureClass, Phase, VoiceError, VoiceResult};
use crate::events::{EventSink, EventType, PipelineEvent};
use crate::llm::{DialogueBackend, GenerationParams};
use crate::retry::{with_retry, within, RetryPolicy};
use crate::stt::SttBackend;
use crate::tts::TtsBackend;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::StreamExt;
use panel_core::{Difficulty, InterviewerProfile, JobDescriptor, Message, PipelineConfig, PipelineMode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Input for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub audio: Vec<u8>,
    pub interviewer: InterviewerProfile,
    pub job: JobDescriptor,
    pub difficulty: Difficulty,
    /// Prior conversation, oldest first. Only the trailing window is sent upstream.
    pub history: Vec<Message>,
    /// Overrides the interviewer's default voice.
    pub voice: Option<String>,
    pub params: GenerationParams,
    pub document_context: Option<String>,
    pub keywords: Vec<String>,
    /// Overrides the configured language hint.
    pub language_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutput {
    pub transcript: String,
    pub reply: DialogueReply,
    pub audio_chunks: usize,
    pub audio_bytes: usize,
}

/// A failed or cancelled turn. `transcript` is set when transcription had already succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnFailure {
    pub error: VoiceError,
    pub transcript: Option<String>,
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

pub struct TurnPipeline {
    stt: Arc<dyn SttBackend>,
    llm: Arc<dyn DialogueBackend>,
    tts: Arc<dyn TtsBackend>,
    config: PipelineConfig,
    retry: RetryPolicy,
}

impl TurnPipeline {
    pub fn new(
        stt: Arc<dyn SttBackend>,
        llm: Arc<dyn DialogueBackend>,
        tts: Arc<dyn TtsBackend>,
        config: PipelineConfig,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            stt,
            llm,
            tts,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dialogue(&self) -> Arc<dyn DialogueBackend> {
        self.llm.clone()
    }

    /// Run a turn to completion, writing events to `sink`. A failure is reported once as an
    /// `error` event (unless cancelled) and returned.
    pub async fn run(
        &self,
        req: TurnRequest,
        sink: &mut EventSink,
        cancel: &CancellationToken,
    ) -> Result<TurnOutput, TurnFailure> {
        let mut transcript = None;
        match self.run_phases(&req, sink, cancel, &mut transcript).await {
            Ok(out) => Ok(out),
            Err(error) => {
                if matches!(error, VoiceError::Cancelled) {
                    info!(target: "panel::pipeline", interviewer = %req.interviewer.id, "turn cancelled");
                } else {
                    warn!(target: "panel::pipeline", error = %error, kind = ?error.kind(), "turn failed");
                    sink.emit_error(&error).await;
                }
                Err(TurnFailure { error, transcript })
            }
        }
    }

    /// Spawn the turn on the runtime and hand back its event stream and cancel handle.
    pub fn start(self: &Arc<Self>, req: TurnRequest) -> PipelineHandle {
        let cancel = CancellationToken::new();
        let (mut sink, events) = EventSink::channel(self.config.event_buffer, cancel.clone());
        let pipeline = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let result = pipeline.run(req, &mut sink, &token).await;
            sink.close();
            result
        });
        PipelineHandle { events, cancel, join }
    }

    async fn run_phases(
        &self,
        req: &TurnRequest,
        sink: &mut EventSink,
        cancel: &CancellationToken,
        transcript_out: &mut Option<String>,
    ) -> VoiceResult<TurnOutput> {
        // Transcription
        sink.emit(EventType::SttStart, None).await?;
        let stt = self.stt.as_ref();
        let audio = req.audio.as_slice();
        let language = req
            .language_hint
            .as_deref()
            .unwrap_or(self.config.language_hint.as_str());
        let language = Some(language).filter(|l| !l.is_empty());
        let transcript = with_retry(
            Phase::Transcription,
            self.retry,
            ms(self.config.stt_timeout_ms),
            cancel,
            move || stt.transcribe(audio, language),
        )
        .await?;
        let text = transcript.text.trim().to_string();
        if text.is_empty() {
            return Err(VoiceError::upstream(
                Phase::Transcription,
                FailureClass::Validation,
                "transcription was empty",
            ));
        }
        *transcript_out = Some(text.clone());
        debug!(target: "panel::pipeline", chars = text.len(), "transcribed");
        sink.emit(EventType::SttComplete, Some(json!({ "text": text }))).await?;

        // Generation
        let interviewer = &req.interviewer;
        sink.emit(EventType::LlmStart, Some(json!({ "interviewer": interviewer.id })))
            .await?;
        let limits = ContextLimits::from_config(&self.config);
        let request = build_request(
            &TurnContext {
                interviewer,
                job: &req.job,
                difficulty: req.difficulty,
                history: &req.history,
                candidate_text: &text,
                document_context: req.document_context.as_deref(),
                keywords: &req.keywords,
                params: req.params,
            },
            &limits,
        );
        let llm = self.llm.as_ref();
        let request = &request;
        let raw = with_retry(
            Phase::Generation,
            self.retry,
            ms(self.config.llm_timeout_ms),
            cancel,
            move || llm.complete(request),
        )
        .await?;
        let reply = parse_reply(&raw, limits.request_judgment)?;
        sink.emit(
            EventType::LlmComplete,
            Some(json!({
                "text": reply.text,
                "interviewer": interviewer.id,
                "judgment": reply.judgment,
            })),
        )
        .await?;

        // Synthesis
        let voice = req.voice.clone().unwrap_or_else(|| interviewer.voice.clone());
        sink.emit(EventType::TtsStart, Some(json!({ "voice": voice }))).await?;
        let (audio_chunks, audio_bytes) = match self.config.mode {
            PipelineMode::Overlap => self.stream_speech(&reply.text, &voice, sink, cancel).await?,
            PipelineMode::Sequential => self.buffer_speech(&reply.text, &voice, sink, cancel).await?,
        };
        sink.emit(
            EventType::TtsComplete,
            Some(json!({ "chunks": audio_chunks, "bytes": audio_bytes })),
        )
        .await?;

        info!(
            target: "panel::pipeline",
            interviewer = %interviewer.id,
            mode = self.config.mode.as_str(),
            audio_chunks,
            audio_bytes,
            "turn complete"
        );
        Ok(TurnOutput {
            transcript: text,
            reply,
            audio_chunks,
            audio_bytes,
        })
    }

    /// Drain the synthesis stream, emitting each chunk as it arrives. Opening the stream is
    /// retried; a failure mid-stream is not, since audio may already have been delivered.
    async fn stream_speech(
        &self,
        text: &str,
        voice: &str,
        sink: &mut EventSink,
        cancel: &CancellationToken,
    ) -> VoiceResult<(usize, usize)> {
        let tts = self.tts.as_ref();
        let first_budget = ms(self.config.tts_first_chunk_timeout_ms);
        let chunk_budget = ms(self.config.tts_chunk_timeout_ms);
        let mut stream = with_retry(Phase::Synthesis, self.retry, first_budget, cancel, move || {
            tts.synthesize_stream(text, voice)
        })
        .await?;

        let mut index = 0usize;
        let mut bytes = 0usize;
        loop {
            let budget = if index == 0 { first_budget } else { chunk_budget };
            let next = within(Phase::Synthesis, budget, cancel, async {
                stream.next().await.transpose()
            })
            .await?;
            let Some(chunk) = next else { break };
            if chunk.is_empty() {
                continue;
            }
            bytes += chunk.len();
            sink.emit(
                EventType::TtsChunk,
                Some(json!({ "index": index, "audio": BASE64.encode(&chunk) })),
            )
            .await?;
            index += 1;
        }
        Ok((index, bytes))
    }

    /// Synthesize the whole utterance, then emit it as one chunk.
    async fn buffer_speech(
        &self,
        text: &str,
        voice: &str,
        sink: &mut EventSink,
        cancel: &CancellationToken,
    ) -> VoiceResult<(usize, usize)> {
        let tts = self.tts.as_ref();
        let audio = with_retry(
            Phase::Synthesis,
            self.retry,
            ms(self.config.tts_first_chunk_timeout_ms),
            cancel,
            move || tts.synthesize(text, voice),
        )
        .await?;
        if audio.is_empty() {
            return Ok((0, 0));
        }
        sink.emit(
            EventType::TtsChunk,
            Some(json!({ "index": 0, "audio": BASE64.encode(&audio) })),
        )
        .await?;
        Ok((1, audio.len()))
    }
}

/// A spawned turn.
pub struct PipelineHandle {
    pub events: mpsc::Receiver<PipelineEvent>,
    pub cancel: CancellationToken,
    pub join: JoinHandle<Result<TurnOutput, TurnFailure>>,
}

impl PipelineHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
