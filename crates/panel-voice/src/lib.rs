//! # panel-voice - Interview turn pipeline and orchestration
//!
//! Runs one conversational turn across three upstream services and streams typed events
//! back to the caller, then binds turns to a session with rotation, a turn timer and the
//! end-of-session evaluation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   InterviewOrchestrator                      │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐        │
//! │  │     STT      │→ │  Dialogue    │→ │     TTS      │→ events│
//! │  │ (transcribe) │  │ (persona +   │  │ (chunk       │        │
//! │  │              │  │  judgment)   │  │  stream)     │        │
//! │  └──────────────┘  └──────────────┘  └──────────────┘        │
//! │         ↓ complete_turn / fail_turn                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐        │
//! │  │SessionMachine│  │RotationPolicy│  │  Evaluator   │        │
//! │  └──────────────┘  └──────────────┘  └──────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod error;
pub mod evaluation;
pub mod events;
mod http;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod stt;
pub mod tts;

pub use context::{build_request, parse_reply, ContextLimits, DialogueReply, TurnContext};
pub use error::{FailureClass, Phase, VoiceError, VoiceResult};
pub use evaluation::{FinalReport, SessionEvaluator};
pub use events::{EventSink, EventType, PipelineEvent};
pub use llm::{
    create_best_dialogue, ChatRole, ChatTurn, DialogueBackend, DialogueRequest, GenerationParams,
    OpenAiChat, PlaceholderDialogue,
};
pub use orchestrator::{
    InterviewOrchestrator, InterviewSetup, PanelServices, SessionEvent, TurnHandle, TurnOptions,
};
pub use pipeline::{PipelineHandle, TurnFailure, TurnOutput, TurnPipeline, TurnRequest};
pub use retry::RetryPolicy;
pub use stt::{create_best_stt, OpenAiStt, PlaceholderStt, SttBackend, Transcript, WordTiming};
pub use tts::{create_best_tts, AudioStream, OpenAiTts, PlaceholderTts, TtsBackend};
