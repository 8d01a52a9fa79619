//! Turn pipeline and orchestrator behaviour against scripted backends.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::stream::{self, StreamExt};
use panel_core::prompts::EVALUATION_SYSTEM;
use panel_core::{
    Difficulty, ErrorKind, InterviewerRoster, JobDescriptor, PanelConfig, PassStatus, PipelineConfig,
    PipelineMode, SessionStatus,
};
use panel_voice::{
    AudioStream, DialogueBackend, DialogueRequest, EventType, FailureClass, GenerationParams,
    InterviewOrchestrator, InterviewSetup, PanelServices, Phase, PipelineEvent, SessionEvent,
    SttBackend, Transcript, TtsBackend, TurnOptions, TurnPipeline, TurnRequest, VoiceError,
    VoiceResult,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_test::{assert_err, assert_ok};

struct ScriptedStt {
    replies: Mutex<VecDeque<VoiceResult<Transcript>>>,
    calls: AtomicU32,
}

impl ScriptedStt {
    fn new(replies: Vec<VoiceResult<Transcript>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn saying(text: &str) -> Arc<Self> {
        Self::new((0..16).map(|_| Ok(Transcript::text(text))).collect())
    }
}

#[async_trait]
impl SttBackend for ScriptedStt {
    async fn transcribe(&self, _audio: &[u8], _language_hint: Option<&str>) -> VoiceResult<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Transcript::text("fallback answer")))
    }
}

const TURN_REPLY: &str = r#"{"reply":"How did you measure the improvement?","judgment":{"relevance":4,"clarity":4,"depth":3,"inner_thought":"solid","follow_up":true}}"#;

const RUBRIC: &str = r#"```json
{
  "structure": {"score": 4, "reason": "clear STAR answers"},
  "expertise": {"score": 3, "reason": "adequate depth"},
  "attitude": {"score": 4, "reason": "engaged"},
  "fit": {"score": 3, "reason": "some alignment"},
  "growth": {"score": 4, "reason": "reflective"}
}
```"#;

struct ScriptedLlm {
    replies: Mutex<VecDeque<VoiceResult<String>>>,
    delay: Option<Duration>,
    evaluation: String,
    calls: AtomicU32,
}

impl ScriptedLlm {
    fn new(replies: Vec<VoiceResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            delay: None,
            evaluation: RUBRIC.to_string(),
            calls: AtomicU32::new(0),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(vec![])
        }
    }
}

#[async_trait]
impl DialogueBackend for ScriptedLlm {
    async fn complete(&self, request: &DialogueRequest) -> VoiceResult<String> {
        if request.system == EVALUATION_SYSTEM {
            return Ok(self.evaluation.clone());
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(TURN_REPLY.to_string()))
    }
}

struct ScriptedTts {
    chunks: Vec<Vec<u8>>,
}

impl ScriptedTts {
    fn three() -> Arc<Self> {
        Arc::new(Self {
            chunks: vec![vec![1u8; 10], vec![2u8; 20], vec![3u8; 30]],
        })
    }
}

#[async_trait]
impl TtsBackend for ScriptedTts {
    async fn synthesize_stream(&self, _text: &str, _voice: &str) -> VoiceResult<AudioStream> {
        let items: Vec<VoiceResult<Vec<u8>>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(stream::iter(items).boxed())
    }
}

fn pipeline(
    stt: Arc<dyn SttBackend>,
    llm: Arc<dyn DialogueBackend>,
    mode: PipelineMode,
) -> Arc<TurnPipeline> {
    let config = PipelineConfig {
        mode,
        ..PipelineConfig::default()
    };
    Arc::new(TurnPipeline::new(stt, llm, ScriptedTts::three(), config))
}

fn job() -> JobDescriptor {
    JobDescriptor {
        title: "Backend Engineer".to_string(),
        company: "Acme".to_string(),
        description: "Own the ingestion service.".to_string(),
    }
}

fn request() -> TurnRequest {
    let roster = InterviewerRoster::standard();
    TurnRequest {
        audio: vec![0u8; 64],
        interviewer: roster.profiles()[0].clone(),
        job: job(),
        difficulty: Difficulty::Mid,
        history: vec![],
        voice: None,
        params: GenerationParams::default(),
        document_context: None,
        keywords: vec![],
        language_hint: None,
    }
}

async fn drain(events: mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    ReceiverStream::new(events).collect().await
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("panel=debug")
        .with_test_writer()
        .try_init();
}

fn kinds(events: &[PipelineEvent]) -> Vec<EventType> {
    events.iter().map(|e| e.kind).collect()
}

fn error_kind(events: &[PipelineEvent]) -> Option<String> {
    events
        .iter()
        .find(|e| e.kind == EventType::Error)
        .and_then(|e| e.data.as_ref())
        .and_then(|d| d["kind"].as_str())
        .map(str::to_string)
}

#[tokio::test]
async fn overlap_mode_streams_chunks_after_reply() {
    init_tracing();
    let p = pipeline(
        ScriptedStt::saying("I cut p99 latency by half."),
        Arc::new(ScriptedLlm::new(vec![])),
        PipelineMode::Overlap,
    );
    let handle = p.start(request());
    let events = drain(handle.events).await;
    let output = assert_ok!(handle.join.await.unwrap());

    assert_eq!(
        kinds(&events),
        vec![
            EventType::SttStart,
            EventType::SttComplete,
            EventType::LlmStart,
            EventType::LlmComplete,
            EventType::TtsStart,
            EventType::TtsChunk,
            EventType::TtsChunk,
            EventType::TtsChunk,
            EventType::TtsComplete,
        ]
    );
    assert!(events.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));

    let llm_done = events.iter().position(|e| e.kind == EventType::LlmComplete).unwrap();
    let first_chunk = events.iter().position(|e| e.kind == EventType::TtsChunk).unwrap();
    assert!(first_chunk > llm_done);

    let second = events[first_chunk + 1].data.as_ref().unwrap();
    assert_eq!(second["index"], 1);
    assert_eq!(BASE64.decode(second["audio"].as_str().unwrap()).unwrap(), vec![2u8; 20]);

    assert_eq!(output.transcript, "I cut p99 latency by half.");
    assert_eq!(output.reply.text, "How did you measure the improvement?");
    assert!(output.reply.judgment.is_some());
    assert_eq!((output.audio_chunks, output.audio_bytes), (3, 60));
}

#[tokio::test]
async fn sequential_mode_delivers_one_chunk() {
    let p = pipeline(
        ScriptedStt::saying("answer"),
        Arc::new(ScriptedLlm::new(vec![])),
        PipelineMode::Sequential,
    );
    let handle = p.start(request());
    let events = drain(handle.events).await;
    let chunks: Vec<_> = events.iter().filter(|e| e.kind == EventType::TtsChunk).collect();
    assert_eq!(chunks.len(), 1);
    let audio = BASE64
        .decode(chunks[0].data.as_ref().unwrap()["audio"].as_str().unwrap())
        .unwrap();
    assert_eq!(audio.len(), 60);
    assert_eq!(events.last().map(|e| e.kind), Some(EventType::TtsComplete));
}

#[tokio::test]
async fn auth_failure_in_transcription_is_not_retried() {
    let stt = ScriptedStt::new(vec![Err(VoiceError::upstream(
        Phase::Transcription,
        FailureClass::Auth,
        "401",
    ))]);
    let p = pipeline(stt.clone(), Arc::new(ScriptedLlm::new(vec![])), PipelineMode::Overlap);
    let handle = p.start(request());
    let events = drain(handle.events).await;

    assert_eq!(kinds(&events), vec![EventType::SttStart, EventType::Error]);
    assert_eq!(error_kind(&events).as_deref(), Some("upstream_transcription_failure"));
    assert_eq!(stt.calls.load(Ordering::SeqCst), 1);

    let failure = assert_err!(handle.join.await.unwrap());
    assert!(failure.transcript.is_none());
}

#[tokio::test]
async fn empty_transcript_fails_the_turn() {
    let p = pipeline(
        ScriptedStt::new(vec![Ok(Transcript::text("   "))]),
        Arc::new(ScriptedLlm::new(vec![])),
        PipelineMode::Overlap,
    );
    let handle = p.start(request());
    let events = drain(handle.events).await;
    assert_eq!(error_kind(&events).as_deref(), Some("upstream_transcription_failure"));
    assert!(!events.iter().any(|e| e.kind == EventType::LlmStart));
}

#[tokio::test(start_paused = true)]
async fn transient_generation_failures_are_retried() {
    let transient = || Err(VoiceError::upstream(Phase::Generation, FailureClass::Transient, "503"));
    let llm = Arc::new(ScriptedLlm::new(vec![transient(), transient()]));
    let p = pipeline(ScriptedStt::saying("answer"), llm.clone(), PipelineMode::Overlap);
    let handle = p.start(request());
    let events = drain(handle.events).await;

    assert!(error_kind(&events).is_none());
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    assert_eq!(events.last().map(|e| e.kind), Some(EventType::TtsComplete));
}

#[tokio::test(start_paused = true)]
async fn slow_generation_times_out() {
    let llm = Arc::new(ScriptedLlm::slow(Duration::from_secs(60)));
    let p = pipeline(ScriptedStt::saying("answer"), llm.clone(), PipelineMode::Overlap);
    let handle = p.start(request());
    let events = drain(handle.events).await;

    assert_eq!(error_kind(&events).as_deref(), Some("timeout"));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    assert!(!events.iter().any(|e| e.kind == EventType::TtsStart));

    let failure = assert_err!(handle.join.await.unwrap());
    assert_eq!(failure.transcript.as_deref(), Some("answer"));
}

#[tokio::test]
async fn cancel_during_generation_stops_all_events() {
    let p = pipeline(
        ScriptedStt::saying("answer"),
        Arc::new(ScriptedLlm::slow(Duration::from_secs(30))),
        PipelineMode::Overlap,
    );
    let mut handle = p.start(request());
    let mut seen = Vec::new();
    while let Some(ev) = handle.events.recv().await {
        let kind = ev.kind;
        seen.push(ev);
        if kind == EventType::LlmStart {
            break;
        }
    }
    handle.cancel();
    assert!(handle.events.recv().await.is_none());
    assert_eq!(seen.last().map(|e| e.kind), Some(EventType::LlmStart));

    let failure = assert_err!(handle.join.await.unwrap());
    assert_eq!(failure.error, VoiceError::Cancelled);
}

fn services(llm: Arc<dyn DialogueBackend>, config: &PanelConfig) -> PanelServices {
    PanelServices::new(ScriptedStt::saying("I led the migration."), llm, ScriptedTts::three(), config).unwrap()
}

fn setup() -> InterviewSetup {
    InterviewSetup {
        job: job(),
        seed: Some(7),
        ..Default::default()
    }
}

#[tokio::test]
async fn completed_turn_advances_session_and_rotates() {
    let services = services(Arc::new(ScriptedLlm::new(vec![])), &PanelConfig::default());
    let orch = InterviewOrchestrator::new(setup(), &services).unwrap();
    let mut updates = orch.subscribe();
    let first = orch.snapshot().active_interviewer;
    assert_eq!(orch.snapshot().status, SessionStatus::Ready);

    let handle = orch.start_turn(vec![1, 2, 3], TurnOptions::default()).unwrap();
    let events = drain(handle.events).await;
    assert_eq!(events.last().map(|e| e.kind), Some(EventType::TtsComplete));

    let snap = orch.snapshot();
    assert_eq!(snap.status, SessionStatus::Active);
    assert_eq!(snap.turn_count, 1);
    assert_eq!(snap.message_count, 2);
    assert_ne!(snap.active_interviewer, first);
    assert!(snap.timer.active);

    match updates.recv().await.unwrap() {
        SessionEvent::TurnCompleted { turn_count, next_interviewer, .. } => {
            assert_eq!(turn_count, 1);
            assert_eq!(next_interviewer, snap.active_interviewer);
        }
        other => panic!("unexpected {:?}", other),
    }

    // Next turn starts straight away and comes from the new interviewer.
    let handle = orch.start_turn(vec![4], TurnOptions::default()).unwrap();
    let events = drain(handle.events).await;
    let llm_start = events.iter().find(|e| e.kind == EventType::LlmStart).unwrap();
    assert_eq!(
        llm_start.data.as_ref().unwrap()["interviewer"],
        serde_json::to_value(snap.active_interviewer).unwrap()
    );
    assert_eq!(orch.snapshot().turn_count, 2);
}

#[tokio::test]
async fn failed_turn_keeps_session_active() {
    let llm = Arc::new(ScriptedLlm::new(vec![Err(VoiceError::upstream(
        Phase::Generation,
        FailureClass::Auth,
        "401",
    ))]));
    let services = services(llm, &PanelConfig::default());
    let orch = InterviewOrchestrator::new(setup(), &services).unwrap();
    let first = orch.snapshot().active_interviewer;

    let handle = orch.start_turn(vec![1], TurnOptions::default()).unwrap();
    let events = drain(handle.events).await;
    assert_eq!(error_kind(&events).as_deref(), Some("upstream_generation_failure"));

    let snap = orch.snapshot();
    assert_eq!(snap.status, SessionStatus::Active);
    assert_eq!(snap.turn_count, 0);
    assert_eq!(snap.message_count, 1);
    assert_eq!(snap.active_interviewer, first);
    assert_eq!(orch.transcript()[0].content, "I led the migration.");

    // Nothing was completed, so there is nothing to evaluate.
    assert_eq!(orch.end().await.unwrap(), None);
    assert_eq!(orch.snapshot().status, SessionStatus::Ended);
}

#[tokio::test]
async fn concurrent_turns_are_rejected() {
    let services = services(Arc::new(ScriptedLlm::slow(Duration::from_secs(30))), &PanelConfig::default());
    let orch = InterviewOrchestrator::new(setup(), &services).unwrap();

    let handle = orch.start_turn(vec![1], TurnOptions::default()).unwrap();
    let second = orch.start_turn(vec![2], TurnOptions::default());
    assert_eq!(
        second.err().map(|e| e.kind()),
        Some(ErrorKind::IllegalStateTransition)
    );
    assert_eq!(orch.snapshot().status, SessionStatus::Processing);
    assert!(orch.pause().is_err());

    assert!(orch.cancel_turn());
    let events = drain(handle.events).await;
    assert!(error_kind(&events).is_none());

    let snap = orch.snapshot();
    assert_eq!(snap.status, SessionStatus::Active);
    assert_eq!(snap.turn_count, 0);
    assert!(!orch.cancel_turn());
}

#[tokio::test]
async fn end_produces_final_report() {
    let services = services(Arc::new(ScriptedLlm::new(vec![])), &PanelConfig::default());
    let orch = InterviewOrchestrator::new(setup(), &services).unwrap();
    let handle = orch.start_turn(vec![1], TurnOptions::default()).unwrap();
    drain(handle.events).await;

    let report = orch.end().await.unwrap().expect("one turn was completed");
    assert_eq!(report.report.overall_score, 64);
    assert_eq!(report.report.pass_status, PassStatus::Borderline);
    assert_eq!(report.persona_views.len(), 3);
    assert_eq!(orch.snapshot().status, SessionStatus::Ended);

    let after = orch.start_turn(vec![1], TurnOptions::default());
    assert_eq!(after.err().map(|e| e.kind()), Some(ErrorKind::IllegalStateTransition));
    assert!(orch.end().await.is_err());
}

#[tokio::test]
async fn malformed_evaluation_is_surfaced() {
    let llm = ScriptedLlm {
        evaluation: r#"{"structure": {"score": 7, "reason": "off scale"}}"#.to_string(),
        ..ScriptedLlm::new(vec![])
    };
    let services = services(Arc::new(llm), &PanelConfig::default());
    let orch = InterviewOrchestrator::new(setup(), &services).unwrap();
    let handle = orch.start_turn(vec![1], TurnOptions::default()).unwrap();
    drain(handle.events).await;

    let err = orch.end().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedStructuredOutput);
}

#[tokio::test]
async fn pause_and_resume_between_turns() {
    let services = services(Arc::new(ScriptedLlm::new(vec![])), &PanelConfig::default());
    let orch = InterviewOrchestrator::new(setup(), &services).unwrap();
    // Not started yet.
    assert!(orch.pause().is_err());

    let handle = orch.start_turn(vec![1], TurnOptions::default()).unwrap();
    drain(handle.events).await;

    assert_eq!(orch.pause().unwrap().status, SessionStatus::Paused);
    assert!(orch.start_turn(vec![1], TurnOptions::default()).is_err());
    assert!(!orch.tick().unwrap().ticked);
    assert_eq!(orch.resume().unwrap().status, SessionStatus::Active);
    assert!(orch.tick().unwrap().ticked);
}

#[tokio::test(start_paused = true)]
async fn timer_expiry_ends_session_with_auto_submit() {
    let mut config = PanelConfig::default();
    config.session.turn_budget_secs = 3;
    config.session.warning_threshold_secs = 1;
    config.session.auto_submit_on_timeout = true;
    let services = services(Arc::new(ScriptedLlm::new(vec![])), &config);
    let orch = InterviewOrchestrator::new(setup(), &services).unwrap();

    let handle = orch.start_turn(vec![1], TurnOptions::default()).unwrap();
    drain(handle.events).await;
    let mut updates = orch.subscribe();

    orch.spawn_timer();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(orch.snapshot().status, SessionStatus::Ended);

    let mut saw_warning = false;
    let mut saw_expiry = false;
    while let Ok(event) = updates.try_recv() {
        match event {
            SessionEvent::TimerWarning { .. } => saw_warning = true,
            SessionEvent::TimerExpired { ended } => saw_expiry = ended,
            _ => {}
        }
    }
    assert!(saw_warning);
    assert!(saw_expiry);

    let report = orch.evaluate().await.unwrap();
    assert!(report.is_some());
}

#[tokio::test(start_paused = true)]
async fn idle_clock_ignores_ticks_and_resets_on_turns() {
    let services = services(Arc::new(ScriptedLlm::new(vec![])), &PanelConfig::default());
    let orch = InterviewOrchestrator::new(setup(), &services).unwrap();
    orch.spawn_timer();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(orch.idle_for() >= Duration::from_secs(30));
    assert!(!orch.is_busy());

    let handle = orch.start_turn(vec![1], TurnOptions::default()).unwrap();
    assert!(orch.is_busy());
    drain(handle.events).await;
    assert!(!orch.is_busy());
    assert!(orch.idle_for() < Duration::from_secs(1));

    // The running timer does not count as activity.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(orch.idle_for() >= Duration::from_secs(10));
}
