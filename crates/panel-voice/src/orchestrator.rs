//! Per-session orchestration: binds the session machine, rotation policy, turn pipeline,
//! evaluator and the per-second turn timer.
//!
//! One turn at a time per session. The turn's event stream closes only after the session
//! state reflects the turn's outcome, so a caller that has drained the stream can start the
//! next turn immediately.

use crate::error::{VoiceError, VoiceResult};
use crate::evaluation::{FinalReport, SessionEvaluator};
use crate::events::{EventSink, PipelineEvent};
use crate::llm::{create_best_dialogue, DialogueBackend, GenerationParams};
use crate::pipeline::{TurnFailure, TurnOutput, TurnPipeline, TurnRequest};
use crate::stt::{create_best_stt, SttBackend};
use crate::tts::{create_best_tts, TtsBackend};
use panel_core::{
    Clock, Difficulty, ErrorKind, InterviewerId, InterviewerRoster, JobDescriptor, Message,
    PanelConfig, PanelError, RotationPolicy, ScoringEngine, SessionConfig, SessionMachine,
    SessionSnapshot, SessionStatus, SystemClock, TickOutcome,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Process-wide collaborators shared by every session.
#[derive(Clone)]
pub struct PanelServices {
    pub pipeline: Arc<TurnPipeline>,
    pub engine: ScoringEngine,
    pub session: SessionConfig,
    pub clock: Arc<dyn Clock>,
}

impl PanelServices {
    pub fn new(
        stt: Arc<dyn SttBackend>,
        llm: Arc<dyn DialogueBackend>,
        tts: Arc<dyn TtsBackend>,
        config: &PanelConfig,
    ) -> VoiceResult<Self> {
        Ok(Self {
            pipeline: Arc::new(TurnPipeline::new(stt, llm, tts, config.pipeline.clone())),
            engine: ScoringEngine::from_config(&config.scoring)?,
            session: config.session.clone(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Best available backends from the environment, placeholders otherwise.
    pub fn from_env(config: &PanelConfig) -> VoiceResult<Self> {
        Self::new(create_best_stt(), create_best_dialogue(), create_best_tts(), config)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Parameters for a new interview.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterviewSetup {
    #[serde(default)]
    pub user_id: Option<String>,
    pub job: JobDescriptor,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Panel subset; the full standard panel when absent.
    #[serde(default)]
    pub interviewers: Option<Vec<InterviewerId>>,
    /// Deterministic rotation (tests, replays).
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Per-turn options supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnOptions {
    pub voice: Option<String>,
    pub params: GenerationParams,
    pub document_context: Option<String>,
    pub keywords: Vec<String>,
    pub language_hint: Option<String>,
}

/// Session-level notifications (timer, turn outcomes, status changes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    TimerTick { remaining_secs: u32, warning: bool },
    TimerWarning { remaining_secs: u32 },
    TimerExpired { ended: bool },
    TurnCompleted {
        turn_count: u32,
        next_interviewer: Option<InterviewerId>,
        interview_complete: bool,
    },
    TurnFailed { kind: ErrorKind },
    StatusChanged { status: SessionStatus },
}

/// Caller's side of a running turn.
pub struct TurnHandle {
    pub events: mpsc::Receiver<PipelineEvent>,
    pub cancel: CancellationToken,
}

impl TurnHandle {
    pub fn into_stream(self) -> ReceiverStream<PipelineEvent> {
        ReceiverStream::new(self.events)
    }
}

pub struct InterviewOrchestrator {
    machine: Mutex<SessionMachine>,
    rotation: RotationPolicy,
    pipeline: Arc<TurnPipeline>,
    evaluator: SessionEvaluator,
    turn_lock: Arc<tokio::sync::Mutex<()>>,
    current_turn: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
    events: broadcast::Sender<SessionEvent>,
    clock: Arc<dyn Clock>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Last caller-driven change. Timer ticks do not count.
    last_activity: Mutex<Instant>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl InterviewOrchestrator {
    /// Build and configure a session (idle → ready).
    pub fn new(setup: InterviewSetup, services: &PanelServices) -> VoiceResult<Arc<Self>> {
        let roster = match setup.interviewers.as_deref() {
            Some(ids) => InterviewerRoster::subset(ids)?,
            None => InterviewerRoster::standard(),
        };
        let rotation = match setup.seed {
            Some(seed) => RotationPolicy::with_seed(roster.clone(), seed),
            None => RotationPolicy::new(roster.clone()),
        };
        let first = rotation.first();

        let mut machine = SessionMachine::new(setup.user_id, services.session.clone());
        machine.configure(setup.job, setup.difficulty, roster.ids(), first)?;

        let evaluator = SessionEvaluator::new(
            services.pipeline.dialogue(),
            services.engine.clone(),
            roster,
            services.pipeline.config(),
        );
        let (events, _) = broadcast::channel(64);
        info!(target: "panel::session", session = %machine.id(), first = %first, "interview created");

        Ok(Arc::new(Self {
            machine: Mutex::new(machine),
            rotation,
            pipeline: Arc::clone(&services.pipeline),
            evaluator,
            turn_lock: Arc::new(tokio::sync::Mutex::new(())),
            current_turn: Mutex::new(None),
            shutdown: CancellationToken::new(),
            events,
            clock: Arc::clone(&services.clock),
            timer: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
        }))
    }

    pub fn id(&self) -> Uuid {
        lock(&self.machine).id()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.machine).snapshot()
    }

    pub fn transcript(&self) -> Vec<Message> {
        lock(&self.machine).messages().to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    /// Time since the last turn, pause, resume, end or evaluation.
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    /// Whether a turn is in flight.
    pub fn is_busy(&self) -> bool {
        lock(&self.current_turn).is_some()
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Submit one candidate answer. Fails if a turn is already running or the session is not
    /// accepting answers (paused, ended).
    pub fn start_turn(self: &Arc<Self>, audio: Vec<u8>, options: TurnOptions) -> VoiceResult<TurnHandle> {
        let guard = Arc::clone(&self.turn_lock).try_lock_owned().map_err(|_| {
            VoiceError::Core(PanelError::IllegalTransition {
                from: SessionStatus::Processing.to_string(),
                to: "start_turn".to_string(),
            })
        })?;

        let request = {
            let mut m = lock(&self.machine);
            if m.status() == SessionStatus::Ready {
                m.begin_turn()?;
            }
            m.submit_turn()?;
            let profile = m
                .active_interviewer()
                .and_then(|id| self.rotation.roster().get(id))
                .cloned()
                .ok_or_else(|| VoiceError::Config("no active interviewer".to_string()));
            let profile = match profile {
                Ok(p) => p,
                Err(e) => {
                    let _ = m.fail_turn(None, self.clock.utc_now());
                    return Err(e);
                }
            };
            let session = m.session();
            TurnRequest {
                audio,
                interviewer: profile,
                job: session.job.clone(),
                difficulty: session.difficulty,
                history: m.recent_messages(self.pipeline.config().history_window).to_vec(),
                voice: options.voice,
                params: options.params,
                document_context: options.document_context,
                keywords: options.keywords,
                language_hint: options.language_hint,
            }
        };

        let cancel = self.shutdown.child_token();
        *lock(&self.current_turn) = Some(cancel.clone());
        self.touch();
        let (mut sink, events) = EventSink::channel(self.pipeline.config().event_buffer, cancel.clone());
        let this = Arc::clone(self);
        let token = cancel.clone();
        debug!(target: "panel::session", interviewer = %request.interviewer.id, "turn started");

        tokio::spawn(async move {
            let _turn = guard;
            let result = this.pipeline.run(request, &mut sink, &token).await;
            this.finish_turn(result);
            *lock(&this.current_turn) = None;
            sink.close();
        });

        Ok(TurnHandle { events, cancel })
    }

    fn finish_turn(&self, result: Result<TurnOutput, TurnFailure>) {
        self.touch();
        let now = self.clock.utc_now();
        let mut m = lock(&self.machine);
        match result {
            Ok(out) => match m.complete_turn(out.transcript, out.reply.text, now) {
                Ok(recorded) => {
                    if let Some(current) = m.active_interviewer() {
                        let next = self.rotation.next(current);
                        if let Err(e) = m.set_active_interviewer(next) {
                            warn!(target: "panel::session", error = %e, "rotation rejected");
                        }
                    }
                    self.publish(SessionEvent::TurnCompleted {
                        turn_count: recorded.turn_count,
                        next_interviewer: m.active_interviewer(),
                        interview_complete: recorded.interview_complete,
                    });
                }
                Err(e) => warn!(target: "panel::session", error = %e, "could not record turn"),
            },
            Err(failure) => {
                let kind = failure.error.kind();
                if let Err(e) = m.fail_turn(failure.transcript, now) {
                    warn!(target: "panel::session", error = %e, "could not record failed turn");
                }
                self.publish(SessionEvent::TurnFailed { kind });
            }
        }
    }

    /// Cancel the in-flight turn, if any. Returns whether one was running.
    pub fn cancel_turn(&self) -> bool {
        match lock(&self.current_turn).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn pause(&self) -> VoiceResult<SessionSnapshot> {
        let snapshot = {
            let mut m = lock(&self.machine);
            m.pause()?;
            m.snapshot()
        };
        self.touch();
        self.publish(SessionEvent::StatusChanged {
            status: snapshot.status,
        });
        Ok(snapshot)
    }

    pub fn resume(&self) -> VoiceResult<SessionSnapshot> {
        let snapshot = {
            let mut m = lock(&self.machine);
            m.resume()?;
            m.snapshot()
        };
        self.touch();
        self.publish(SessionEvent::StatusChanged {
            status: snapshot.status,
        });
        Ok(snapshot)
    }

    /// End the session and evaluate it. An in-flight turn is cancelled and allowed to settle
    /// first. Returns `None` when no turn was ever completed.
    pub async fn end(&self) -> VoiceResult<Option<FinalReport>> {
        self.cancel_turn();
        let _turn = self.turn_lock.lock().await;
        lock(&self.machine).end()?;
        self.touch();
        self.stop_timer();
        self.publish(SessionEvent::StatusChanged {
            status: SessionStatus::Ended,
        });
        self.evaluate().await
    }

    /// Evaluate an ended session (e.g. one ended by the timer).
    pub async fn evaluate(&self) -> VoiceResult<Option<FinalReport>> {
        let (transcript, job, difficulty, turns) = {
            let m = lock(&self.machine);
            if m.status() != SessionStatus::Ended {
                return Err(VoiceError::Core(PanelError::IllegalTransition {
                    from: m.status().to_string(),
                    to: "evaluate".to_string(),
                }));
            }
            let s = m.session();
            (s.transcript_text(), s.job.clone(), s.difficulty, s.turn_count)
        };
        self.touch();
        if turns == 0 {
            info!(target: "panel::session", "no completed turns; skipping evaluation");
            return Ok(None);
        }
        let report = self
            .evaluator
            .evaluate(&transcript, &job, difficulty, &self.shutdown)
            .await?;
        Ok(Some(report))
    }

    /// Advance the turn timer by one second and publish what changed.
    pub fn tick(&self) -> VoiceResult<TickOutcome> {
        let outcome = lock(&self.machine).tick()?;
        if outcome.ticked {
            self.publish(SessionEvent::TimerTick {
                remaining_secs: outcome.remaining_secs,
                warning: outcome.warning,
            });
        }
        if outcome.warning_started {
            self.publish(SessionEvent::TimerWarning {
                remaining_secs: outcome.remaining_secs,
            });
        }
        if outcome.timed_out {
            self.publish(SessionEvent::TimerExpired {
                ended: outcome.ended,
            });
        }
        Ok(outcome)
    }

    /// Drive [`tick`](Self::tick) once per second until the session ends or is dropped.
    /// The task never touches the turn lock, so a slow upstream call cannot stall the clock.
    pub fn spawn_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(this) = weak.upgrade() else { break };
                match this.tick() {
                    Ok(outcome) if outcome.ended => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
        if let Some(old) = lock(&self.timer).replace(handle) {
            old.abort();
        }
    }

    fn stop_timer(&self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
        }
    }
}

impl Drop for InterviewOrchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.stop_timer();
    }
}
