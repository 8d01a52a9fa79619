//! panel-core: domain core for simulated multi-interviewer job interviews.
//!
//! Pure, I/O-free components shared by the voice pipeline and the gateway:
//! request admission (rate limits, daily quotas, bot heuristics), interviewer roster and
//! rotation, the session state machine, rubric scoring, and the prompt templates.
//!
//! ```text
//!  request ─▶ AdmissionGuard ─▶ SessionMachine ◀── RotationPolicy
//!                                   │ transcript
//!                                   ▼
//!                              ScoringEngine ─▶ ScoreReport
//! ```

pub mod admission;
pub mod clock;
mod config;
mod error;
pub mod interviewer;
pub mod prompts;
pub mod rotation;
pub mod scoring;
pub mod session;

pub use admission::{
    AdmissionDecision, AdmissionGuard, AdmissionRequest, AdmissionStore, BotAssessment, BotSignal,
    DailyUsage, DenialReason, Identity, MemoryStore, RateLimitRecord, RequestCategory, RequestMeta,
    Tier,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AdmissionConfig, AxisWeightConfig, PanelConfig, PipelineConfig, PipelineMode, ScoringConfig,
    SessionConfig, WindowLimit,
};
pub use error::{ErrorKind, PanelError, PanelResult};
pub use interviewer::{InterviewerId, InterviewerProfile, InterviewerRoster};
pub use rotation::RotationPolicy;
pub use scoring::{
    Axis, AxisScore, AxisWeights, Competency, CompetencyScores, EvaluationScores, PassStatus,
    ScoreReport, ScoringEngine, TurnJudgment,
};
pub use session::{
    Difficulty, JobDescriptor, Message, Role, SessionMachine, SessionSnapshot, SessionStatus,
    TickOutcome, Timer, TurnRecorded,
};
