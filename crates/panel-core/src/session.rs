//! **SessionStateMachine**: Lifecycle, transcript, turn count, active interviewer and the
//! per-turn timer of one interview.
//!
//! ```text
//! idle ──configure──▶ ready ──begin_turn──▶ active ⇄ paused
//!                                             │  ▲        │
//!                                  submit_turn│  │complete_turn / fail_turn
//!                                             ▼  │        │
//!                                          processing     │
//!                                             active/paused ──end──▶ ended
//! ```
//!
//! Every illegal request returns `PanelError::IllegalTransition`; nothing is silently ignored.
//! The machine holds no lock of its own; the owner serialises access.

use crate::config::SessionConfig;
use crate::error::{PanelError, PanelResult};
use crate::interviewer::InterviewerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Candidate,
    Interviewer,
    System,
}

/// Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interviewer: Option<InterviewerId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub total_secs: u32,
    pub remaining_secs: u32,
    pub warning_threshold_secs: u32,
    pub active: bool,
    pub warning: bool,
}

impl Timer {
    fn new(config: &SessionConfig) -> Self {
        Self {
            total_secs: config.turn_budget_secs,
            remaining_secs: config.turn_budget_secs,
            warning_threshold_secs: config.warning_threshold_secs.min(config.turn_budget_secs),
            active: false,
            warning: false,
        }
    }

    fn restart(&mut self) {
        self.remaining_secs = self.total_secs;
        self.warning = self.remaining_secs <= self.warning_threshold_secs;
        self.active = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Ready,
    Active,
    Paused,
    Processing,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Ready => "ready",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Processing => "processing",
            SessionStatus::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Junior,
    #[default]
    Mid,
    Senior,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Junior => "junior",
            Difficulty::Mid => "mid",
            Difficulty::Senior => "senior",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub job: JobDescriptor,
    pub difficulty: Difficulty,
    pub interviewers: Vec<InterviewerId>,
    pub messages: Vec<Message>,
    pub turn_count: u32,
    pub active_interviewer: Option<InterviewerId>,
    pub timer: Timer,
    pub status: SessionStatus,
}

impl Session {
    /// Plain-text transcript, one `Speaker: text` line per message.
    pub fn transcript_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let speaker = match (m.role, m.interviewer) {
                    (Role::Candidate, _) => "Candidate".to_string(),
                    (Role::Interviewer, Some(id)) => format!("Interviewer ({})", id),
                    (Role::Interviewer, None) => "Interviewer".to_string(),
                    (Role::System, _) => "System".to_string(),
                };
                format!("{}: {}", speaker, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickOutcome {
    /// False when the timer was not running (paused, processing, not started).
    pub ticked: bool,
    pub remaining_secs: u32,
    pub warning: bool,
    /// Set on the tick that crossed into the warning zone.
    pub warning_started: bool,
    /// Set on the tick that reached zero.
    pub timed_out: bool,
    /// Set when the timeout ended the session (auto-submit policy).
    pub ended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecorded {
    pub turn_count: u32,
    /// `max_turns` reached; the caller decides whether to end.
    pub interview_complete: bool,
}

/// Read-only view for callers and the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub status: SessionStatus,
    pub turn_count: u32,
    pub active_interviewer: Option<InterviewerId>,
    pub interviewers: Vec<InterviewerId>,
    pub timer: Timer,
    pub message_count: usize,
    pub job: JobDescriptor,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    session: Session,
    config: SessionConfig,
}

impl SessionMachine {
    pub fn new(user_id: Option<String>, config: SessionConfig) -> Self {
        Self::with_id(Uuid::new_v4(), user_id, config)
    }

    pub fn with_id(id: Uuid, user_id: Option<String>, config: SessionConfig) -> Self {
        Self {
            session: Session {
                id,
                user_id,
                job: JobDescriptor::default(),
                difficulty: Difficulty::default(),
                interviewers: Vec::new(),
                messages: Vec::new(),
                turn_count: 0,
                active_interviewer: None,
                timer: Timer::new(&config),
                status: SessionStatus::Idle,
            },
            config,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn id(&self) -> Uuid {
        self.session.id
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    pub fn timer(&self) -> Timer {
        self.session.timer
    }

    pub fn messages(&self) -> &[Message] {
        &self.session.messages
    }

    /// Last `n` messages in order.
    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let m = &self.session.messages;
        &m[m.len().saturating_sub(n)..]
    }

    pub fn active_interviewer(&self) -> Option<InterviewerId> {
        self.session.active_interviewer
    }

    /// idle → ready.
    pub fn configure(
        &mut self,
        job: JobDescriptor,
        difficulty: Difficulty,
        interviewers: Vec<InterviewerId>,
        first: InterviewerId,
    ) -> PanelResult<()> {
        self.require_status(&[SessionStatus::Idle], SessionStatus::Ready)?;
        if job.title.trim().is_empty() {
            return Err(PanelError::Config("job title must not be empty".to_string()));
        }
        if interviewers.is_empty() {
            return Err(PanelError::Config("interviewer set must not be empty".to_string()));
        }
        if !interviewers.contains(&first) {
            return Err(PanelError::Config(format!(
                "opening interviewer {} is not on the panel",
                first
            )));
        }
        let s = &mut self.session;
        s.job = job;
        s.difficulty = difficulty;
        s.interviewers = interviewers;
        s.active_interviewer = Some(first);
        s.status = SessionStatus::Ready;
        tracing::debug!(target: "panel::session", session = %s.id, "configured");
        Ok(())
    }

    /// ready → active for the first turn; on an active session restarts the timer for a new turn.
    pub fn begin_turn(&mut self) -> PanelResult<()> {
        self.require_status(&[SessionStatus::Ready, SessionStatus::Active], SessionStatus::Active)?;
        self.session.status = SessionStatus::Active;
        self.session.timer.restart();
        Ok(())
    }

    /// active → processing. The timer stops while the pipeline runs.
    pub fn submit_turn(&mut self) -> PanelResult<()> {
        self.require_status(&[SessionStatus::Active], SessionStatus::Processing)?;
        self.session.status = SessionStatus::Processing;
        self.session.timer.active = false;
        Ok(())
    }

    /// processing → active. Records the exchange and starts the next turn's timer.
    pub fn complete_turn(
        &mut self,
        candidate_text: String,
        interviewer_reply: String,
        now: DateTime<Utc>,
    ) -> PanelResult<TurnRecorded> {
        self.require_status(&[SessionStatus::Processing], SessionStatus::Active)?;
        let speaker = self.session.active_interviewer;
        self.push(Role::Candidate, candidate_text, None, now);
        self.push(Role::Interviewer, interviewer_reply, speaker, now);
        let s = &mut self.session;
        s.turn_count += 1;
        s.status = SessionStatus::Active;
        s.timer.restart();
        let interview_complete = self
            .config
            .max_turns
            .map(|max| s.turn_count >= max)
            .unwrap_or(false);
        tracing::info!(
            target: "panel::session",
            session = %s.id,
            turn = s.turn_count,
            interview_complete,
            "turn recorded"
        );
        Ok(TurnRecorded {
            turn_count: s.turn_count,
            interview_complete,
        })
    }

    /// processing → active after a failed turn. The transcription, if any, is kept so the
    /// candidate does not lose history; the turn count is unchanged.
    pub fn fail_turn(&mut self, candidate_text: Option<String>, now: DateTime<Utc>) -> PanelResult<()> {
        self.require_status(&[SessionStatus::Processing], SessionStatus::Active)?;
        if let Some(text) = candidate_text.filter(|t| !t.trim().is_empty()) {
            self.push(Role::Candidate, text, None, now);
        }
        self.session.status = SessionStatus::Active;
        self.session.timer.restart();
        Ok(())
    }

    /// active → paused. Remaining time is kept.
    pub fn pause(&mut self) -> PanelResult<()> {
        self.require_status(&[SessionStatus::Active], SessionStatus::Paused)?;
        self.session.status = SessionStatus::Paused;
        self.session.timer.active = false;
        Ok(())
    }

    /// paused → active.
    pub fn resume(&mut self) -> PanelResult<()> {
        self.require_status(&[SessionStatus::Paused], SessionStatus::Active)?;
        self.session.status = SessionStatus::Active;
        self.session.timer.active = self.session.timer.remaining_secs > 0;
        Ok(())
    }

    /// active | paused → ended.
    pub fn end(&mut self) -> PanelResult<()> {
        self.require_status(&[SessionStatus::Active, SessionStatus::Paused], SessionStatus::Ended)?;
        self.finish("explicit end");
        Ok(())
    }

    /// Change who asks next. Must be on the panel and, with more than one panelist, differ
    /// from the current interviewer.
    pub fn set_active_interviewer(&mut self, id: InterviewerId) -> PanelResult<()> {
        if self.session.status == SessionStatus::Ended {
            return Err(PanelError::illegal(SessionStatus::Ended, "set_active_interviewer"));
        }
        if !self.session.interviewers.contains(&id) {
            return Err(PanelError::Config(format!("interviewer {} is not on the panel", id)));
        }
        if self.session.interviewers.len() > 1 && self.session.active_interviewer == Some(id) {
            return Err(PanelError::illegal(
                format!("interviewer {}", id),
                format!("interviewer {}", id),
            ));
        }
        self.session.active_interviewer = Some(id);
        Ok(())
    }

    /// One wall-clock second. Only counts down while active and running.
    pub fn tick(&mut self) -> PanelResult<TickOutcome> {
        let status = self.session.status;
        if status == SessionStatus::Ended {
            return Err(PanelError::illegal(status, "tick"));
        }
        let timer = &mut self.session.timer;
        let mut out = TickOutcome {
            ticked: false,
            remaining_secs: timer.remaining_secs,
            warning: timer.warning,
            warning_started: false,
            timed_out: false,
            ended: false,
        };
        if status != SessionStatus::Active || !timer.active {
            return Ok(out);
        }

        timer.remaining_secs = timer.remaining_secs.saturating_sub(1);
        let was_warning = timer.warning;
        timer.warning = timer.remaining_secs <= timer.warning_threshold_secs;
        out.ticked = true;
        out.remaining_secs = timer.remaining_secs;
        out.warning = timer.warning;
        out.warning_started = timer.warning && !was_warning;

        if timer.remaining_secs == 0 {
            timer.active = false;
            out.timed_out = true;
            if self.config.auto_submit_on_timeout {
                self.finish("turn timer expired");
                out.ended = true;
            } else {
                tracing::info!(target: "panel::session", session = %self.session.id, "turn timer expired");
            }
        }
        Ok(out)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = &self.session;
        SessionSnapshot {
            id: s.id,
            status: s.status,
            turn_count: s.turn_count,
            active_interviewer: s.active_interviewer,
            interviewers: s.interviewers.clone(),
            timer: s.timer,
            message_count: s.messages.len(),
            job: s.job.clone(),
            difficulty: s.difficulty,
        }
    }

    fn push(&mut self, role: Role, content: String, interviewer: Option<InterviewerId>, now: DateTime<Utc>) {
        self.session.messages.push(Message {
            role,
            content,
            interviewer,
            created_at: now,
        });
    }

    fn finish(&mut self, reason: &str) {
        self.session.status = SessionStatus::Ended;
        self.session.timer.active = false;
        tracing::info!(
            target: "panel::session",
            session = %self.session.id,
            turns = self.session.turn_count,
            reason,
            "session ended"
        );
    }

    fn require_status(&self, allowed: &[SessionStatus], to: SessionStatus) -> PanelResult<()> {
        let from = self.session.status;
        if allowed.contains(&from) {
            Ok(())
        } else {
            tracing::warn!(target: "panel::session", session = %self.session.id, %from, %to, "illegal transition");
            Err(PanelError::illegal(from, to))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SessionConfig {
        SessionConfig {
            turn_budget_secs: 5,
            warning_threshold_secs: 2,
            auto_submit_on_timeout: false,
            max_turns: Some(2),
            ..SessionConfig::default()
        }
    }

    fn ready() -> SessionMachine {
        let mut m = SessionMachine::new(Some("u1".into()), cfg());
        m.configure(
            JobDescriptor {
                title: "SRE".into(),
                ..Default::default()
            },
            Difficulty::Mid,
            InterviewerId::ALL.to_vec(),
            InterviewerId::TechnicalLead,
        )
        .unwrap();
        m
    }

    #[test]
    fn warning_flag_follows_threshold() {
        let mut m = ready();
        m.begin_turn().unwrap();
        assert!(!m.tick().unwrap().warning); // 4
        let t = m.tick().unwrap(); // 3
        assert!(!t.warning);
        let t = m.tick().unwrap(); // 2
        assert!(t.warning && t.warning_started);
        assert!(!m.tick().unwrap().warning_started); // 1
    }

    #[test]
    fn timeout_without_auto_submit_only_reports() {
        let mut m = ready();
        m.begin_turn().unwrap();
        let mut last = None;
        for _ in 0..10 {
            last = Some(m.tick().unwrap());
        }
        assert_eq!(m.status(), SessionStatus::Active);
        assert_eq!(m.timer().remaining_secs, 0);
        assert!(!last.unwrap().timed_out); // reported once, on the tick that hit zero
    }

    #[test]
    fn timeout_with_auto_submit_ends() {
        let mut m = SessionMachine::new(
            None,
            SessionConfig {
                auto_submit_on_timeout: true,
                ..cfg()
            },
        );
        m.configure(
            JobDescriptor {
                title: "SRE".into(),
                ..Default::default()
            },
            Difficulty::Junior,
            vec![InterviewerId::Executive],
            InterviewerId::Executive,
        )
        .unwrap();
        m.begin_turn().unwrap();
        let outcomes: Vec<_> = (0..5).map(|_| m.tick().unwrap()).collect();
        assert!(outcomes[4].timed_out && outcomes[4].ended);
        assert_eq!(m.status(), SessionStatus::Ended);
        assert!(m.tick().is_err());
    }

    #[test]
    fn processing_blocks_pause_and_end() {
        let mut m = ready();
        m.begin_turn().unwrap();
        m.submit_turn().unwrap();
        assert!(m.pause().is_err());
        assert!(m.end().is_err());
        assert!(!m.tick().unwrap().ticked);
        let rec = m.complete_turn("hi".into(), "hello".into(), Utc::now()).unwrap();
        assert_eq!(rec.turn_count, 1);
        assert!(!rec.interview_complete);
        assert_eq!(m.messages()[1].interviewer, Some(InterviewerId::TechnicalLead));
    }

    #[test]
    fn rotation_guard_rejects_repeat() {
        let mut m = ready();
        assert!(m.set_active_interviewer(InterviewerId::TechnicalLead).is_err());
        m.set_active_interviewer(InterviewerId::HrPartner).unwrap();
        assert_eq!(m.active_interviewer(), Some(InterviewerId::HrPartner));
    }
}
