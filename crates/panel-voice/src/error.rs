//! Error types for the turn pipeline and its upstream services

use panel_core::{ErrorKind, PanelError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Which upstream call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Transcription,
    Generation,
    Synthesis,
    Evaluation,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Transcription => "transcription",
            Phase::Generation => "generation",
            Phase::Synthesis => "synthesis",
            Phase::Evaluation => "evaluation",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure category; only `Transient` is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network errors, 408/429/5xx.
    Transient,
    /// 401/403: bad or missing credentials.
    Auth,
    /// 4xx request problems and unusable responses.
    Validation,
    Other,
}

impl FailureClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 425 | 429 | 500..=599 => FailureClass::Transient,
            401 | 403 => FailureClass::Auth,
            400..=499 => FailureClass::Validation,
            _ => FailureClass::Other,
        }
    }
}

/// Errors that can occur while running a turn or evaluating a session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    #[error("Upstream {phase} failure ({class:?}): {message}")]
    Upstream {
        phase: Phase,
        class: FailureClass,
        message: String,
    },

    #[error("Upstream {phase} timed out after {}ms", .budget.as_millis())]
    Timeout { phase: Phase, budget: Duration },

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] PanelError),
}

impl VoiceError {
    pub fn upstream(phase: Phase, class: FailureClass, message: impl Into<String>) -> Self {
        VoiceError::Upstream {
            phase,
            class,
            message: message.into(),
        }
    }

    /// Classify a transport-level reqwest error.
    pub fn from_reqwest(phase: Phase, err: reqwest::Error) -> Self {
        let class = if err.is_timeout() || err.is_connect() || err.is_request() {
            FailureClass::Transient
        } else if let Some(status) = err.status() {
            FailureClass::from_status(status.as_u16())
        } else if err.is_decode() {
            FailureClass::Validation
        } else {
            FailureClass::Other
        };
        VoiceError::upstream(phase, class, err.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VoiceError::Upstream { phase, .. } => match phase {
                Phase::Transcription => ErrorKind::UpstreamTranscriptionFailure,
                Phase::Synthesis => ErrorKind::UpstreamSynthesisFailure,
                Phase::Generation | Phase::Evaluation => ErrorKind::UpstreamGenerationFailure,
            },
            VoiceError::Timeout { .. } => ErrorKind::Timeout,
            VoiceError::Cancelled => ErrorKind::Cancelled,
            VoiceError::Config(_) => ErrorKind::Configuration,
            VoiceError::Core(e) => e.kind(),
        }
    }

    /// Only timeouts and transient upstream failures are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VoiceError::Timeout { .. }
                | VoiceError::Upstream {
                    class: FailureClass::Transient,
                    ..
                }
        )
    }

    /// Short message fit for the candidate.
    pub fn user_message(&self) -> String {
        match self {
            VoiceError::Upstream { phase, .. } => match phase {
                Phase::Transcription => "We couldn't understand the audio. Please try answering again.".to_string(),
                Phase::Generation | Phase::Evaluation => {
                    "The interviewer couldn't respond just now. Please try again.".to_string()
                }
                Phase::Synthesis => "The interviewer's voice failed to play. Please try again.".to_string(),
            },
            VoiceError::Timeout { phase, .. } => {
                format!("The {} service took too long. Please try again.", phase)
            }
            VoiceError::Cancelled => "The turn was cancelled.".to_string(),
            other => other.to_string(),
        }
    }
}
