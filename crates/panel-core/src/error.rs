//! Error taxonomy shared by the admission layer, session machine, scoring engine and pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for core operations
pub type PanelResult<T> = Result<T, PanelError>;

/// Stable, wire-visible error category. Serialized names are part of the event contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    BotDetected,
    DailyQuotaExceeded,
    UpstreamTranscriptionFailure,
    UpstreamGenerationFailure,
    UpstreamSynthesisFailure,
    MalformedStructuredOutput,
    IllegalStateTransition,
    Timeout,
    Cancelled,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BotDetected => "bot_detected",
            ErrorKind::DailyQuotaExceeded => "daily_quota_exceeded",
            ErrorKind::UpstreamTranscriptionFailure => "upstream_transcription_failure",
            ErrorKind::UpstreamGenerationFailure => "upstream_generation_failure",
            ErrorKind::UpstreamSynthesisFailure => "upstream_synthesis_failure",
            ErrorKind::MalformedStructuredOutput => "malformed_structured_output",
            ErrorKind::IllegalStateTransition => "illegal_state_transition",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Configuration => "configuration",
        }
    }

    /// Admission failures end the request before any pipeline work starts.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::BotDetected | ErrorKind::DailyQuotaExceeded
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the core (no network I/O happens here).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PanelError {
    #[error("Rate limit exceeded for {category}; retry after {retry_after_secs}s")]
    RateLimited {
        category: String,
        retry_after_secs: u64,
    },

    #[error("Request rejected as automated traffic (confidence {confidence:.2})")]
    BotDetected { confidence: f32 },

    #[error("Daily interview quota of {limit} reached; resets at UTC midnight")]
    DailyQuotaExceeded { limit: u32, retry_after_secs: u64 },

    #[error("Illegal session transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Malformed structured output: {0}")]
    MalformedOutput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PanelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PanelError::RateLimited { .. } => ErrorKind::RateLimited,
            PanelError::BotDetected { .. } => ErrorKind::BotDetected,
            PanelError::DailyQuotaExceeded { .. } => ErrorKind::DailyQuotaExceeded,
            PanelError::IllegalTransition { .. } => ErrorKind::IllegalStateTransition,
            PanelError::MalformedOutput(_) => ErrorKind::MalformedStructuredOutput,
            PanelError::Config(_) => ErrorKind::Configuration,
        }
    }

    pub(crate) fn illegal(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        PanelError::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<config::ConfigError> for PanelError {
    fn from(err: config::ConfigError) -> Self {
        PanelError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_to_taxonomy_names() {
        let json = serde_json::to_string(&ErrorKind::UpstreamSynthesisFailure).unwrap();
        assert_eq!(json, "\"upstream_synthesis_failure\"");
        assert_eq!(ErrorKind::IllegalStateTransition.as_str(), "illegal_state_transition");
    }

    #[test]
    fn admission_kinds() {
        assert!(PanelError::BotDetected { confidence: 0.9 }.kind().is_admission());
        assert!(!PanelError::MalformedOutput("x".into()).kind().is_admission());
    }
}
