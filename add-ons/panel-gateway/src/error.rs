//! HTTP error envelope: `{"error": {"kind": ..., "message": ...}}` plus any rate-limit headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use panel_core::{ErrorKind, PanelError};
use panel_voice::VoiceError;
use uuid::Uuid;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    headers: Vec<(&'static str, String)>,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::RateLimited | ErrorKind::DailyQuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::BotDetected => StatusCode::FORBIDDEN,
        ErrorKind::IllegalStateTransition | ErrorKind::Cancelled => StatusCode::CONFLICT,
        ErrorKind::Configuration => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::UpstreamTranscriptionFailure
        | ErrorKind::UpstreamGenerationFailure
        | ErrorKind::UpstreamSynthesisFailure
        | ErrorKind::MalformedStructuredOutput => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl ApiError {
    pub fn not_found(id: Uuid) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message: format!("interview {} not found", id),
            headers: Vec::new(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: message.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(&'static str, String)>) -> Self {
        self.headers = headers;
        self
    }
}

impl From<VoiceError> for ApiError {
    fn from(err: VoiceError) -> Self {
        let kind = err.kind();
        let message = match &err {
            // Candidate-facing wording for upstream trouble; internals stay in the log.
            VoiceError::Upstream { .. } | VoiceError::Timeout { .. } => {
                tracing::warn!(target: "panel::gateway", error = %err, "upstream failure");
                err.user_message()
            }
            _ => err.to_string(),
        };
        Self {
            status: status_for(kind),
            kind: kind.as_str(),
            message,
            headers: Vec::new(),
        }
    }
}

impl From<PanelError> for ApiError {
    fn from(err: PanelError) -> Self {
        VoiceError::from(err).into()
    }
}

pub(crate) fn apply_headers(target: &mut HeaderMap, headers: &[(&'static str, String)]) {
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            target.insert(name, value);
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": { "kind": self.kind, "message": self.message }
        }));
        let mut resp = (self.status, body).into_response();
        apply_headers(resp.headers_mut(), &self.headers);
        resp
    }
}
