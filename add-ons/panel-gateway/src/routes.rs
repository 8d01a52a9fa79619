//! Interview routes.
//!
//! | Route | Admission category |
//! |---|---|
//! | `POST /api/v1/interviews` | start_interview (daily quota) |
//! | `POST /api/v1/interviews/:id/turns` | turn_message + speech_synthesis |
//! | `POST /api/v1/interviews/:id/{pause,resume,cancel}` | turn_message |
//! | `POST /api/v1/interviews/:id/end` | evaluation |

use crate::error::{apply_headers, ApiError};
use crate::state::{AppState, USER_ID_HEADER};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use panel_core::{AdmissionDecision, PanelError, RequestCategory, SessionStatus};
use panel_voice::{InterviewOrchestrator, InterviewSetup, TurnOptions};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Attach the decision's rate-limit headers to an error raised after admission.
fn rated<'a, E: Into<ApiError>>(decision: &'a AdmissionDecision) -> impl FnOnce(E) -> ApiError + 'a {
    move |e| e.into().with_headers(decision.headers())
}

fn with_rate_headers(decision: &AdmissionDecision, body: impl IntoResponse) -> Response {
    let mut resp = body.into_response();
    apply_headers(resp.headers_mut(), &decision.headers());
    resp
}

/// GET /api/v1/health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.maybe_evict();
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.len(),
        "admission_keys": state.guard.tracked_keys(),
        "production": state.config.production,
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

/// POST /api/v1/interviews – create a session (ready) and start its turn timer.
pub async fn create_interview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut setup): Json<InterviewSetup>,
) -> Result<Response, ApiError> {
    if setup.user_id.is_none() {
        setup.user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }
    if setup.job.title.trim().is_empty() {
        return Err(PanelError::Config("job.title is required".to_string()).into());
    }
    state.maybe_evict();
    let decision = state.admit(&headers, RequestCategory::StartInterview)?;
    let orch = InterviewOrchestrator::new(setup, &state.services).map_err(rated(&decision))?;
    orch.spawn_timer();
    let snapshot = orch.snapshot();
    state.sessions.insert(snapshot.id, orch);
    tracing::info!(target: "panel::gateway", session = %snapshot.id, "interview started");
    Ok(with_rate_headers(&decision, (StatusCode::CREATED, Json(snapshot))))
}

/// GET /api/v1/interviews/:id
pub async fn get_interview(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let orch = state.session(id)?;
    Ok(Json(orch.snapshot()).into_response())
}

/// JSON turn body; raw audio bodies use default options.
#[derive(Debug, Deserialize)]
struct TurnBody {
    /// Base64-encoded audio.
    audio: String,
    #[serde(flatten)]
    options: TurnOptions,
}

fn parse_turn_body(headers: &HeaderMap, body: &Bytes) -> Result<(Vec<u8>, TurnOptions), ApiError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    let (audio, options) = if is_json {
        let parsed: TurnBody = serde_json::from_slice(body)
            .map_err(|e| ApiError::bad_request(format!("invalid turn body: {}", e)))?;
        let audio = BASE64
            .decode(parsed.audio.trim())
            .map_err(|e| ApiError::bad_request(format!("audio is not valid base64: {}", e)))?;
        (audio, parsed.options)
    } else {
        (body.to_vec(), TurnOptions::default())
    };
    if audio.is_empty() {
        return Err(ApiError::bad_request("audio payload is empty"));
    }
    Ok((audio, options))
}

/// POST /api/v1/interviews/:id/turns – run one turn and stream its events over SSE.
/// Each SSE message is named after the event type and carries the event JSON.
pub async fn post_turn(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let orch = state.session(id)?;
    let (audio, options) = parse_turn_body(&headers, &body)?;
    let decision = state.admit_all(
        &headers,
        &[RequestCategory::TurnMessage, RequestCategory::SpeechSynthesis],
    )?;

    let mut handle = orch.start_turn(audio, options).map_err(rated(&decision))?;
    let stream = async_stream::stream! {
        // A client that disconnects cancels the turn.
        let _cancel_on_drop = handle.cancel.clone().drop_guard();
        while let Some(event) = handle.events.recv().await {
            let sse = Event::default()
                .event(event.kind.as_str())
                .json_data(&event)
                .unwrap_or_else(|_| Event::default().data("{}"));
            yield Ok::<Event, Infallible>(sse);
        }
    };
    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    );
    Ok(with_rate_headers(&decision, sse))
}

/// POST /api/v1/interviews/:id/pause
pub async fn pause_interview(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let orch = state.session(id)?;
    let decision = state.admit(&headers, RequestCategory::TurnMessage)?;
    let snapshot = orch.pause().map_err(rated(&decision))?;
    Ok(with_rate_headers(&decision, Json(snapshot)))
}

/// POST /api/v1/interviews/:id/resume
pub async fn resume_interview(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let orch = state.session(id)?;
    let decision = state.admit(&headers, RequestCategory::TurnMessage)?;
    let snapshot = orch.resume().map_err(rated(&decision))?;
    Ok(with_rate_headers(&decision, Json(snapshot)))
}

/// POST /api/v1/interviews/:id/cancel – cancel the running turn, if any.
pub async fn cancel_turn(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let orch = state.session(id)?;
    let decision = state.admit(&headers, RequestCategory::TurnMessage)?;
    let cancelled = orch.cancel_turn();
    Ok(with_rate_headers(
        &decision,
        Json(serde_json::json!({ "cancelled": cancelled })),
    ))
}

/// POST /api/v1/interviews/:id/end – end and evaluate. A session whose evaluation failed
/// stays registered so the call can be retried.
pub async fn end_interview(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let orch: Arc<InterviewOrchestrator> = state.session(id)?;
    let decision = state.admit(&headers, RequestCategory::Evaluation)?;
    let result = if orch.snapshot().status == SessionStatus::Ended {
        orch.evaluate().await
    } else {
        orch.end().await
    };
    let report = result.map_err(rated(&decision))?;
    state.sessions.remove(&id);
    let body = serde_json::json!({
        "session": orch.snapshot(),
        "report": report,
    });
    Ok(with_rate_headers(&decision, Json(body)))
}
