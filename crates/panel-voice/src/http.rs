//! Shared plumbing for the OpenAI-compatible HTTP backends.

use crate::error::{FailureClass, Phase, VoiceError, VoiceResult};
use std::time::Duration;

pub(crate) const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

/// First non-empty key among `primary`, `PANEL_API_KEY`, `OPENAI_API_KEY`.
pub(crate) fn env_api_key(primary: &str) -> Option<String> {
    [primary, "PANEL_API_KEY", "OPENAI_API_KEY"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

pub(crate) fn env_or(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Client without an overall timeout: the pipeline imposes per-phase budgets itself.
pub(crate) fn build_client() -> VoiceResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| VoiceError::Config(format!("HTTP client: {}", e)))
}

/// Turn a non-2xx response into a classified upstream error.
pub(crate) async fn check_status(phase: Phase, res: reqwest::Response) -> VoiceResult<reqwest::Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(300).collect();
    Err(VoiceError::upstream(
        phase,
        FailureClass::from_status(status.as_u16()),
        format!("API error {}: {}", status, snippet),
    ))
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "/audio/speech"),
            "https://api.openai.com/v1/audio/speech"
        );
    }
}
