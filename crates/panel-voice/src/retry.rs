//! Per-call timeout, cancellation and bounded exponential backoff for upstream calls.

use crate::error::{Phase, VoiceError, VoiceResult};
use panel_core::PipelineConfig;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// No retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// `base * 2^(attempt-1)` for the wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Race `fut` against the token.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = VoiceResult<T>>,
) -> VoiceResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(VoiceError::Cancelled),
        r = fut => r,
    }
}

/// Race `fut` against the token and a deadline.
pub async fn within<T>(
    phase: Phase,
    budget: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = VoiceResult<T>>,
) -> VoiceResult<T> {
    cancellable(cancel, async {
        match tokio::time::timeout(budget, fut).await {
            Ok(r) => r,
            Err(_) => Err(VoiceError::Timeout { phase, budget }),
        }
    })
    .await
}

/// Run `op` with a per-attempt `budget`, retrying retryable failures with backoff.
/// Auth and validation failures return immediately.
pub async fn with_retry<T, F, Fut>(
    phase: Phase,
    policy: RetryPolicy,
    budget: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> VoiceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VoiceResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match within(phase, budget, cancel, op()).await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if !err.is_retryable() || attempt >= policy.max_attempts {
            return Err(err);
        }
        let delay = policy.delay_after(attempt);
        warn!(
            target: "panel::pipeline",
            phase = phase.as_str(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying upstream call"
        );
        cancellable(cancel, async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await?;
    }
}
