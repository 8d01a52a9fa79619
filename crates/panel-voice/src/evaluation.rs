//! End-of-session evaluation: one structured rubric call over the full transcript, then
//! deterministic scoring.

use crate::error::{Phase, VoiceError, VoiceResult};
use crate::llm::{ChatTurn, DialogueBackend, DialogueRequest, GenerationParams};
use crate::retry::{with_retry, RetryPolicy};
use panel_core::prompts::{evaluation_user_prompt, EVALUATION_SYSTEM};
use panel_core::{
    Difficulty, EvaluationScores, InterviewerId, InterviewerRoster, JobDescriptor, PipelineConfig,
    ScoreReport, ScoringEngine,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub scores: EvaluationScores,
    pub report: ScoreReport,
    /// Overall score through each panelist's own axis weights.
    pub persona_views: BTreeMap<InterviewerId, u8>,
}

pub struct SessionEvaluator {
    llm: Arc<dyn DialogueBackend>,
    engine: ScoringEngine,
    roster: InterviewerRoster,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SessionEvaluator {
    pub fn new(
        llm: Arc<dyn DialogueBackend>,
        engine: ScoringEngine,
        roster: InterviewerRoster,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            llm,
            engine,
            roster,
            timeout: Duration::from_millis(config.evaluation_timeout_ms),
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn engine(&self) -> &ScoringEngine {
        &self.engine
    }

    /// Rate the transcript on the five axes. Output that does not match the rubric schema is
    /// `malformed_structured_output`; it is neither retried nor replaced by defaults.
    pub async fn evaluate(
        &self,
        transcript: &str,
        job: &JobDescriptor,
        difficulty: Difficulty,
        cancel: &CancellationToken,
    ) -> VoiceResult<FinalReport> {
        let request = DialogueRequest {
            system: EVALUATION_SYSTEM.to_string(),
            history: vec![ChatTurn::user(evaluation_user_prompt(job, difficulty, transcript))],
            params: GenerationParams {
                temperature: Some(0.2),
                max_tokens: None,
            },
            json_mode: true,
        };
        let llm = self.llm.as_ref();
        let request = &request;
        let raw = with_retry(Phase::Evaluation, self.retry, self.timeout, cancel, move || {
            llm.complete(request)
        })
        .await?;

        let scores = EvaluationScores::from_llm_output(&raw).map_err(VoiceError::from)?;
        let report = self.engine.score(&scores);
        let persona_views = self
            .roster
            .profiles()
            .iter()
            .map(|p| (p.id, self.engine.persona_view(p, &scores)))
            .collect();
        info!(
            target: "panel::session",
            overall = report.overall_score,
            status = report.pass_status.as_str(),
            "evaluation complete"
        );
        Ok(FinalReport {
            scores,
            report,
            persona_views,
        })
    }
}
