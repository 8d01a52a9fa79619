//! Dialogue request assembly and reply parsing.
//!
//! The request carries a bounded trailing window of the transcript, never the full history.

use crate::error::{FailureClass, Phase, VoiceError, VoiceResult};
use crate::llm::{ChatTurn, DialogueRequest, GenerationParams};
use panel_core::prompts::interviewer_system_prompt;
use panel_core::scoring::strip_code_fence;
use panel_core::{
    Difficulty, InterviewerProfile, JobDescriptor, Message, PipelineConfig, Role, TurnJudgment,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Knobs for one request, usually from `PipelineConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextLimits {
    pub history_window: usize,
    pub max_document_chars: usize,
    pub max_keywords: usize,
    pub request_judgment: bool,
}

impl ContextLimits {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            history_window: config.history_window,
            max_document_chars: config.max_document_chars,
            max_keywords: config.max_keywords,
            request_judgment: config.request_judgment,
        }
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Everything known about the turn being answered.
pub struct TurnContext<'a> {
    pub interviewer: &'a InterviewerProfile,
    pub job: &'a JobDescriptor,
    pub difficulty: Difficulty,
    pub history: &'a [Message],
    pub candidate_text: &'a str,
    pub document_context: Option<&'a str>,
    pub keywords: &'a [String],
    pub params: GenerationParams,
}

/// Cut at a char boundary, at most `max` chars.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn build_request(ctx: &TurnContext<'_>, limits: &ContextLimits) -> DialogueRequest {
    let document = ctx
        .document_context
        .map(|d| truncate_chars(d.trim(), limits.max_document_chars));
    let keywords: Vec<String> = ctx
        .keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .take(limits.max_keywords)
        .map(str::to_string)
        .collect();

    let system = interviewer_system_prompt(
        &ctx.interviewer.persona,
        &ctx.interviewer.display_name,
        ctx.job,
        ctx.difficulty,
        document,
        &keywords,
        limits.request_judgment,
    );

    let start = ctx.history.len().saturating_sub(limits.history_window);
    let mut history: Vec<ChatTurn> = ctx.history[start..]
        .iter()
        .filter_map(|m| match m.role {
            Role::Candidate => Some(ChatTurn::user(m.content.clone())),
            Role::Interviewer => Some(ChatTurn::assistant(m.content.clone())),
            Role::System => None,
        })
        .collect();
    history.push(ChatTurn::user(ctx.candidate_text.to_string()));

    DialogueRequest {
        system,
        history,
        params: ctx.params,
        json_mode: limits.request_judgment,
    }
}

/// Interviewer reply plus the optional structured judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueReply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgment: Option<TurnJudgment>,
}

/// Parse raw model output. With a judgment requested the body should be
/// `{"reply": ..., "judgment": {...}}`; plain text is accepted as the reply and a bad
/// judgment is dropped. An empty reply is an upstream generation failure.
pub fn parse_reply(raw: &str, judgment_requested: bool) -> VoiceResult<DialogueReply> {
    let mut reply = DialogueReply {
        text: raw.trim().to_string(),
        judgment: None,
    };

    if judgment_requested {
        match serde_json::from_str::<serde_json::Value>(strip_code_fence(raw)) {
            Ok(serde_json::Value::Object(obj)) => {
                reply.text = obj
                    .get("reply")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                match obj.get("judgment").map(TurnJudgment::from_value) {
                    Some(Ok(j)) => reply.judgment = Some(j),
                    Some(Err(e)) => warn!(target: "panel::pipeline", error = %e, "Dropping invalid turn judgment"),
                    None => warn!(target: "panel::pipeline", "Reply carried no judgment"),
                }
            }
            _ => warn!(target: "panel::pipeline", "Reply was not JSON; using it verbatim"),
        }
    }

    if reply.text.is_empty() {
        return Err(VoiceError::upstream(
            Phase::Generation,
            FailureClass::Validation,
            "dialogue service returned an empty reply",
        ));
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use panel_core::{InterviewerId, InterviewerRoster};

    fn msg(role: Role, content: &str) -> Message {
        Message {
            role,
            content: content.to_string(),
            interviewer: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn history_is_bounded_and_mapped() {
        let roster = InterviewerRoster::standard();
        let profile = roster.get(InterviewerId::TechnicalLead).unwrap();
        let job = JobDescriptor {
            title: "SRE".into(),
            ..Default::default()
        };
        let history: Vec<Message> = (0..20)
            .map(|i| {
                let role = if i % 2 == 0 { Role::Candidate } else { Role::Interviewer };
                msg(role, &format!("m{}", i))
            })
            .collect();
        let keywords: Vec<String> = (0..30).map(|i| format!("k{}", i)).collect();
        let doc = "x".repeat(10_000);
        let ctx = TurnContext {
            interviewer: profile,
            job: &job,
            difficulty: Difficulty::Mid,
            history: &history,
            candidate_text: "latest answer",
            document_context: Some(&doc),
            keywords: &keywords,
            params: GenerationParams::default(),
        };
        let req = build_request(&ctx, &ContextLimits::default());
        assert_eq!(req.history.len(), 9);
        assert_eq!(req.history[0].content, "m12");
        assert_eq!(req.history.last().unwrap().content, "latest answer");
        assert!(req.system.contains("k9"));
        assert!(!req.system.contains("k10"));
        assert!(!req.system.contains(&"x".repeat(4_001)));
        assert!(req.json_mode);
    }

    #[test]
    fn reply_parsing_is_lenient_on_judgment() {
        let ok = parse_reply(
            r#"{"reply":"Tell me more.","judgment":{"relevance":4,"clarity":4,"depth":2,"inner_thought":"thin","follow_up":true}}"#,
            true,
        )
        .unwrap();
        assert_eq!(ok.text, "Tell me more.");
        assert!(ok.judgment.is_some());

        let bad_judgment = parse_reply(r#"{"reply":"Go on.","judgment":{"relevance":9}}"#, true).unwrap();
        assert_eq!(bad_judgment.text, "Go on.");
        assert!(bad_judgment.judgment.is_none());

        let plain = parse_reply("Why did you choose Rust?", true).unwrap();
        assert_eq!(plain.text, "Why did you choose Rust?");

        assert!(parse_reply("   ", false).is_err());
        assert!(parse_reply(r#"{"reply":""}"#, true).is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
