//! **ScoringEngine**: Converts five-axis rubric judgments into an overall 0–100 score,
//! a pass/borderline/fail verdict and eight reporting competencies.
//!
//! The engine is a pure transform. Producing `EvaluationScores` from a transcript is the
//! evaluator's job; the strict parsing of what the evaluator returns lives here so no
//! caller can smuggle a defaulted score past it.

use crate::config::{AxisWeightConfig, ScoringConfig};
use crate::error::{PanelError, PanelResult};
use crate::interviewer::InterviewerProfile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const WEIGHT_EPSILON: f64 = 1e-6;

/// The five rubric axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Structure,
    Expertise,
    Attitude,
    Fit,
    Growth,
}

impl Axis {
    pub const ALL: [Axis; 5] = [
        Axis::Structure,
        Axis::Expertise,
        Axis::Attitude,
        Axis::Fit,
        Axis::Growth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Structure => "structure",
            Axis::Expertise => "expertise",
            Axis::Attitude => "attitude",
            Axis::Fit => "fit",
            Axis::Growth => "growth",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Axis::Structure => "Answer structure",
            Axis::Expertise => "Domain expertise",
            Axis::Attitude => "Attitude & communication",
            Axis::Fit => "Role / culture fit",
            Axis::Growth => "Growth potential",
        }
    }
}

/// Per-axis weights. Construction enforces a sum of 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisWeights {
    pub structure: f64,
    pub expertise: f64,
    pub attitude: f64,
    pub fit: f64,
    pub growth: f64,
}

impl AxisWeights {
    pub fn new(structure: f64, expertise: f64, attitude: f64, fit: f64, growth: f64) -> PanelResult<Self> {
        let w = Self {
            structure,
            expertise,
            attitude,
            fit,
            growth,
        };
        w.validate()?;
        Ok(w)
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Structure => self.structure,
            Axis::Expertise => self.expertise,
            Axis::Attitude => self.attitude,
            Axis::Fit => self.fit,
            Axis::Growth => self.growth,
        }
    }

    pub fn sum(&self) -> f64 {
        Axis::ALL.iter().map(|a| self.get(*a)).sum()
    }

    pub fn validate(&self) -> PanelResult<()> {
        if Axis::ALL.iter().any(|a| {
            let w = self.get(*a);
            !w.is_finite() || w < 0.0
        }) {
            return Err(PanelError::Config("axis weights must be finite and non-negative".to_string()));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(PanelError::Config(format!(
                "axis weights must sum to 1.0 (got {:.6})",
                sum
            )));
        }
        Ok(())
    }
}

impl TryFrom<AxisWeightConfig> for AxisWeights {
    type Error = PanelError;

    fn try_from(c: AxisWeightConfig) -> PanelResult<Self> {
        AxisWeights::new(c.structure, c.expertise, c.attitude, c.fit, c.growth)
    }
}

/// One axis judgment: integer 1–5 plus a short justification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisScore {
    pub score: u8,
    pub reason: String,
}

/// Session-level rubric result, produced once at session end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub structure: AxisScore,
    pub expertise: AxisScore,
    pub attitude: AxisScore,
    pub fit: AxisScore,
    pub growth: AxisScore,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAxisScore {
    score: serde_json::Value,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct RawEvaluation {
    structure: Option<RawAxisScore>,
    expertise: Option<RawAxisScore>,
    attitude: Option<RawAxisScore>,
    fit: Option<RawAxisScore>,
    growth: Option<RawAxisScore>,
}

impl EvaluationScores {
    pub fn get(&self, axis: Axis) -> &AxisScore {
        match axis {
            Axis::Structure => &self.structure,
            Axis::Expertise => &self.expertise,
            Axis::Attitude => &self.attitude,
            Axis::Fit => &self.fit,
            Axis::Growth => &self.growth,
        }
    }

    /// Build from plain integers (reasons left empty). Values are validated.
    pub fn from_values(structure: u8, expertise: u8, attitude: u8, fit: u8, growth: u8) -> PanelResult<Self> {
        let mk = |axis: Axis, v: u8| -> PanelResult<AxisScore> {
            if !(1..=5).contains(&v) {
                return Err(PanelError::MalformedOutput(format!(
                    "{} score {} outside 1..=5",
                    axis.as_str(),
                    v
                )));
            }
            Ok(AxisScore {
                score: v,
                reason: String::new(),
            })
        };
        Ok(Self {
            structure: mk(Axis::Structure, structure)?,
            expertise: mk(Axis::Expertise, expertise)?,
            attitude: mk(Axis::Attitude, attitude)?,
            fit: mk(Axis::Fit, fit)?,
            growth: mk(Axis::Growth, growth)?,
        })
    }

    /// Strictly parse evaluator output. A Markdown code fence around the JSON is
    /// tolerated; anything else that does not match the five-axis schema is rejected.
    pub fn from_llm_output(raw: &str) -> PanelResult<Self> {
        let body = strip_code_fence(raw);
        let parsed: RawEvaluation = serde_json::from_str(body)
            .map_err(|e| PanelError::MalformedOutput(format!("evaluation is not valid JSON: {}", e)))?;
        Ok(Self {
            structure: take_axis(Axis::Structure, parsed.structure)?,
            expertise: take_axis(Axis::Expertise, parsed.expertise)?,
            attitude: take_axis(Axis::Attitude, parsed.attitude)?,
            fit: take_axis(Axis::Fit, parsed.fit)?,
            growth: take_axis(Axis::Growth, parsed.growth)?,
        })
    }
}

fn take_axis(axis: Axis, raw: Option<RawAxisScore>) -> PanelResult<AxisScore> {
    let raw = raw.ok_or_else(|| PanelError::MalformedOutput(format!("missing axis '{}'", axis.as_str())))?;
    let score = strict_rating(axis.as_str(), &raw.score)?;
    Ok(AxisScore {
        score,
        reason: raw.reason.unwrap_or_default().trim().to_string(),
    })
}

/// Integer in 1..=5, nothing else (no floats, no strings, no clamping).
fn strict_rating(field: &str, value: &serde_json::Value) -> PanelResult<u8> {
    let n = value.as_u64().ok_or_else(|| {
        PanelError::MalformedOutput(format!("'{}' must be an integer, got {}", field, value))
    })?;
    if !(1..=5).contains(&n) {
        return Err(PanelError::MalformedOutput(format!(
            "'{}' must be within 1..=5, got {}",
            field, n
        )));
    }
    Ok(n as u8)
}

/// Remove a surrounding ```json fence if the model added one.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.strip_prefix("JSON").unwrap_or(rest);
        return rest.trim().strip_suffix("```").unwrap_or(rest).trim();
    }
    trimmed
}

/// Per-turn structured judgment optionally returned by the dialogue model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnJudgment {
    pub relevance: u8,
    pub clarity: u8,
    pub depth: u8,
    pub inner_thought: String,
    pub follow_up: bool,
}

impl TurnJudgment {
    /// Strict parse of a judgment object.
    pub fn from_value(value: &serde_json::Value) -> PanelResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| PanelError::MalformedOutput("judgment must be an object".to_string()))?;
        let rating = |name: &str| -> PanelResult<u8> {
            let v = obj
                .get(name)
                .ok_or_else(|| PanelError::MalformedOutput(format!("judgment missing '{}'", name)))?;
            strict_rating(name, v)
        };
        let inner_thought = obj
            .get("inner_thought")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PanelError::MalformedOutput("judgment missing 'inner_thought'".to_string()))?
            .trim()
            .to_string();
        let follow_up = obj
            .get("follow_up")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| PanelError::MalformedOutput("judgment missing boolean 'follow_up'".to_string()))?;
        Ok(Self {
            relevance: rating("relevance")?,
            clarity: rating("clarity")?,
            depth: rating("depth")?,
            inner_thought,
            follow_up,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Pass,
    Borderline,
    Fail,
}

impl PassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassStatus::Pass => "pass",
            PassStatus::Borderline => "borderline",
            PassStatus::Fail => "fail",
        }
    }
}

/// Eight reporting dimensions, derived from the axes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Competency {
    Communication,
    ProblemSolving,
    TechnicalDepth,
    Teamwork,
    Leadership,
    Adaptability,
    Motivation,
    CultureFit,
}

impl Competency {
    pub const ALL: [Competency; 8] = [
        Competency::Communication,
        Competency::ProblemSolving,
        Competency::TechnicalDepth,
        Competency::Teamwork,
        Competency::Leadership,
        Competency::Adaptability,
        Competency::Motivation,
        Competency::CultureFit,
    ];

    /// Contributing axes and their fractional weights.
    pub fn contributions(&self) -> &'static [(Axis, f64)] {
        match self {
            Competency::Communication => &[(Axis::Attitude, 0.7), (Axis::Structure, 0.3)],
            Competency::ProblemSolving => &[(Axis::Structure, 0.4), (Axis::Expertise, 0.6)],
            Competency::TechnicalDepth => &[(Axis::Expertise, 1.0)],
            Competency::Teamwork => &[(Axis::Attitude, 0.5), (Axis::Fit, 0.5)],
            Competency::Leadership => &[(Axis::Structure, 0.3), (Axis::Attitude, 0.3), (Axis::Growth, 0.4)],
            Competency::Adaptability => &[(Axis::Growth, 0.6), (Axis::Attitude, 0.4)],
            Competency::Motivation => &[(Axis::Fit, 0.5), (Axis::Growth, 0.5)],
            Competency::CultureFit => &[(Axis::Fit, 0.8), (Axis::Attitude, 0.2)],
        }
    }
}

pub type CompetencyScores = BTreeMap<Competency, u8>;

/// Everything the caller layer reports at session end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub overall_score: u8,
    pub pass_status: PassStatus,
    pub competencies: CompetencyScores,
    /// Each axis rescaled to 0–100.
    pub axis_scores: BTreeMap<Axis, f64>,
}

/// `(score - 1) / 4 * 100`
fn rescale(score: u8) -> f64 {
    (f64::from(score) - 1.0) / 4.0 * 100.0
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    weights: AxisWeights,
    pass_threshold: u8,
    borderline_threshold: u8,
}

impl ScoringEngine {
    /// Fails if the weights do not sum to 1.0 or the thresholds are inverted.
    pub fn new(weights: AxisWeights, pass_threshold: u8, borderline_threshold: u8) -> PanelResult<Self> {
        weights.validate()?;
        if borderline_threshold > pass_threshold || pass_threshold > 100 {
            return Err(PanelError::Config(format!(
                "invalid thresholds: pass={} borderline={}",
                pass_threshold, borderline_threshold
            )));
        }
        Ok(Self {
            weights,
            pass_threshold,
            borderline_threshold,
        })
    }

    pub fn from_config(config: &ScoringConfig) -> PanelResult<Self> {
        Self::new(
            AxisWeights::try_from(config.weights)?,
            config.pass_threshold,
            config.borderline_threshold,
        )
    }

    pub fn weights(&self) -> &AxisWeights {
        &self.weights
    }

    pub fn score(&self, scores: &EvaluationScores) -> ScoreReport {
        let overall = weighted_overall(&self.weights, scores);
        ScoreReport {
            overall_score: overall,
            pass_status: self.verdict(overall),
            competencies: competencies(scores),
            axis_scores: Axis::ALL
                .iter()
                .map(|a| (*a, rescale(scores.get(*a).score)))
                .collect(),
        }
    }

    pub fn verdict(&self, overall: u8) -> PassStatus {
        if overall >= self.pass_threshold {
            PassStatus::Pass
        } else if overall >= self.borderline_threshold {
            PassStatus::Borderline
        } else {
            PassStatus::Fail
        }
    }

    /// Overall score through one interviewer's own axis weights.
    pub fn persona_view(&self, profile: &InterviewerProfile, scores: &EvaluationScores) -> u8 {
        weighted_overall(&profile.axis_weights, scores)
    }
}

fn weighted_overall(weights: &AxisWeights, scores: &EvaluationScores) -> u8 {
    let total: f64 = Axis::ALL
        .iter()
        .map(|a| rescale(scores.get(*a).score) * weights.get(*a))
        .sum();
    total.round().clamp(0.0, 100.0) as u8
}

fn competencies(scores: &EvaluationScores) -> CompetencyScores {
    Competency::ALL
        .iter()
        .map(|c| {
            let value: f64 = c
                .contributions()
                .iter()
                .map(|(axis, w)| rescale(scores.get(*axis).score) * w)
                .sum();
            (*c, value.clamp(0.0, 100.0).round() as u8)
        })
        .collect()
}
