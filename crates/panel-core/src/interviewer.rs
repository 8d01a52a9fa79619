//! Interviewer personas: the fixed closed set of panel members and their per-axis emphasis.

use crate::error::{PanelError, PanelResult};
use crate::prompts::{EXECUTIVE_PERSONA, HR_PARTNER_PERSONA, TECHNICAL_LEAD_PERSONA};
use crate::scoring::AxisWeights;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewerId {
    TechnicalLead,
    HrPartner,
    Executive,
}

impl InterviewerId {
    pub const ALL: [InterviewerId; 3] = [
        InterviewerId::TechnicalLead,
        InterviewerId::HrPartner,
        InterviewerId::Executive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewerId::TechnicalLead => "technical_lead",
            InterviewerId::HrPartner => "hr_partner",
            InterviewerId::Executive => "executive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "technical_lead" | "technical" | "tech_lead" => Some(InterviewerId::TechnicalLead),
            "hr_partner" | "hr" => Some(InterviewerId::HrPartner),
            "executive" | "exec" => Some(InterviewerId::Executive),
            _ => None,
        }
    }
}

impl std::fmt::Display for InterviewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable persona configuration, built once per process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewerProfile {
    pub id: InterviewerId,
    pub display_name: String,
    /// Persona instructions prepended to the dialogue system prompt.
    pub persona: String,
    pub rotation_weight: f64,
    /// How much each rubric axis matters to this persona. Sums to 1.0.
    pub axis_weights: AxisWeights,
    /// Default synthesis voice.
    pub voice: String,
}

impl InterviewerProfile {
    fn builtin(id: InterviewerId) -> Self {
        // weights are compile-time constants that sum to 1.0
        let (display_name, persona, rotation_weight, w, voice) = match id {
            InterviewerId::TechnicalLead => (
                "Technical Lead",
                TECHNICAL_LEAD_PERSONA,
                0.4,
                [0.25, 0.45, 0.10, 0.10, 0.10],
                "onyx",
            ),
            InterviewerId::HrPartner => (
                "HR Partner",
                HR_PARTNER_PERSONA,
                0.3,
                [0.15, 0.10, 0.35, 0.25, 0.15],
                "nova",
            ),
            InterviewerId::Executive => (
                "Executive",
                EXECUTIVE_PERSONA,
                0.3,
                [0.20, 0.15, 0.15, 0.20, 0.30],
                "echo",
            ),
        };
        Self {
            id,
            display_name: display_name.to_string(),
            persona: persona.to_string(),
            rotation_weight,
            axis_weights: AxisWeights {
                structure: w[0],
                expertise: w[1],
                attitude: w[2],
                fit: w[3],
                growth: w[4],
            },
            voice: voice.to_string(),
        }
    }
}

/// The configured panel. Always non-empty; never contains an id twice.
#[derive(Debug, Clone, PartialEq)]
pub struct InterviewerRoster {
    profiles: Vec<InterviewerProfile>,
}

impl InterviewerRoster {
    /// All three built-in interviewers.
    pub fn standard() -> Self {
        Self {
            profiles: InterviewerId::ALL
                .iter()
                .map(|id| InterviewerProfile::builtin(*id))
                .collect(),
        }
    }

    /// Restrict the panel to `ids` (order kept, duplicates ignored).
    pub fn subset(ids: &[InterviewerId]) -> PanelResult<Self> {
        let mut profiles: Vec<InterviewerProfile> = Vec::with_capacity(ids.len());
        for id in ids {
            if !profiles.iter().any(|p| p.id == *id) {
                profiles.push(InterviewerProfile::builtin(*id));
            }
        }
        if profiles.is_empty() {
            return Err(PanelError::Config("interviewer set must not be empty".to_string()));
        }
        Ok(Self { profiles })
    }

    /// Build from custom profiles. Each profile's axis weights must sum to 1.0.
    pub fn from_profiles(profiles: Vec<InterviewerProfile>) -> PanelResult<Self> {
        if profiles.is_empty() {
            return Err(PanelError::Config("interviewer set must not be empty".to_string()));
        }
        for (i, p) in profiles.iter().enumerate() {
            p.axis_weights.validate()?;
            if !p.rotation_weight.is_finite() || p.rotation_weight < 0.0 {
                return Err(PanelError::Config(format!(
                    "rotation weight for {} must be non-negative",
                    p.id
                )));
            }
            if profiles[..i].iter().any(|q| q.id == p.id) {
                return Err(PanelError::Config(format!("duplicate interviewer {}", p.id)));
            }
        }
        Ok(Self { profiles })
    }

    pub fn get(&self, id: InterviewerId) -> Option<&InterviewerProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: InterviewerId) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<InterviewerId> {
        self.profiles.iter().map(|p| p.id).collect()
    }

    pub fn profiles(&self) -> &[InterviewerProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for InterviewerRoster {
    fn default() -> Self {
        Self::standard()
    }
}
