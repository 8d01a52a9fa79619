//! Panel configuration: defaults, optional TOML file, then `PANEL__*` environment overrides.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | PANEL_CONFIG | config/panel.toml | Path of the optional TOML file. |
//! | PANEL_ENV | development | `production` enables the automation user-agent check. |
//! | PANEL__PORT | 8010 | Gateway listen port. |
//! | PANEL__SESSION__TURN_BUDGET_SECS | 120 | Per-turn speaking budget. |
//! | PANEL__PIPELINE__MODE | overlap | `sequential` or `overlap`. |
//!
//! Any nested key can be overridden the same way (`PANEL__ADMISSION__DAILY_FREE=5`).

use crate::error::{PanelError, PanelResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "config/panel.toml";

fn default_port() -> u16 {
    8010
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub port: u16,
    /// Enables production-only heuristics (automation user-agent signatures).
    pub production: bool,
    pub admission: AdmissionConfig,
    pub session: SessionConfig,
    pub scoring: ScoringConfig,
    pub pipeline: PipelineConfig,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            production: false,
            admission: AdmissionConfig::default(),
            session: SessionConfig::default(),
            scoring: ScoringConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Request budget for one category: at most `max_requests` per trailing `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl WindowLimit {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub start_interview: WindowLimit,
    pub turn_message: WindowLimit,
    pub speech_synthesis: WindowLimit,
    pub evaluation: WindowLimit,
    /// Interviews per UTC day for the free tier.
    pub daily_free: u32,
    /// Interviews per UTC day for the paid tier. Unlimited tier has no cap.
    pub daily_paid: u32,
    pub bot_cooldown_secs: u64,
    /// Bot confidence at or above this denies; below only annotates.
    pub bot_confidence_threshold: f32,
    /// Number of sub-`burst_gap_ms` gaps that flags a burst.
    pub burst_threshold: u32,
    pub burst_gap_ms: u64,
    pub burst_reset_ms: u64,
    pub sweep_interval_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            start_interview: WindowLimit::new(5, 60),
            turn_message: WindowLimit::new(30, 60),
            speech_synthesis: WindowLimit::new(60, 60),
            evaluation: WindowLimit::new(10, 60),
            daily_free: 3,
            daily_paid: 30,
            bot_cooldown_secs: 15 * 60,
            bot_confidence_threshold: 0.7,
            burst_threshold: 10,
            burst_gap_ms: 100,
            burst_reset_ms: 1000,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds the candidate has to answer; the timer resets at each turn start.
    pub turn_budget_secs: u32,
    pub warning_threshold_secs: u32,
    /// When true the session ends as soon as the timer reaches zero.
    pub auto_submit_on_timeout: bool,
    /// Soft cap on completed turns; reaching it marks the interview complete.
    pub max_turns: Option<u32>,
    /// Sessions with no caller activity for this long are dropped by the gateway.
    pub idle_evict_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            turn_budget_secs: 120,
            warning_threshold_secs: 30,
            auto_submit_on_timeout: false,
            max_turns: Some(10),
            idle_evict_secs: 15 * 60,
        }
    }
}

/// Session-level rubric weights. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisWeightConfig {
    pub structure: f64,
    pub expertise: f64,
    pub attitude: f64,
    pub fit: f64,
    pub growth: f64,
}

impl Default for AxisWeightConfig {
    fn default() -> Self {
        Self {
            structure: 0.20,
            expertise: 0.30,
            attitude: 0.20,
            fit: 0.15,
            growth: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: AxisWeightConfig,
    pub pass_threshold: u8,
    pub borderline_threshold: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: AxisWeightConfig::default(),
            pass_threshold: 70,
            borderline_threshold: 50,
        }
    }
}

/// How synthesis output is delivered once the reply text is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Await the full utterance, emit it as a single chunk.
    Sequential,
    /// Drain synthesis as a stream of chunks so playback can start early.
    #[default]
    Overlap,
}

impl PipelineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineMode::Sequential => "sequential",
            PipelineMode::Overlap => "overlap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Some(PipelineMode::Sequential),
            "overlap" | "parallel" => Some(PipelineMode::Overlap),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    /// Trailing messages of history included in each dialogue request.
    pub history_window: usize,
    pub stt_timeout_ms: u64,
    pub llm_timeout_ms: u64,
    pub tts_first_chunk_timeout_ms: u64,
    pub tts_chunk_timeout_ms: u64,
    pub evaluation_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Capacity of the per-turn event channel.
    pub event_buffer: usize,
    pub language_hint: String,
    pub max_document_chars: usize,
    pub max_keywords: usize,
    /// Ask the dialogue model for a structured per-turn judgment.
    pub request_judgment: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Overlap,
            history_window: 8,
            stt_timeout_ms: 8_000,
            llm_timeout_ms: 12_000,
            tts_first_chunk_timeout_ms: 8_000,
            tts_chunk_timeout_ms: 5_000,
            evaluation_timeout_ms: 30_000,
            max_attempts: 3,
            backoff_base_ms: 200,
            event_buffer: 32,
            language_hint: "en".to_string(),
            max_document_chars: 4_000,
            max_keywords: 10,
            request_judgment: true,
        }
    }
}

impl PanelConfig {
    /// Load config from file and environment. Precedence: env > `PANEL_CONFIG` file > defaults.
    pub fn load() -> PanelResult<Self> {
        let path = std::env::var("PANEL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::load_from_path(Path::new(&path))?;
        if env_production() {
            cfg.production = true;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific TOML path (missing file => defaults) plus `PANEL__*` overrides.
    pub fn load_from_path(path: &Path) -> PanelResult<Self> {
        let builder = config::Config::builder();
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };
        let built = builder
            .add_source(
                config::Environment::with_prefix("PANEL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(built.try_deserialize()?)
    }

    /// Parse TOML directly (no environment layer).
    pub fn from_toml_str(s: &str) -> PanelResult<Self> {
        let cfg: PanelConfig = toml::from_str(s).map_err(|e| PanelError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the engines would refuse later anyway.
    pub fn validate(&self) -> PanelResult<()> {
        let w = &self.scoring.weights;
        let sum = w.structure + w.expertise + w.attitude + w.fit + w.growth;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(PanelError::Config(format!(
                "scoring.weights must sum to 1.0 (got {:.4})",
                sum
            )));
        }
        if self.scoring.borderline_threshold > self.scoring.pass_threshold {
            return Err(PanelError::Config(
                "scoring.borderline_threshold must not exceed pass_threshold".to_string(),
            ));
        }
        if self.session.warning_threshold_secs > self.session.turn_budget_secs {
            return Err(PanelError::Config(
                "session.warning_threshold_secs must not exceed turn_budget_secs".to_string(),
            ));
        }
        if self.session.idle_evict_secs == 0 {
            return Err(PanelError::Config(
                "session.idle_evict_secs must be positive".to_string(),
            ));
        }
        if self.pipeline.event_buffer == 0 || self.pipeline.max_attempts == 0 {
            return Err(PanelError::Config(
                "pipeline.event_buffer and pipeline.max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_production() -> bool {
    match std::env::var("PANEL_ENV") {
        Ok(v) => v.trim().eq_ignore_ascii_case("production"),
        Err(_) => false,
    }
}
