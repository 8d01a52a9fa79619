//! Heuristic bot detection.
//!
//! Strong signals (prior flag, automation user-agent, request burst) deny on their own;
//! weak signals (missing headers) only annotate unless combined with a strong one.

use super::store::RateLimitRecord;
use super::RequestMeta;
use crate::config::AdmissionConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

static AUTOMATION_UA: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)(curl/|wget/|python-requests|python-urllib|aiohttp|httpx|go-http-client|okhttp|java/\d|libwww-perl|scrapy|headlesschrome|phantomjs|selenium|webdriver|puppeteer|playwright|postmanruntime|insomnia|\bbot\b|crawler|spider)",
    )
    .ok()
});

const PRIOR_FLAG_CONFIDENCE: f32 = 1.0;
const AUTOMATION_UA_CONFIDENCE: f32 = 0.9;
const BURST_CONFIDENCE: f32 = 0.85;
const MISSING_UA_CONFIDENCE: f32 = 0.3;
const MISSING_LANGUAGE_CONFIDENCE: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotSignal {
    PreviouslyFlagged,
    AutomationUserAgent,
    RequestBurst,
    MissingUserAgent,
    MissingAcceptLanguage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotAssessment {
    pub confidence: f32,
    pub signals: Vec<BotSignal>,
    pub denied: bool,
}

/// True when the user-agent matches a known automation tool.
pub fn is_automation_user_agent(user_agent: &str) -> bool {
    AUTOMATION_UA
        .as_ref()
        .map(|re| re.is_match(user_agent))
        .unwrap_or(false)
}

pub(crate) struct BotDetector {
    production: bool,
    threshold: f32,
    cooldown: Duration,
    burst_threshold: u32,
    burst_gap: Duration,
    burst_reset: Duration,
}

impl BotDetector {
    pub(crate) fn new(config: &AdmissionConfig, production: bool) -> Self {
        Self {
            production,
            threshold: config.bot_confidence_threshold,
            cooldown: Duration::from_secs(config.bot_cooldown_secs),
            burst_threshold: config.burst_threshold,
            burst_gap: Duration::from_millis(config.burst_gap_ms),
            burst_reset: Duration::from_millis(config.burst_reset_ms),
        }
    }

    /// How long bot records must be kept.
    pub(crate) fn record_ttl(&self) -> Duration {
        self.cooldown.max(self.burst_reset)
    }

    /// Evaluate one request and update the burst counters / flag in `record`.
    pub(crate) fn assess(
        &self,
        record: &mut RateLimitRecord,
        meta: &RequestMeta,
        now: Instant,
    ) -> BotAssessment {
        let previously_flagged = record.flagged_until.map(|t| t > now).unwrap_or(false);

        if let Some(last) = record.last_seen {
            let gap = now.saturating_duration_since(last);
            if gap < self.burst_gap {
                record.rapid_count = record.rapid_count.saturating_add(1);
            } else if gap > self.burst_reset {
                record.rapid_count = 0;
            }
        }
        record.last_seen = Some(now);

        if previously_flagged {
            return BotAssessment {
                confidence: PRIOR_FLAG_CONFIDENCE,
                signals: vec![BotSignal::PreviouslyFlagged],
                denied: true,
            };
        }

        let mut signals = Vec::new();
        let mut confidence = 0.0f32;

        match meta.user_agent.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(ua) => {
                if self.production && is_automation_user_agent(ua) {
                    signals.push(BotSignal::AutomationUserAgent);
                    confidence += AUTOMATION_UA_CONFIDENCE;
                }
            }
            None => {
                signals.push(BotSignal::MissingUserAgent);
                confidence += MISSING_UA_CONFIDENCE;
            }
        }
        if record.rapid_count >= self.burst_threshold {
            signals.push(BotSignal::RequestBurst);
            confidence += BURST_CONFIDENCE;
        }
        if meta
            .accept_language
            .as_deref()
            .map(|s| s.trim().is_empty())
            .unwrap_or(true)
        {
            signals.push(BotSignal::MissingAcceptLanguage);
            confidence += MISSING_LANGUAGE_CONFIDENCE;
        }

        let confidence = confidence.min(1.0);
        let denied = confidence >= self.threshold;
        if denied {
            record.flagged_until = Some(now + self.cooldown);
        }
        BotAssessment {
            confidence,
            signals,
            denied,
        }
    }
}
