//! **AdmissionGuard**: Decides allow/deny before any pipeline work starts.
//!
//! Order of checks: bot heuristic → sliding window (per identity + category) → daily
//! quota (start-interview only). A fixed-window counter is kept alongside the sliding
//! window for reporting. All counters live behind [`AdmissionStore`].

mod bot;
mod store;

pub use bot::{is_automation_user_agent, BotAssessment, BotSignal};
pub use store::{AdmissionStore, MemoryStore, RateLimitRecord};

use crate::clock::{Clock, SystemClock};
use crate::config::{AdmissionConfig, WindowLimit};
use crate::error::{PanelError, PanelResult};
use bot::BotDetector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Operation categories with independent sliding windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCategory {
    StartInterview,
    TurnMessage,
    SpeechSynthesis,
    Evaluation,
}

impl RequestCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestCategory::StartInterview => "start_interview",
            RequestCategory::TurnMessage => "turn_message",
            RequestCategory::SpeechSynthesis => "speech_synthesis",
            RequestCategory::Evaluation => "evaluation",
        }
    }

    fn limit(&self, config: &AdmissionConfig) -> WindowLimit {
        match self {
            RequestCategory::StartInterview => config.start_interview,
            RequestCategory::TurnMessage => config.turn_message,
            RequestCategory::SpeechSynthesis => config.speech_synthesis,
            RequestCategory::Evaluation => config.evaluation,
        }
    }
}

/// Account tier for daily interview caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Paid,
    Unlimited,
}

impl Tier {
    /// `None` means no cap.
    pub fn daily_cap(&self, config: &AdmissionConfig) -> Option<u32> {
        match self {
            Tier::Free => Some(config.daily_free),
            Tier::Paid => Some(config.daily_paid),
            Tier::Unlimited => None,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "paid" | "pro" => Tier::Paid,
            "unlimited" => Tier::Unlimited,
            _ => Tier::Free,
        }
    }
}

/// Request metadata the guard is allowed to look at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub user_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
}

/// Counter key for a caller: the authenticated user id when present, otherwise
/// IP plus a coarse header fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn resolve(meta: &RequestMeta) -> Self {
        if let Some(uid) = meta.user_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return Identity(format!("user:{}", uid));
        }
        let ip = meta
            .ip
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown");
        let mut hasher = DefaultHasher::new();
        meta.user_agent.as_deref().unwrap_or("").hash(&mut hasher);
        meta.accept_language.as_deref().unwrap_or("").hash(&mut hasher);
        Identity(format!("anon:{}:{:08x}", ip, hasher.finish() as u32))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionRequest {
    pub meta: RequestMeta,
    pub category: RequestCategory,
    pub tier: Tier,
}

impl AdmissionRequest {
    pub fn new(meta: RequestMeta, category: RequestCategory) -> Self {
        Self {
            meta,
            category,
            tier: Tier::Free,
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    RateLimited,
    BotDetected,
    DailyQuotaExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub used: u32,
    /// `None` for the unlimited tier.
    pub limit: Option<u32>,
}

/// Outcome plus header-ready metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub identity: String,
    pub category: RequestCategory,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds when the oldest request leaves the window.
    pub reset_at: i64,
    pub retry_after_secs: Option<u64>,
    pub denial: Option<DenialReason>,
    pub bot: BotAssessment,
    /// Legacy fixed-window count, reported only.
    pub fixed_window_count: u64,
    pub daily: Option<DailyUsage>,
}

impl AdmissionDecision {
    /// Response headers for the caller layer.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at.to_string()),
        ];
        if let Some(secs) = self.retry_after_secs {
            out.push(("Retry-After", secs.to_string()));
        }
        out
    }

    /// Map a denial onto the error taxonomy.
    pub fn into_result(self) -> PanelResult<Self> {
        match self.denial {
            None => Ok(self),
            Some(DenialReason::RateLimited) => Err(PanelError::RateLimited {
                category: self.category.as_str().to_string(),
                retry_after_secs: self.retry_after_secs.unwrap_or(1),
            }),
            Some(DenialReason::BotDetected) => Err(PanelError::BotDetected {
                confidence: self.bot.confidence,
            }),
            Some(DenialReason::DailyQuotaExceeded) => Err(PanelError::DailyQuotaExceeded {
                limit: self.daily.and_then(|d| d.limit).unwrap_or(0),
                retry_after_secs: self.retry_after_secs.unwrap_or(1),
            }),
        }
    }
}

struct BotOutcome {
    assessment: BotAssessment,
    retry_after: Duration,
}

struct WindowOutcome {
    allowed: bool,
    in_window: u32,
    oldest: Option<Instant>,
}

/// Shared admission service. Construct one per process and share it behind `Arc`.
pub struct AdmissionGuard {
    config: AdmissionConfig,
    store: Arc<dyn AdmissionStore>,
    clock: Arc<dyn Clock>,
    bot: BotDetector,
    origin: Instant,
    last_sweep_ms: AtomicU64,
}

impl AdmissionGuard {
    pub fn new(
        config: AdmissionConfig,
        production: bool,
        store: Arc<dyn AdmissionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let bot = BotDetector::new(&config, production);
        let origin = clock.now();
        Self {
            config,
            store,
            clock,
            bot,
            origin,
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    /// In-memory guard on the system clock.
    pub fn in_memory(config: AdmissionConfig, production: bool) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn AdmissionStore> = Arc::new(MemoryStore::new(clock.clone()));
        Self::new(config, production, store, clock)
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Like [`check`](Self::check) but denials become errors.
    pub fn admit(&self, request: &AdmissionRequest) -> PanelResult<AdmissionDecision> {
        self.check(request).into_result()
    }

    /// Decide and record. Never performs I/O.
    pub fn check(&self, request: &AdmissionRequest) -> AdmissionDecision {
        self.maybe_sweep();
        let now = self.clock.now();
        let utc_now = self.clock.utc_now();
        let identity = Identity::resolve(&request.meta);
        let bot = self.assess_bot(&identity, &request.meta, now);
        self.decide(&identity, request.category, request.tier, &bot, now, utc_now)
    }

    /// Admission for one caller request that spends several categories. The bot heuristic
    /// sees the request once; each category's window is then applied in order, stopping at
    /// the first denial. The last decision is the denial when there is one.
    pub fn check_many(
        &self,
        meta: &RequestMeta,
        tier: Tier,
        categories: &[RequestCategory],
    ) -> Vec<AdmissionDecision> {
        self.maybe_sweep();
        let now = self.clock.now();
        let utc_now = self.clock.utc_now();
        let identity = Identity::resolve(meta);
        let bot = self.assess_bot(&identity, meta, now);
        let mut decisions = Vec::with_capacity(categories.len());
        for &category in categories {
            let decision = self.decide(&identity, category, tier, &bot, now, utc_now);
            let denied = !decision.allowed;
            decisions.push(decision);
            if denied {
                break;
            }
        }
        decisions
    }

    fn assess_bot(&self, identity: &Identity, meta: &RequestMeta, now: Instant) -> BotOutcome {
        let bot_key = format!("{}:bot", identity);
        let mut assessment = BotAssessment::default();
        let mut flagged_until = None;
        self.store
            .update(&bot_key, self.bot.record_ttl(), &mut |record: &mut RateLimitRecord| {
                assessment = self.bot.assess(record, meta, now);
                flagged_until = record.flagged_until;
            });
        if assessment.denied {
            warn!(
                target: "panel::admission",
                identity = %identity,
                confidence = assessment.confidence,
                signals = ?assessment.signals,
                "Bot heuristic denied request"
            );
        } else if assessment.confidence > 0.0 {
            debug!(
                target: "panel::admission",
                identity = %identity,
                confidence = assessment.confidence,
                signals = ?assessment.signals,
                "Bot heuristic annotated request"
            );
        }
        BotOutcome {
            assessment,
            retry_after: flagged_until
                .map(|t| t.saturating_duration_since(now))
                .unwrap_or_default(),
        }
    }

    fn decide(
        &self,
        identity: &Identity,
        category: RequestCategory,
        tier: Tier,
        bot: &BotOutcome,
        now: Instant,
        utc_now: DateTime<Utc>,
    ) -> AdmissionDecision {
        let limit = category.limit(&self.config);
        let window = Duration::from_secs(limit.window_secs.max(1));

        let mut decision = AdmissionDecision {
            allowed: false,
            identity: identity.to_string(),
            category,
            limit: limit.max_requests,
            remaining: limit.max_requests,
            reset_at: unix_after(utc_now, window),
            retry_after_secs: None,
            denial: None,
            bot: bot.assessment.clone(),
            fixed_window_count: 0,
            daily: None,
        };

        // 1. bot heuristic
        if bot.assessment.denied {
            decision.denial = Some(DenialReason::BotDetected);
            decision.retry_after_secs = Some(ceil_secs(bot.retry_after));
            return decision;
        }

        // 2. sliding window
        let outcome = self.sliding_window(identity, category, limit, window, now);
        let reset_after = outcome
            .oldest
            .map(|t| (t + window).saturating_duration_since(now))
            .unwrap_or(window);
        decision.reset_at = unix_after(utc_now, reset_after);
        decision.remaining = limit.max_requests.saturating_sub(outcome.in_window);
        if !outcome.allowed {
            decision.denial = Some(DenialReason::RateLimited);
            decision.retry_after_secs = Some(ceil_secs(reset_after));
            info!(
                target: "panel::admission",
                identity = %identity,
                category = category.as_str(),
                limit = limit.max_requests,
                "Sliding window limit reached"
            );
            return decision;
        }

        // fixed window, reporting only
        let fixed_key = format!("{}:{}:fixed", identity, category.as_str());
        decision.fixed_window_count = self.store.increment(&fixed_key, window);

        // 3. daily quota
        if category == RequestCategory::StartInterview {
            let cap = tier.daily_cap(&self.config);
            let (allowed, usage, until_midnight) = self.daily_quota(identity, cap, utc_now);
            decision.daily = Some(usage);
            if !allowed {
                decision.denial = Some(DenialReason::DailyQuotaExceeded);
                decision.retry_after_secs = Some(ceil_secs(until_midnight));
                info!(
                    target: "panel::admission",
                    identity = %identity,
                    used = usage.used,
                    "Daily interview quota exhausted"
                );
                return decision;
            }
        }

        decision.allowed = true;
        decision
    }

    fn sliding_window(
        &self,
        identity: &Identity,
        category: RequestCategory,
        limit: WindowLimit,
        window: Duration,
        now: Instant,
    ) -> WindowOutcome {
        let key = format!("{}:{}:win", identity, category.as_str());
        let mut outcome = WindowOutcome {
            allowed: false,
            in_window: 0,
            oldest: None,
        };
        self.store.update(&key, window, &mut |record: &mut RateLimitRecord| {
            while let Some(front) = record.timestamps.front() {
                if *front + window <= now {
                    record.timestamps.pop_front();
                } else {
                    break;
                }
            }
            if (record.timestamps.len() as u32) < limit.max_requests {
                record.timestamps.push_back(now);
                outcome.allowed = true;
            }
            outcome.in_window = record.timestamps.len() as u32;
            outcome.oldest = record.timestamps.front().copied();
        });
        outcome
    }

    fn daily_quota(
        &self,
        identity: &Identity,
        cap: Option<u32>,
        utc_now: DateTime<Utc>,
    ) -> (bool, DailyUsage, Duration) {
        let today = utc_now.date_naive();
        let until_midnight = until_next_utc_midnight(utc_now);
        let key = format!("{}:daily", identity);
        let mut allowed = false;
        let mut used = 0;
        self.store.update(
            &key,
            until_midnight + Duration::from_secs(1),
            &mut |record: &mut RateLimitRecord| {
                if record.daily_date != Some(today) {
                    record.daily_date = Some(today);
                    record.daily_count = 0;
                }
                match cap {
                    Some(max) if record.daily_count >= max => {}
                    _ => {
                        record.daily_count = record.daily_count.saturating_add(1);
                        allowed = true;
                    }
                }
                used = record.daily_count;
            },
        );
        (allowed, DailyUsage { used, limit: cap }, until_midnight)
    }

    /// Opportunistic cleanup, at most once per `sweep_interval_secs`.
    fn maybe_sweep(&self) {
        let interval_ms = self.config.sweep_interval_secs.saturating_mul(1000);
        let elapsed_ms = self
            .clock
            .now()
            .saturating_duration_since(self.origin)
            .as_millis() as u64;
        let last = self.last_sweep_ms.load(Ordering::Acquire);
        if elapsed_ms.saturating_sub(last) < interval_ms {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, elapsed_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let removed = self.store.sweep();
            if removed > 0 {
                debug!(target: "panel::admission", removed, "Swept expired admission records");
            }
        }
    }

    /// Number of live-or-expired records currently held (for diagnostics).
    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

fn until_next_utc_midnight(now: DateTime<Utc>) -> Duration {
    let next = now
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc());
    match next {
        Some(midnight) => (midnight - now).to_std().unwrap_or_default(),
        None => Duration::from_secs(24 * 3600),
    }
}

fn unix_after(now: DateTime<Utc>, after: Duration) -> i64 {
    now.timestamp() + ceil_secs(after) as i64
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn browser(user: &str) -> RequestMeta {
        RequestMeta {
            user_id: Some(user.to_string()),
            ip: Some("203.0.113.7".to_string()),
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/126.0".to_string()),
            accept_language: Some("en-GB".to_string()),
        }
    }

    #[test]
    fn identity_prefers_user_id() {
        let meta = browser("42");
        assert_eq!(Identity::resolve(&meta).as_str(), "user:42");
        let anon = RequestMeta {
            user_id: None,
            ..meta
        };
        assert!(Identity::resolve(&anon).as_str().starts_with("anon:203.0.113.7:"));
    }

    #[test]
    fn fingerprint_differs_per_agent() {
        let a = RequestMeta {
            user_id: None,
            ..browser("x")
        };
        let b = RequestMeta {
            user_agent: Some("Other/1.0".to_string()),
            ..a.clone()
        };
        assert_ne!(Identity::resolve(&a), Identity::resolve(&b));
    }

    #[test]
    fn midnight_math() {
        let t = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        assert_eq!(until_next_utc_midnight(t), Duration::from_secs(1));
    }

    #[test]
    fn decision_headers_include_retry_after_on_denial() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let mut cfg = AdmissionConfig::default();
        cfg.turn_message = WindowLimit::new(1, 30);
        let guard = AdmissionGuard::new(cfg, false, store, clock);
        let req = AdmissionRequest::new(browser("h"), RequestCategory::TurnMessage);
        assert!(guard.check(&req).allowed);
        let denied = guard.check(&req);
        let headers = denied.headers();
        assert!(headers.iter().any(|(k, v)| *k == "Retry-After" && v == "30"));
        assert!(headers.iter().any(|(k, v)| *k == "X-RateLimit-Remaining" && v == "0"));
    }
}
