//! Shared gateway state and per-request admission.

use crate::error::ApiError;
use axum::http::HeaderMap;
use dashmap::DashMap;
use panel_core::{AdmissionDecision, AdmissionGuard, PanelConfig, RequestCategory, RequestMeta, Tier};
use panel_voice::{InterviewOrchestrator, PanelServices};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

/// Caller identity headers. The gateway expects an upstream auth proxy to set these.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const TIER_HEADER: &str = "x-account-tier";

/// Upper bound on how often idle sessions are looked for.
const EVICTION_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PanelConfig>,
    pub guard: Arc<AdmissionGuard>,
    pub services: PanelServices,
    /// Live interviews. Dropped once evaluated, or after `session.idle_evict_secs` without
    /// caller activity.
    pub sessions: Arc<DashMap<Uuid, Arc<InterviewOrchestrator>>>,
    last_eviction: Arc<Mutex<Instant>>,
}

impl AppState {
    pub fn new(config: PanelConfig, services: PanelServices) -> Self {
        let guard = AdmissionGuard::in_memory(config.admission.clone(), config.production);
        Self::with_guard(config, services, guard)
    }

    pub fn with_guard(config: PanelConfig, services: PanelServices, guard: AdmissionGuard) -> Self {
        Self {
            config: Arc::new(config),
            guard: Arc::new(guard),
            services,
            sessions: Arc::new(DashMap::new()),
            last_eviction: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn session(&self, id: Uuid) -> Result<Arc<InterviewOrchestrator>, ApiError> {
        self.maybe_evict();
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ApiError::not_found(id))
    }

    /// Run admission for `category`. Denials come back as an error carrying the rate-limit
    /// headers; the decision for an allowed request carries them too.
    pub fn admit(&self, headers: &HeaderMap, category: RequestCategory) -> Result<AdmissionDecision, ApiError> {
        self.admit_all(headers, &[category])
    }

    /// Admission for a request that spends several categories. The burst heuristic counts
    /// the request once. Returns the first category's decision; a denial carries the
    /// headers of the category that refused.
    pub fn admit_all(
        &self,
        headers: &HeaderMap,
        categories: &[RequestCategory],
    ) -> Result<AdmissionDecision, ApiError> {
        let meta = request_meta(headers);
        let tier = header_str(headers, TIER_HEADER)
            .map(Tier::parse)
            .unwrap_or_default();
        let mut first = None;
        for decision in self.guard.check_many(&meta, tier, categories) {
            let category = decision.category;
            let rate_headers = decision.headers();
            let decision = decision.into_result().map_err(|e| {
                tracing::info!(target: "panel::gateway", category = category.as_str(), error = %e, "request denied");
                ApiError::from(e).with_headers(rate_headers)
            })?;
            first.get_or_insert(decision);
        }
        first.ok_or_else(|| ApiError::bad_request("no admission category"))
    }

    fn idle_limit(&self) -> Duration {
        Duration::from_secs(self.config.session.idle_evict_secs)
    }

    /// Opportunistic eviction, at most once per sweep interval.
    pub fn maybe_evict(&self) {
        let every = self.idle_limit().min(EVICTION_SWEEP_INTERVAL);
        {
            let mut last = self.last_eviction.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed() < every {
                return;
            }
            *last = Instant::now();
        }
        self.evict_idle();
    }

    /// Drop sessions idle for longer than `session.idle_evict_secs`. A session with a turn in
    /// flight is kept. Returns how many were dropped.
    pub fn evict_idle(&self) -> usize {
        let limit = self.idle_limit();
        let mut evicted = 0;
        self.sessions.retain(|id, orch| {
            if orch.is_busy() || orch.idle_for() < limit {
                return true;
            }
            tracing::info!(
                target: "panel::gateway",
                session = %id,
                idle_secs = orch.idle_for().as_secs(),
                "evicting idle interview"
            );
            evicted += 1;
            false
        });
        evicted
    }

    /// Background eviction loop for the lifetime of the server.
    pub fn spawn_eviction(&self) -> JoinHandle<()> {
        let state = self.clone();
        let every = self.idle_limit().min(EVICTION_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                state.maybe_evict();
            }
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Admission metadata from request headers. The client IP is the first `X-Forwarded-For`
/// hop, falling back to `X-Real-IP`.
pub fn request_meta(headers: &HeaderMap) -> RequestMeta {
    let ip = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(str::to_string);
    RequestMeta {
        user_id: header_str(headers, USER_ID_HEADER).map(str::to_string),
        ip,
        user_agent: header_str(headers, "user-agent").map(str::to_string),
        accept_language: header_str(headers, "accept-language").map(str::to_string),
    }
}
