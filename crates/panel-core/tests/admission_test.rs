//! Integration test: AdmissionGuard on a manual clock.
//!
//! Verifies that:
//! 1. A full sliding window admits `max_requests`, denies the next with a positive retry-after,
//!    and admits again once the window has passed.
//! 2. The daily start-interview quota resets exactly at UTC midnight.
//! 3. A burst flags the identity for the cooldown period.
//! 4. Concurrent callers with different identities never interfere.
//! 5. A request spending several categories is seen once by the burst heuristic.

use chrono::{TimeZone, Utc};
use panel_core::{
    AdmissionConfig, AdmissionGuard, AdmissionRequest, Clock, DenialReason, ManualClock, MemoryStore,
    PanelError, RequestCategory, RequestMeta, Tier, WindowLimit,
};
use std::sync::Arc;
use std::time::Duration;

fn browser(user: &str) -> RequestMeta {
    RequestMeta {
        user_id: Some(user.to_string()),
        ip: Some("198.51.100.20".to_string()),
        user_agent: Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/124.0".to_string()),
        accept_language: Some("en-US,en;q=0.9".to_string()),
    }
}

fn guard_at(clock: Arc<ManualClock>, config: AdmissionConfig) -> AdmissionGuard {
    let store = Arc::new(MemoryStore::new(clock.clone()));
    AdmissionGuard::new(config, false, store, clock)
}

#[test]
fn sliding_window_denies_then_recovers() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()));
    let mut cfg = AdmissionConfig::default();
    cfg.turn_message = WindowLimit::new(3, 10);
    let guard = guard_at(clock.clone(), cfg);
    let req = AdmissionRequest::new(browser("alice"), RequestCategory::TurnMessage);

    for i in 0..3 {
        let d = guard.check(&req);
        assert!(d.allowed, "request {} should pass", i);
        assert_eq!(d.remaining, 2 - i);
        clock.advance(Duration::from_millis(500));
    }

    let denied = guard.check(&req);
    assert!(!denied.allowed);
    assert_eq!(denied.denial, Some(DenialReason::RateLimited));
    assert!(denied.retry_after_secs.unwrap() > 0);
    assert!(matches!(
        denied.clone().into_result(),
        Err(PanelError::RateLimited { .. })
    ));

    clock.advance(Duration::from_secs(10));
    assert!(guard.check(&req).allowed);
}

#[test]
fn categories_have_independent_windows() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()));
    let mut cfg = AdmissionConfig::default();
    cfg.turn_message = WindowLimit::new(1, 60);
    let guard = guard_at(clock.clone(), cfg);

    assert!(guard
        .check(&AdmissionRequest::new(browser("bob"), RequestCategory::TurnMessage))
        .allowed);
    clock.advance(Duration::from_millis(300));
    assert!(guard
        .check(&AdmissionRequest::new(browser("bob"), RequestCategory::SpeechSynthesis))
        .allowed);
    clock.advance(Duration::from_millis(300));
    assert!(!guard
        .check(&AdmissionRequest::new(browser("bob"), RequestCategory::TurnMessage))
        .allowed);
}

#[test]
fn daily_quota_resets_at_utc_midnight() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 50).unwrap()));
    let guard = guard_at(clock.clone(), AdmissionConfig::default());
    let req = AdmissionRequest::new(browser("carol"), RequestCategory::StartInterview);

    // free tier: 3 per day
    for _ in 0..3 {
        assert!(guard.check(&req).allowed);
        clock.advance(Duration::from_secs(3));
    }
    // 23:59:59 still counts against today
    assert_eq!(clock.utc_now(), Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 59).unwrap());
    let denied = guard.check(&req);
    assert_eq!(denied.denial, Some(DenialReason::DailyQuotaExceeded));
    assert_eq!(denied.retry_after_secs, Some(1));
    assert_eq!(denied.daily.map(|d| d.used), Some(3));

    // 00:00:01 is a fresh day
    clock.advance(Duration::from_secs(2));
    let fresh = guard.check(&req);
    assert!(fresh.allowed);
    assert_eq!(fresh.daily.map(|d| d.used), Some(1));
}

#[test]
fn unlimited_tier_has_no_daily_cap() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()));
    let guard = guard_at(clock.clone(), AdmissionConfig::default());
    let req = AdmissionRequest::new(browser("dana"), RequestCategory::StartInterview)
        .with_tier(Tier::Unlimited);
    for _ in 0..20 {
        let d = guard.check(&req);
        assert!(d.allowed);
        assert_eq!(d.daily.and_then(|u| u.limit), None);
        // stay inside the sliding window budget
        clock.advance(Duration::from_secs(13));
    }
}

#[test]
fn burst_flags_identity_for_cooldown() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
    let mut cfg = AdmissionConfig::default();
    cfg.speech_synthesis = WindowLimit::new(1000, 60);
    let guard = guard_at(clock.clone(), cfg);
    let req = AdmissionRequest::new(browser("eve"), RequestCategory::SpeechSynthesis);

    let mut denied = None;
    for _ in 0..15 {
        let d = guard.check(&req);
        if !d.allowed {
            denied = Some(d);
            break;
        }
        clock.advance(Duration::from_millis(10));
    }
    let denied = denied.expect("burst should be denied");
    assert_eq!(denied.denial, Some(DenialReason::BotDetected));

    // well-behaved traffic is still refused during the cooldown
    clock.advance(Duration::from_secs(60));
    let d = guard.check(&req);
    assert_eq!(d.denial, Some(DenialReason::BotDetected));
    assert_eq!(d.bot.confidence, 1.0);

    clock.advance(Duration::from_secs(15 * 60));
    assert!(guard.check(&req).allowed);
}

#[test]
fn first_request_from_unknown_identity_is_allowed() {
    let guard = AdmissionGuard::in_memory(AdmissionConfig::default(), true);
    let meta = RequestMeta {
        user_id: None,
        ip: None,
        user_agent: Some("Mozilla/5.0".to_string()),
        accept_language: Some("de".to_string()),
    };
    let d = guard.check(&AdmissionRequest::new(meta, RequestCategory::Evaluation));
    assert!(d.allowed);
    assert!(d.identity.starts_with("anon:unknown:"));
}

#[test]
fn concurrent_identities_do_not_interfere() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
    let mut cfg = AdmissionConfig::default();
    cfg.turn_message = WindowLimit::new(5, 60);
    // bursts are expected here: threads hammer the same instant
    cfg.burst_threshold = u32::MAX;
    let guard = Arc::new(guard_at(clock, cfg));

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let guard = guard.clone();
            std::thread::spawn(move || {
                let req = AdmissionRequest::new(browser(&format!("user-{}", n)), RequestCategory::TurnMessage);
                (0..10).filter(|_| guard.check(&req).allowed).count()
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap(), 5);
    }
}

#[test]
fn multi_category_request_counts_once_for_bursts() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap()));
    let guard = guard_at(clock.clone(), AdmissionConfig::default());
    let categories = [RequestCategory::TurnMessage, RequestCategory::SpeechSynthesis];

    // 10 rapid requests leave 9 short gaps, below the burst threshold.
    for i in 0..10 {
        let decisions = guard.check_many(&browser("frank"), Tier::Free, &categories);
        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|d| d.allowed), "request {} should pass", i);
        clock.advance(Duration::from_millis(10));
    }

    // the 11th rapid request is the burst
    let decisions = guard.check_many(&browser("frank"), Tier::Free, &categories);
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].denial, Some(DenialReason::BotDetected));
}

#[test]
fn multi_category_request_stops_at_first_denial() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap()));
    let mut cfg = AdmissionConfig::default();
    cfg.turn_message = WindowLimit::new(1, 60);
    cfg.speech_synthesis = WindowLimit::new(2, 60);
    let guard = guard_at(clock.clone(), cfg);
    let categories = [RequestCategory::TurnMessage, RequestCategory::SpeechSynthesis];

    assert!(guard
        .check_many(&browser("gina"), Tier::Free, &categories)
        .iter()
        .all(|d| d.allowed));
    clock.advance(Duration::from_secs(1));

    let denied = guard.check_many(&browser("gina"), Tier::Free, &categories);
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].category, RequestCategory::TurnMessage);
    assert_eq!(denied[0].denial, Some(DenialReason::RateLimited));

    // the denied request did not spend a synthesis slot
    clock.advance(Duration::from_secs(1));
    let speech = guard.check(&AdmissionRequest::new(browser("gina"), RequestCategory::SpeechSynthesis));
    assert!(speech.allowed);
    assert_eq!(speech.remaining, 0);
}

#[test]
fn tier_parsing_falls_back_to_free() {
    assert_eq!(Tier::parse("PAID"), Tier::Paid);
    assert_eq!(Tier::parse(" unlimited "), Tier::Unlimited);
    assert_eq!(Tier::parse("gold"), Tier::Free);
}
