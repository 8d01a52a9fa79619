//! Integration test: interviewer rotation never repeats and honours weights.

use panel_core::{InterviewerId, InterviewerRoster, RotationPolicy};
use std::collections::HashMap;

#[test]
fn never_repeats_over_many_iterations() {
    for seed in 0..20u64 {
        let policy = RotationPolicy::with_seed(InterviewerRoster::standard(), seed);
        let mut current = policy.first();
        for _ in 0..1_000 {
            let next = policy.next(current);
            assert_ne!(next, current, "seed {}", seed);
            current = next;
        }
    }
}

#[test]
fn two_member_panel_alternates() {
    let roster = InterviewerRoster::subset(&[InterviewerId::HrPartner, InterviewerId::Executive]).unwrap();
    let policy = RotationPolicy::with_seed(roster, 9);
    let mut current = InterviewerId::HrPartner;
    for _ in 0..50 {
        current = policy.next(current);
        assert!(matches!(current, InterviewerId::HrPartner | InterviewerId::Executive));
    }
    assert_eq!(policy.next(InterviewerId::HrPartner), InterviewerId::Executive);
    assert_eq!(policy.next(InterviewerId::Executive), InterviewerId::HrPartner);
}

#[test]
fn renormalised_weights_shape_the_choice() {
    // after the technical lead, hr (0.3) and executive (0.3) are equally likely
    let policy = RotationPolicy::with_seed(InterviewerRoster::standard(), 1234);
    let mut counts: HashMap<InterviewerId, u32> = HashMap::new();
    for _ in 0..4_000 {
        *counts.entry(policy.next(InterviewerId::TechnicalLead)).or_default() += 1;
    }
    assert!(!counts.contains_key(&InterviewerId::TechnicalLead));
    let hr = counts[&InterviewerId::HrPartner] as f64;
    assert!((hr / 4_000.0 - 0.5).abs() < 0.05);
}
