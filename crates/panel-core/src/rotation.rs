//! **RotationPolicy**: Weighted-random choice of the next interviewer that never
//! repeats the current one while the panel has more than one member.

use crate::interviewer::{InterviewerId, InterviewerRoster};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

pub struct RotationPolicy {
    roster: InterviewerRoster,
    rng: Mutex<StdRng>,
}

impl RotationPolicy {
    /// Entropy-seeded policy for production use.
    pub fn new(roster: InterviewerRoster) -> Self {
        Self {
            roster,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible policy: the same seed and call sequence yields the same picks.
    pub fn with_seed(roster: InterviewerRoster, seed: u64) -> Self {
        Self {
            roster,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn roster(&self) -> &InterviewerRoster {
        &self.roster
    }

    /// Opening interviewer: weighted pick over the whole panel.
    pub fn first(&self) -> InterviewerId {
        self.pick(None)
    }

    /// Next interviewer after `current`. With a single-member panel that member is returned.
    pub fn next(&self, current: InterviewerId) -> InterviewerId {
        if self.roster.len() == 1 {
            return self.roster.ids()[0];
        }
        self.pick(Some(current))
    }

    fn pick(&self, exclude: Option<InterviewerId>) -> InterviewerId {
        let candidates: Vec<(InterviewerId, f64)> = self
            .roster
            .profiles()
            .iter()
            .filter(|p| Some(p.id) != exclude)
            .map(|p| (p.id, p.rotation_weight.max(0.0)))
            .collect();
        // roster is non-empty and exclusion only applies when len > 1
        let fallback = candidates
            .first()
            .map(|(id, _)| *id)
            .unwrap_or(InterviewerId::TechnicalLead);

        let total: f64 = candidates.iter().map(|(_, w)| w).sum();
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        if total <= 0.0 {
            let i = rng.gen_range(0..candidates.len());
            return candidates[i].0;
        }
        let mut roll = rng.gen::<f64>() * total;
        for (id, w) in &candidates {
            if roll < *w {
                return *id;
            }
            roll -= w;
        }
        // float rounding on the last bucket
        candidates
            .iter()
            .rev()
            .find(|(_, w)| *w > 0.0)
            .map(|(id, _)| *id)
            .unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_policies_agree() {
        let a = RotationPolicy::with_seed(InterviewerRoster::standard(), 42);
        let b = RotationPolicy::with_seed(InterviewerRoster::standard(), 42);
        let mut cur_a = a.first();
        let mut cur_b = b.first();
        assert_eq!(cur_a, cur_b);
        for _ in 0..50 {
            cur_a = a.next(cur_a);
            cur_b = b.next(cur_b);
            assert_eq!(cur_a, cur_b);
        }
    }

    #[test]
    fn single_member_panel_repeats() {
        let roster = InterviewerRoster::subset(&[InterviewerId::Executive]).unwrap();
        let p = RotationPolicy::with_seed(roster, 1);
        assert_eq!(p.next(InterviewerId::Executive), InterviewerId::Executive);
    }
}
