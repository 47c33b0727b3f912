//! Threshold-gated voting power.
//!
//! A tag is in `Bootstrap` until `min_users_for_threshold` distinct users
//! have voted in it, and in `Steady` afterwards. The phase is never stored;
//! it is recomputed from the current participant count on every call.

use serde::{Serialize, Deserialize};

use crate::records::TagSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Too few participants: every vote counts.
    Bootstrap,
    /// Only users at or above the reputation threshold carry weight.
    Steady,
}

impl Phase {
    pub fn of(settings: &TagSettings, active_user_count: u64) -> Phase {
        if active_user_count < u64::from(settings.min_users_for_threshold) {
            Phase::Bootstrap
        } else {
            Phase::Steady
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VotingPower {
    pub has_voting_power: bool,
    pub vote_weight: f64,
}

pub fn evaluate(total_effective: f64, settings: &TagSettings, active_user_count: u64) -> VotingPower {
    let total = if total_effective > 0.0 { total_effective } else { 0.0 };
    match Phase::of(settings, active_user_count) {
        Phase::Bootstrap => VotingPower { has_voting_power: true, vote_weight: total },
        Phase::Steady => {
            let has_voting_power = total >= settings.reputation_threshold;
            VotingPower {
                has_voting_power,
                vote_weight: if has_voting_power { total } else { 0.0 },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TagSettings {
        TagSettings { reputation_threshold: 10.0, min_users_for_threshold: 5, ..TagSettings::default() }
    }

    #[test]
    fn bootstrap_always_grants_power() {
        let s = settings();
        for total in [0.0, 0.2, 9.9, 50.0] {
            let p = evaluate(total, &s, 3);
            assert!(p.has_voting_power);
            assert_eq!(p.vote_weight, total);
        }
        assert_eq!(Phase::of(&s, 4), Phase::Bootstrap);
    }

    #[test]
    fn steady_phase_gates_on_threshold() {
        let s = settings();
        assert_eq!(Phase::of(&s, 5), Phase::Steady);

        let below = evaluate(9.9, &s, 5);
        assert!(!below.has_voting_power);
        assert_eq!(below.vote_weight, 0.0);

        let at = evaluate(10.0, &s, 12);
        assert!(at.has_voting_power);
        assert_eq!(at.vote_weight, 10.0);
    }

    #[test]
    fn negative_totals_are_floored() {
        let p = evaluate(-3.0, &settings(), 0);
        assert_eq!(p.vote_weight, 0.0);
    }

    #[test]
    fn steady_never_grants_below_threshold() {
        let s = settings();
        let mut total = 0.0;
        while total < 10.0 {
            assert!(!evaluate(total, &s, 100).has_voting_power);
            total += 0.37;
        }
    }
}
