//! Vote-based hysteresis between load samples and core switches

use crate::config::Tunables;
use serde::{Deserialize, Serialize};

/// Outcome of one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    None,
    AddCore,
    RemoveCore,
}

/// Accumulated up/down votes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCounters {
    pub up: u32,
    pub down: u32,
}

impl VoteCounters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold one aggregate load sample into the votes.
    ///
    /// Loads inside `[load_threshold_down, load_threshold_up]` leave the votes
    /// alone. An action fires once a counter strictly exceeds its threshold,
    /// and both counters are cleared when it does.
    pub fn observe(&mut self, load: u32, tunables: &Tunables) -> Action {
        if load > tunables.load_threshold_up {
            self.up += 1;
            self.down = self.down.saturating_sub(1);
        } else if load < tunables.load_threshold_down {
            self.down += 1;
            self.up = self.up.saturating_sub(1);
        }

        if self.up > tunables.vote_threshold_up {
            self.reset();
            Action::AddCore
        } else if self.down > tunables.vote_threshold_down {
            self.reset();
            Action::RemoveCore
        } else {
            Action::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunables() -> Tunables {
        Tunables {
            load_threshold_up: 80,
            load_threshold_down: 20,
            vote_threshold_up: 2,
            vote_threshold_down: 5,
            ..Tunables::default()
        }
    }

    #[test]
    fn test_add_fires_on_third_high_sample() {
        let t = tunables();
        let mut votes = VoteCounters::default();

        assert_eq!(votes.observe(85, &t), Action::None);
        assert_eq!(votes.up, 1);
        assert_eq!(votes.observe(85, &t), Action::None);
        assert_eq!(votes.up, 2);
        assert_eq!(votes.observe(85, &t), Action::AddCore);
        assert_eq!(votes, VoteCounters::default());
    }

    #[test]
    fn test_remove_fires_on_sixth_low_sample() {
        let t = tunables();
        let mut votes = VoteCounters::default();

        for _ in 0..5 {
            assert_eq!(votes.observe(5, &t), Action::None);
        }
        assert_eq!(votes.observe(5, &t), Action::RemoveCore);
        assert_eq!(votes, VoteCounters::default());
    }

    #[test]
    fn test_dead_band_leaves_votes_unchanged() {
        let t = tunables();
        let mut votes = VoteCounters { up: 1, down: 2 };

        for load in [20, 21, 50, 79, 80] {
            assert_eq!(votes.observe(load, &t), Action::None);
            assert_eq!(votes, VoteCounters { up: 1, down: 2 });
        }
    }

    #[test]
    fn test_opposite_votes_decay_without_underflow() {
        let t = tunables();
        let mut votes = VoteCounters::default();

        votes.observe(90, &t);
        votes.observe(10, &t);
        assert_eq!(votes, VoteCounters { up: 0, down: 1 });
        votes.observe(10, &t);
        assert_eq!(votes, VoteCounters { up: 0, down: 2 });
        votes.observe(90, &t);
        assert_eq!(votes, VoteCounters { up: 1, down: 1 });
    }

    #[test]
    fn test_mixed_sequence_resets_together() {
        let t = tunables();
        let mut votes = VoteCounters::default();
        let loads = [90, 10, 95, 50, 99, 100, 3, 4, 2, 1, 0, 0, 0, 0, 0];

        for load in loads {
            let action = votes.observe(load, &t);
            if action != Action::None {
                assert_eq!(votes, VoteCounters::default());
            }
            assert!(votes.up <= t.vote_threshold_up);
            assert!(votes.down <= t.vote_threshold_down);
        }
    }
}
