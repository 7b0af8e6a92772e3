//! Bounds the number of escalation rounds.

/// Default number of rounds before delegations are refused.
pub const DEFAULT_MAX_ITERATIONS: u32 = 6;

/// Budget decision for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundBudget {
    /// 1-based round number.
    pub round: u32,
    /// When set, delegations in this round are refused and the loop ends
    /// after the round.
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct IterationGovernor {
    completed: u32,
    max: u32,
}

impl IterationGovernor {
    pub fn new(max: u32) -> Self {
        Self { completed: 0, max }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Rounds begun so far.
    pub fn rounds(&self) -> u32 {
        self.completed
    }

    pub fn is_exhausted(&self) -> bool {
        self.completed >= self.max
    }

    /// Check the bound and start the next round.
    pub fn begin_round(&mut self) -> RoundBudget {
        let exhausted = self.is_exhausted();
        self.completed += 1;
        if exhausted {
            tracing::info!(
                round = self.completed,
                max = self.max,
                "iteration limit reached, refusing delegations"
            );
        }
        RoundBudget {
            round: self.completed,
            exhausted,
        }
    }
}

impl Default for IterationGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}
