//! Supervisor loop state and run summaries.

use crate::orchestrator::ledger::LedgerEntry;
use crate::orchestrator::task::TaskKind;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// What the decision step sees at the start of each round.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorState {
    pub brief: String,
    /// 1-based number of the round about to run.
    pub round: u32,
    pub max_iterations: u32,
    /// Responses recorded in the previous round, in recording order.
    pub last_responses: Vec<LedgerEntry>,
    /// Raw notes gathered so far, in dispatch order per round.
    pub raw_notes: Vec<String>,
    pub history: Vec<RoundReport>,
}

impl SupervisorState {
    pub fn new(brief: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            brief: brief.into(),
            round: 1,
            max_iterations,
            last_responses: Vec::new(),
            raw_notes: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Rounds already completed.
    pub fn completed_rounds(&self) -> usize {
        self.history.len()
    }
}

/// Per-round bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u32,
    pub reflections: usize,
    pub delegations: usize,
    pub refused: usize,
    pub failed: usize,
    pub unknown: usize,
    pub finish_requested: bool,
    pub duration_ms: u64,
}

/// Why the supervisor loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    /// The decision step returned no actions.
    NoFurtherAction,
    /// A finish signal was processed.
    Finished,
    /// The iteration governor refused further delegations.
    IterationLimit,
    /// A fault inside round processing forced termination.
    Fault { message: String },
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::NoFurtherAction => write!(f, "no further action"),
            Termination::Finished => write!(f, "research complete"),
            Termination::IterationLimit => write!(f, "iteration limit reached"),
            Termination::Fault { message } => write!(f, "fault: {}", message),
        }
    }
}

/// Final result of a supervisor run.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchSummary {
    pub brief: String,
    pub rounds: u32,
    pub termination: Termination,
    /// Content of every ledger entry, in recording order.
    pub notes: Vec<String>,
    pub raw_notes: Vec<String>,
    pub ledger: Vec<LedgerEntry>,
    pub history: Vec<RoundReport>,
    pub duration_ms: u64,
}

impl ResearchSummary {
    /// Delegate actions requested across all rounds, dispatched or refused.
    pub fn delegate_actions(&self) -> usize {
        self.ledger
            .iter()
            .filter(|e| e.kind == Some(TaskKind::Delegate))
            .count()
    }

    /// The run ended on the iteration limit without accepting any
    /// delegation in its last round.
    pub fn limit_reached(&self) -> bool {
        self.termination == Termination::IterationLimit
            && self
                .history
                .last()
                .is_some_and(|r| r.delegations == 0)
    }
}

/// Timer for measuring execution duration.
#[derive(Debug, Clone)]
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}
