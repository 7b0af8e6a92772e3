//! Scores whether the supervisor parallelised a request as expected.
//!
//! A comparison of N items should produce N delegations; a single
//! ranking or listing task should produce one.

use crate::orchestrator::ResearchSummary;
use serde::Serialize;

pub const PARALLELISM_KEY: &str = "correct_parallelization";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParallelismEvaluation {
    pub key: &'static str,
    /// 1.0 when the delegation count matches, else 0.0.
    pub score: f64,
    pub actual_threads: usize,
    pub expected_threads: usize,
}

impl ParallelismEvaluation {
    pub fn passed(&self) -> bool {
        self.score >= 1.0
    }
}

/// Score `actual` delegations against `expected` (defaults to 1 when unset or 0).
pub fn evaluate_parallelism(actual: usize, expected: Option<usize>) -> ParallelismEvaluation {
    let expected_threads = expected.filter(|&n| n > 0).unwrap_or(1);
    ParallelismEvaluation {
        key: PARALLELISM_KEY,
        score: if actual == expected_threads { 1.0 } else { 0.0 },
        actual_threads: actual,
        expected_threads,
    }
}

/// Evaluate a finished run, counting refused delegations too.
pub fn evaluate_summary(summary: &ResearchSummary, expected: Option<usize>) -> ParallelismEvaluation {
    evaluate_parallelism(summary.delegate_actions(), expected)
}
