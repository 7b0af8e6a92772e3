//! Exactly-one-response bookkeeping for dispatched tasks.

use crate::errors::ProtocolViolation;
use crate::orchestrator::task::{Outcome, TaskKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What to do when an id is recorded a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerMode {
    /// Fail with a protocol violation.
    #[default]
    Strict,
    /// Keep the first write and log a warning.
    KeepFirst,
}

impl std::fmt::Display for LedgerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerMode::Strict => write!(f, "strict"),
            LedgerMode::KeepFirst => write!(f, "keep_first"),
        }
    }
}

impl std::str::FromStr for LedgerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "strict" => Ok(LedgerMode::Strict),
            "keep_first" => Ok(LedgerMode::KeepFirst),
            _ => anyhow::bail!(
                "Invalid ledger mode '{}'. Valid values: strict, keep_first",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub task_id: String,
    pub round: u32,
    /// `None` for actions whose name was not recognised.
    pub kind: Option<TaskKind>,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn content(&self) -> &str {
        self.outcome.content()
    }
}

/// Records one terminal response per dispatched task.
///
/// Ids are registered per round with [`ResponseLedger::open_round`]; a
/// round may only be closed once every registered id has an entry.
#[derive(Debug, Clone, Default)]
pub struct ResponseLedger {
    mode: LedgerMode,
    entries: Vec<LedgerEntry>,
    recorded: HashMap<String, usize>,
    /// Every id ever dispatched, across rounds.
    dispatched: HashSet<String>,
    round: u32,
    round_ids: Vec<String>,
}

impl ResponseLedger {
    pub fn new(mode: LedgerMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Register the ids dispatched in `round`.
    ///
    /// An id may be dispatched at most once for the lifetime of the ledger.
    pub fn open_round(&mut self, round: u32, ids: &[String]) -> Result<(), ProtocolViolation> {
        if let Some(dup) = ids.iter().find(|id| self.dispatched.contains(*id)) {
            return Err(ProtocolViolation::DuplicateDispatch { id: dup.clone() });
        }
        self.dispatched.extend(ids.iter().cloned());
        self.round = round;
        self.round_ids = ids.to_vec();
        Ok(())
    }

    /// Record the single response for `task_id`.
    ///
    /// Returns `Ok(false)` when a duplicate was ignored under
    /// [`LedgerMode::KeepFirst`].
    pub fn record(
        &mut self,
        task_id: &str,
        kind: Option<TaskKind>,
        outcome: Outcome,
    ) -> Result<bool, ProtocolViolation> {
        if !self.round_ids.iter().any(|id| id == task_id) {
            return Err(ProtocolViolation::UnknownTask {
                id: task_id.to_string(),
            });
        }

        if self.recorded.contains_key(task_id) {
            return match self.mode {
                LedgerMode::Strict => Err(ProtocolViolation::DuplicateResponse {
                    id: task_id.to_string(),
                }),
                LedgerMode::KeepFirst => {
                    tracing::warn!(task_id, "duplicate ledger entry ignored");
                    Ok(false)
                }
            };
        }

        self.recorded.insert(task_id.to_string(), self.entries.len());
        self.entries.push(LedgerEntry {
            task_id: task_id.to_string(),
            round: self.round,
            kind,
            outcome,
            recorded_at: Utc::now(),
        });
        Ok(true)
    }

    /// Every id of the current round still lacking a response.
    pub fn missing(&self) -> Vec<String> {
        self.round_ids
            .iter()
            .filter(|id| !self.recorded.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Fail unless every id of the current round has an entry.
    pub fn assert_complete(&self) -> Result<(), ProtocolViolation> {
        match self.missing().into_iter().next() {
            Some(id) => Err(ProtocolViolation::MissingResponse { id }),
            None => Ok(()),
        }
    }

    pub fn get(&self, task_id: &str) -> Option<&LedgerEntry> {
        self.recorded.get(task_id).map(|&i| &self.entries[i])
    }

    /// Entries in recording order.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn round_entries(&self, round: u32) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(move |e| e.round == round)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<LedgerEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_record_once_per_dispatched_task() {
        let mut ledger = ResponseLedger::default();
        ledger.open_round(1, &ids(&["a", "b"])).unwrap();
        ledger
            .record("b", Some(TaskKind::Delegate), Outcome::success("B"))
            .unwrap();
        assert!(ledger.assert_complete().is_err());
        ledger
            .record("a", Some(TaskKind::Delegate), Outcome::success("A"))
            .unwrap();
        ledger.assert_complete().unwrap();

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.entries()[0].task_id, "b");
        assert_eq!(ledger.get("a").unwrap().content(), "A");
    }

    #[test]
    fn test_strict_mode_rejects_second_write() {
        let mut ledger = ResponseLedger::new(LedgerMode::Strict);
        ledger.open_round(1, &ids(&["a"])).unwrap();
        ledger.record("a", None, Outcome::success("first")).unwrap();
        let err = ledger.record("a", None, Outcome::success("second")).unwrap_err();
        assert_eq!(err, ProtocolViolation::DuplicateResponse { id: "a".into() });
    }

    #[test]
    fn test_keep_first_mode_ignores_second_write() {
        let mut ledger = ResponseLedger::new(LedgerMode::KeepFirst);
        ledger.open_round(1, &ids(&["a"])).unwrap();
        assert!(ledger.record("a", None, Outcome::success("first")).unwrap());
        assert!(!ledger.record("a", None, Outcome::success("second")).unwrap());
        assert_eq!(ledger.get("a").unwrap().content(), "first");
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_missing_response_is_reported() {
        let mut ledger = ResponseLedger::default();
        ledger.open_round(1, &ids(&["a", "b"])).unwrap();
        ledger.record("a", None, Outcome::Refused).unwrap();
        assert_eq!(
            ledger.assert_complete().unwrap_err(),
            ProtocolViolation::MissingResponse { id: "b".into() }
        );
    }

    #[test]
    fn test_record_for_undispatched_id_is_violation() {
        let mut ledger = ResponseLedger::default();
        ledger.open_round(1, &ids(&["a"])).unwrap();
        assert!(matches!(
            ledger.record("zzz", None, Outcome::Refused),
            Err(ProtocolViolation::UnknownTask { .. })
        ));
    }

    #[test]
    fn test_id_cannot_be_dispatched_in_two_rounds() {
        let mut ledger = ResponseLedger::default();
        ledger.open_round(1, &ids(&["a"])).unwrap();
        ledger.record("a", None, Outcome::Refused).unwrap();
        assert!(matches!(
            ledger.open_round(2, &ids(&["a"])),
            Err(ProtocolViolation::DuplicateDispatch { .. })
        ));
    }

    #[test]
    fn test_entries_carry_round_number() {
        let mut ledger = ResponseLedger::default();
        ledger.open_round(1, &ids(&["a"])).unwrap();
        ledger.record("a", None, Outcome::success("1")).unwrap();
        ledger.open_round(2, &ids(&["b", "c"])).unwrap();
        ledger.record("b", None, Outcome::success("2")).unwrap();
        ledger.record("c", None, Outcome::success("2")).unwrap();
        assert_eq!(ledger.round_entries(2).count(), 2);
        assert_eq!(ledger.round_entries(1).count(), 1);
    }

    #[test]
    fn test_ledger_mode_parse() {
        assert_eq!("strict".parse::<LedgerMode>().unwrap(), LedgerMode::Strict);
        assert_eq!("keep-first".parse::<LedgerMode>().unwrap(), LedgerMode::KeepFirst);
        assert!("lenient".parse::<LedgerMode>().is_err());
        assert_eq!(LedgerMode::KeepFirst.to_string(), "keep_first");
    }
}
