//! Partitions a decision step's output into reflections, delegations and
//! finish signals.

use crate::errors::ProtocolViolation;
use crate::orchestrator::task::{Action, Task, TaskKind};
use std::collections::HashSet;

/// One round's worth of interpreted actions.
///
/// Every list preserves input order. Actions whose name is not recognised
/// end up in `unknown`; they still count as dispatched and must be answered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionBatch {
    pub reflections: Vec<Task>,
    pub delegations: Vec<Task>,
    pub finish_signals: Vec<Task>,
    pub unknown: Vec<Action>,
    /// All correlation ids in input order.
    dispatch_order: Vec<String>,
}

impl ActionBatch {
    pub fn dispatch_order(&self) -> &[String] {
        &self.dispatch_order
    }

    pub fn len(&self) -> usize {
        self.dispatch_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatch_order.is_empty()
    }

    pub fn has_finish_signal(&self) -> bool {
        !self.finish_signals.is_empty()
    }
}

/// Interpret the latest decision output.
///
/// Returns `Ok(None)` when the output is empty, meaning no further action.
/// Reusing a correlation id within one output is a protocol violation.
pub fn interpret(actions: &[Action]) -> Result<Option<ActionBatch>, ProtocolViolation> {
    if actions.is_empty() {
        return Ok(None);
    }

    let mut seen = HashSet::new();
    let mut batch = ActionBatch::default();

    for action in actions {
        if !seen.insert(action.id.as_str()) {
            return Err(ProtocolViolation::DuplicateDispatch {
                id: action.id.clone(),
            });
        }
        batch.dispatch_order.push(action.id.clone());

        match action.to_task() {
            Some(task) => match task.kind {
                TaskKind::Reflect => batch.reflections.push(task),
                TaskKind::Delegate => batch.delegations.push(task),
                TaskKind::Finish => batch.finish_signals.push(task),
            },
            None => {
                tracing::warn!(id = %action.id, name = %action.name, "unrecognised action");
                batch.unknown.push(action.clone());
            }
        }
    }

    tracing::debug!(
        reflections = batch.reflections.len(),
        delegations = batch.delegations.len(),
        finish = batch.finish_signals.len(),
        unknown = batch.unknown.len(),
        "interpreted action batch"
    );
    Ok(Some(batch))
}
