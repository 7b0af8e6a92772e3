//! Decision input and the tasks derived from it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Acknowledgement recorded for a finish signal.
pub const FINISH_MESSAGE: &str = "Research marked as complete";

/// Payload recorded for every delegation refused by the iteration governor.
pub const REFUSAL_MESSAGE: &str =
    "Research iteration limit reached. Unable to conduct further research.";

/// Prefix of the payload recorded for a failed delegation.
pub const DELEGATE_FAILURE_PREFIX: &str = "Error synthesizing research report";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Read-only thinking step, handled synchronously.
    Reflect,
    /// Spawns an isolated research sub-execution.
    Delegate,
    /// Terminal signal for the whole run.
    Finish,
}

impl TaskKind {
    /// Resolve an action name. Both the tool names used by the decision step
    /// and the short kind names are accepted.
    pub fn from_action_name(name: &str) -> Option<Self> {
        match name {
            "think_tool" | "reflect" => Some(Self::Reflect),
            "ConductResearch" | "delegate" => Some(Self::Delegate),
            "ResearchComplete" | "finish" => Some(Self::Finish),
            _ => None,
        }
    }

    /// Tool name used on the wire for this kind.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::Reflect => "think_tool",
            Self::Delegate => "ConductResearch",
            Self::Finish => "ResearchComplete",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reflect => write!(f, "reflect"),
            Self::Delegate => write!(f, "delegate"),
            Self::Finish => write!(f, "finish"),
        }
    }
}

/// One requested action as produced by the decision step.
///
/// `id` is the correlation id supplied by the decision step; it is echoed
/// back in the single ledger entry answering this action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl Action {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    pub fn reflect(id: impl Into<String>, reflection: &str) -> Self {
        Self::new(
            id,
            TaskKind::Reflect.tool_name(),
            serde_json::json!({ "reflection": reflection }),
        )
    }

    pub fn delegate(id: impl Into<String>, topic: &str) -> Self {
        Self::new(
            id,
            TaskKind::Delegate.tool_name(),
            serde_json::json!({ "research_topic": topic }),
        )
    }

    pub fn finish(id: impl Into<String>) -> Self {
        Self::new(id, TaskKind::Finish.tool_name(), serde_json::json!({}))
    }

    pub fn kind(&self) -> Option<TaskKind> {
        TaskKind::from_action_name(&self.name)
    }

    /// Free-form text payload for `kind`.
    ///
    /// A bare string argument is taken as-is; otherwise the first known
    /// field for the kind is used.
    fn payload_for(&self, kind: TaskKind) -> String {
        if let Value::String(s) = &self.args {
            return s.clone();
        }
        let fields: &[&str] = match kind {
            TaskKind::Delegate => &["research_topic", "topic"],
            TaskKind::Reflect => &["reflection", "thought"],
            TaskKind::Finish => &[],
        };
        fields
            .iter()
            .find_map(|f| self.args.get(*f).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    }

    /// Convert into a task, or `None` when the action name is not recognised.
    pub fn to_task(&self) -> Option<Task> {
        let kind = self.kind()?;
        Some(Task {
            id: self.id.clone(),
            kind,
            payload: self.payload_for(kind),
        })
    }
}

/// A unit of work with a single terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    /// Research topic for delegations, reflection text for reflections.
    pub payload: String,
}

/// Terminal outcome of one task, recorded exactly once in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success { content: String },
    Failure { reason: String },
    /// Declined by the iteration governor; never dispatched.
    Refused,
}

impl Outcome {
    pub fn success(content: impl Into<String>) -> Self {
        Self::Success {
            content: content.into(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    /// Text of the correlated response returned to the decision step.
    pub fn content(&self) -> &str {
        match self {
            Self::Success { content } => content,
            Self::Failure { reason } => reason,
            Self::Refused => REFUSAL_MESSAGE,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused)
    }
}
