//! Wire-level event envelopes.
//!
//! An envelope describes one state transition of one logical event. Envelopes
//! are serialized as single-line JSON objects:
//!
//! ```json
//! {"id":"7f0c…","eventType":"/researcher/tool_call","status":"running",
//!  "parentId":"a91e…","seq":2,"toolCallId":"call_3",
//!  "content":{"data":"partial text","mergeRule":"concat"}}
//! ```

use crate::errors::StreamError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Who emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Human,
    Clarifier,
    BriefWriter,
    Supervisor,
    Researcher,
    Tool,
    /// Any role this build does not know about. Never rendered.
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Clarifier => "clarifier",
            Role::BriefWriter => "brief_writer",
            Role::Supervisor => "supervisor",
            Role::Researcher => "researcher",
            Role::Tool => "tool",
            Role::Unknown => "unknown",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "human" => Role::Human,
            "clarifier" => Role::Clarifier,
            "brief_writer" => Role::BriefWriter,
            "supervisor" => Role::Supervisor,
            "researcher" => Role::Researcher,
            "tool" => Role::Tool,
            _ => Role::Unknown,
        }
    }
}

/// What kind of content an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subtype {
    Question,
    Answer,
    /// Boundary of a group that owns child events.
    Group,
    ToolCall,
    Text,
    Unknown,
}

impl Subtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subtype::Question => "question",
            Subtype::Answer => "answer",
            Subtype::Group => "group",
            Subtype::ToolCall => "tool_call",
            Subtype::Text => "text",
            Subtype::Unknown => "unknown",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "question" => Subtype::Question,
            "answer" => Subtype::Answer,
            "group" => Subtype::Group,
            "tool_call" => Subtype::ToolCall,
            "text" => Subtype::Text,
            _ => Subtype::Unknown,
        }
    }
}

/// Hierarchical `/<role>/<subtype>` tag.
///
/// Parsing never fails: unrecognised parts become `Unknown`, which
/// downstream consumers treat as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Classification {
    pub role: Role,
    pub subtype: Subtype,
}

impl Classification {
    pub const fn new(role: Role, subtype: Subtype) -> Self {
        Self { role, subtype }
    }

    pub const USER_CHAT: Self = Self::new(Role::Human, Subtype::Text);
    pub const CLARIFY: Self = Self::new(Role::Clarifier, Subtype::Question);
    pub const BRIEF: Self = Self::new(Role::BriefWriter, Subtype::Text);
    pub const SUPERVISOR_GROUP: Self = Self::new(Role::Supervisor, Subtype::Group);
    pub const SUPERVISOR_TOOL_CALL: Self = Self::new(Role::Supervisor, Subtype::ToolCall);
    pub const RESEARCHER_GROUP: Self = Self::new(Role::Researcher, Subtype::Group);
    pub const RESEARCHER_TOOL_CALL: Self = Self::new(Role::Researcher, Subtype::ToolCall);

    pub fn is_known(&self) -> bool {
        self.role != Role::Unknown && self.subtype != Subtype::Unknown
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.role.as_str(), self.subtype.as_str())
    }
}

impl FromStr for Classification {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Tags emitted by older producers.
        let legacy = match s {
            "/ai/clarify" => Some(Self::CLARIFY),
            "/ai/brief" => Some(Self::BRIEF),
            "/human/chat" => Some(Self::USER_CHAT),
            _ => None,
        };
        if let Some(c) = legacy {
            return Ok(c);
        }

        let mut parts = s.trim_start_matches('/').splitn(2, '/');
        let role = parts.next().map(Role::parse).unwrap_or(Role::Unknown);
        let subtype = parts.next().map(Subtype::parse).unwrap_or(Subtype::Unknown);
        Ok(Self { role, subtype })
    }
}

impl Serialize for Classification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Classification {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or(Classification::new(Role::Unknown, Subtype::Unknown)))
    }
}

/// Lifecycle status. `Finished` and `Error` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Running,
    Finished,
    Error,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Finished | Status::Error)
    }

    /// The status after observing `next` while in `self`.
    ///
    /// Returns `None` when the transition is rejected (leaving a terminal
    /// state). A non-terminal status never moves backwards, so a stale
    /// `pending` arriving after `running` keeps the node running.
    pub fn advance(self, next: Status) -> Option<Status> {
        if self.is_terminal() {
            return None;
        }
        Some(self.max(next))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Finished => "finished",
            Status::Error => "error",
        };
        f.write_str(s)
    }
}

/// How repeated emissions for the same id combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeRule {
    #[default]
    Replace,
    /// Append string data to the existing string payload.
    Concat,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub data: Value,
    #[serde(default, rename = "mergeRule", alias = "aggregateRule")]
    pub merge: MergeRule,
}

impl Content {
    pub fn replace(data: Value) -> Self {
        Self {
            data,
            merge: MergeRule::Replace,
        }
    }

    pub fn concat(fragment: impl Into<String>) -> Self {
        Self {
            data: Value::String(fragment.into()),
            merge: MergeRule::Concat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "eventType", alias = "classification")]
    pub classification: Classification,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub content: Content,
    /// Per-id emission counter, starting at 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Correlation id of the underlying tool call, if this is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Envelope {
    pub fn new(id: impl Into<String>, classification: Classification, status: Status) -> Self {
        Self {
            id: id.into(),
            classification,
            status,
            parent_id: None,
            content: Content::default(),
            seq: None,
            tool_call_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.content = Content::replace(data);
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.content = Content::concat(fragment);
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn with_tool_call_id(mut self, tool_call_id: impl Into<String>) -> Self {
        self.tool_call_id = Some(tool_call_id.into());
        self
    }

    pub fn to_json_line(&self) -> Result<String, StreamError> {
        serde_json::to_string(self).map_err(|source| StreamError::Encode {
            id: self.id.clone(),
            source,
        })
    }

    /// Decode one envelope; `line` is only used for error reporting.
    pub fn from_json_line(raw: &str, line: usize) -> Result<Self, StreamError> {
        serde_json::from_str(raw).map_err(|source| StreamError::Decode { line, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification_display_and_parse() {
        let c = Classification::RESEARCHER_TOOL_CALL;
        assert_eq!(c.to_string(), "/researcher/tool_call");
        let parsed: Classification = "/researcher/tool_call".parse().unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn test_classification_legacy_tags() {
        let clarify: Classification = "/ai/clarify".parse().unwrap();
        assert_eq!(clarify, Classification::CLARIFY);
        let chat: Classification = "/human/chat".parse().unwrap();
        assert_eq!(chat, Classification::USER_CHAT);
    }

    #[test]
    fn test_classification_unknown_is_not_an_error() {
        let c: Classification = "/robot/dance".parse().unwrap();
        assert_eq!(c.role, Role::Unknown);
        assert_eq!(c.subtype, Subtype::Unknown);
        assert!(!c.is_known());

        let env: Envelope =
            serde_json::from_str(r#"{"id":"x","eventType":"garbage","status":"pending"}"#).unwrap();
        assert!(!env.classification.is_known());
    }

    #[test]
    fn test_status_advance() {
        assert_eq!(Status::Pending.advance(Status::Running), Some(Status::Running));
        assert_eq!(Status::Running.advance(Status::Pending), Some(Status::Running));
        assert_eq!(Status::Running.advance(Status::Error), Some(Status::Error));
        assert_eq!(Status::Finished.advance(Status::Running), None);
        assert_eq!(Status::Error.advance(Status::Error), None);
    }

    #[test]
    fn test_envelope_wire_format() {
        let env = Envelope::new("e1", Classification::SUPERVISOR_TOOL_CALL, Status::Running)
            .with_parent("g1")
            .with_fragment("Hel")
            .with_seq(1)
            .with_tool_call_id("call_1");

        let line = env.to_json_line().unwrap();
        assert!(line.contains(r#""eventType":"/supervisor/tool_call""#));
        assert!(line.contains(r#""parentId":"g1""#));
        assert!(line.contains(r#""mergeRule":"concat""#));
        assert!(line.contains(r#""toolCallId":"call_1""#));
        assert_eq!(Envelope::from_json_line(&line, 1).unwrap(), env);
    }

    #[test]
    fn test_envelope_defaults_and_aggregate_rule_alias() {
        let env: Envelope = serde_json::from_value(json!({
            "id": "b",
            "eventType": "/ai/brief",
            "status": "running",
            "content": {"data": "abc", "aggregateRule": "concat"}
        }))
        .unwrap();
        assert_eq!(env.content.merge, MergeRule::Concat);
        assert!(env.parent_id.is_none());
        assert!(env.seq.is_none());
    }

    #[test]
    fn test_decode_error_reports_line() {
        let err = Envelope::from_json_line("{not json", 7).unwrap_err();
        assert!(err.to_string().contains("line 7"));
    }
}
