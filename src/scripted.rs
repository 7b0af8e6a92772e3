//! Scripted collaborators: a decision source that plays back fixed rounds
//! and a researcher that returns canned findings per topic.
//!
//! A script is JSON:
//!
//! ```json
//! {
//!   "brief": "Compare X vs Y vs Z",
//!   "expected_threads": 3,
//!   "rounds": [
//!     [{"id": "call_1", "name": "ConductResearch", "args": {"research_topic": "X"}}]
//!   ],
//!   "research": {
//!     "X": {"compressed": "...", "raw_notes": ["..."], "searches": ["x pricing"], "delay_ms": 20},
//!     "Y": {"error": "search provider timed out"}
//!   }
//! }
//! ```

use crate::errors::ResearchError;
use crate::orchestrator::{
    Action, DecisionSource, ResearchFindings, ResearchRequest, Researcher, SupervisorState,
};
use crate::stream::Classification;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CannedResearch {
    #[serde(default)]
    pub compressed: String,
    #[serde(default)]
    pub raw_notes: Vec<String>,
    /// Search queries reported as researcher tool calls
    #[serde(default)]
    pub searches: Vec<String>,
    #[serde(default)]
    pub delay_ms: u64,
    /// When set, the research fails with this message
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    pub brief: String,
    #[serde(default)]
    pub expected_threads: Option<usize>,
    #[serde(default)]
    pub rounds: Vec<Vec<Action>>,
    #[serde(default)]
    pub research: HashMap<String, CannedResearch>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid script: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse script JSON")
    }

    /// Every action across all rounds.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.rounds.iter().flatten()
    }
}

/// Returns round *n*'s actions on the *n*-th call and nothing afterwards.
pub struct ScriptedDecisionSource {
    rounds: Vec<Vec<Action>>,
}

impl ScriptedDecisionSource {
    pub fn new(rounds: Vec<Vec<Action>>) -> Self {
        Self { rounds }
    }
}

#[async_trait]
impl DecisionSource for ScriptedDecisionSource {
    async fn decide(&self, state: &SupervisorState) -> Result<Vec<Action>> {
        Ok(self
            .rounds
            .get(state.completed_rounds())
            .cloned()
            .unwrap_or_default())
    }
}

pub struct ScriptedResearcher {
    research: HashMap<String, CannedResearch>,
}

impl ScriptedResearcher {
    pub fn new(research: HashMap<String, CannedResearch>) -> Self {
        Self { research }
    }
}

#[async_trait]
impl Researcher for ScriptedResearcher {
    async fn research(&self, request: ResearchRequest) -> Result<ResearchFindings, ResearchError> {
        let topic = request.topic.as_str();
        let Some(canned) = self.research.get(topic) else {
            return Err(ResearchError::failed(topic, "no scripted findings"));
        };

        let steps = canned.searches.len() as u64 + 1;
        let pause = Duration::from_millis(canned.delay_ms / steps);

        for (i, query) in canned.searches.iter().enumerate() {
            let call = request
                .emitter
                .open(Classification::RESEARCHER_TOOL_CALL)
                .with_tool_call_id(format!("{}-search-{}", request.task_id, i + 1));
            call.pending(json!({ "name": "web_search", "args": { "query": query } }))?;
            tokio::time::sleep(pause).await;
            call.finish(json!(format!("Results for '{}'", query)))?;
        }

        tokio::time::sleep(pause).await;

        if let Some(message) = &canned.error {
            return Err(ResearchError::failed(topic, message.clone()));
        }

        // Stream the compressed summary word by word.
        let compress = request
            .emitter
            .open(Classification::RESEARCHER_TOOL_CALL)
            .with_tool_call_id(format!("{}-compress", request.task_id));
        compress.pending(json!({ "name": "compress_research" }))?;
        for fragment in canned.compressed.split_inclusive(' ') {
            compress.append(fragment)?;
        }
        compress.finish(Value::Null)?;

        Ok(ResearchFindings {
            compressed: canned.compressed.clone(),
            raw_notes: canned.raw_notes.clone(),
        })
    }
}
