//! Execution tree built from materialized events.
//!
//! Which classifications become nodes is decided by a [`NodeRegistry`]
//! passed in at construction, so independent trees can use different tables.

use crate::stream::envelope::{Classification, Status};
use crate::stream::reconstructor::MaterializedEvent;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    User,
    Clarify,
    Brief,
    Supervisor,
    Researcher,
    ToolCall,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::User => "User",
            NodeKind::Clarify => "Clarify",
            NodeKind::Brief => "Brief",
            NodeKind::Supervisor => "Supervisor",
            NodeKind::Researcher => "Researcher",
            NodeKind::ToolCall => "Tool call",
        }
    }
}

/// Classification → node kind table.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    kinds: HashMap<Classification, NodeKind>,
}

impl NodeRegistry {
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    pub fn register(mut self, classification: Classification, kind: NodeKind) -> Self {
        self.kinds.insert(classification, kind);
        self
    }

    pub fn resolve(&self, classification: &Classification) -> Option<NodeKind> {
        self.kinds.get(classification).copied()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::empty()
            .register(Classification::USER_CHAT, NodeKind::User)
            .register(Classification::CLARIFY, NodeKind::Clarify)
            .register(Classification::BRIEF, NodeKind::Brief)
            .register(Classification::SUPERVISOR_GROUP, NodeKind::Supervisor)
            .register(Classification::SUPERVISOR_TOOL_CALL, NodeKind::ToolCall)
            .register(Classification::RESEARCHER_GROUP, NodeKind::Researcher)
            .register(Classification::RESEARCHER_TOOL_CALL, NodeKind::ToolCall)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub status: Status,
    pub data: Value,
    /// Parent the node is actually attached under; `None` at the root.
    pub attached_to: Option<String>,
    /// Parent the events declared, which may differ when the node was parked.
    pub declared_parent: Option<String>,
    pub children: Vec<String>,
}

impl Node {
    /// Whether the node sits at the root although its events named a parent.
    pub fn is_parked(&self) -> bool {
        self.attached_to.is_none() && self.declared_parent.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionTree {
    registry: NodeRegistry,
    nodes: HashMap<String, Node>,
    roots: Vec<String>,
}

impl ExecutionTree {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            registry,
            nodes: HashMap::new(),
            roots: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn roots(&self) -> impl Iterator<Item = &Node> {
        self.roots.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn children(&self, id: &str) -> impl Iterator<Item = &Node> {
        self.nodes
            .get(id)
            .into_iter()
            .flat_map(|n| n.children.iter())
            .filter_map(|id| self.nodes.get(id))
    }

    /// Insert or update the node for `event`.
    ///
    /// Returns `false` when the classification has no node kind; such events
    /// stay in the event list but never enter the tree.
    pub fn upsert(&mut self, event: &MaterializedEvent) -> bool {
        if let Some(node) = self.nodes.get_mut(&event.id) {
            node.status = event.status;
            node.data = event.data.clone();
            if node.declared_parent.is_none() {
                node.declared_parent = event.parent_id.clone();
            }
            return true;
        }

        let Some(kind) = self.registry.resolve(&event.classification) else {
            tracing::trace!(id = %event.id, event_type = %event.classification, "no node kind");
            return false;
        };

        // Placement is decided once, on first sighting.
        let attached_to = event
            .parent_id
            .as_ref()
            .filter(|p| self.nodes.contains_key(p.as_str()))
            .cloned();

        match &attached_to {
            Some(parent) => {
                if let Some(p) = self.nodes.get_mut(parent) {
                    p.children.push(event.id.clone());
                }
            }
            None => {
                if let Some(parent) = &event.parent_id {
                    tracing::debug!(id = %event.id, parent = %parent, "parent unknown, parking at root");
                }
                self.roots.push(event.id.clone());
            }
        }

        self.nodes.insert(
            event.id.clone(),
            Node {
                id: event.id.clone(),
                kind,
                status: event.status,
                data: event.data.clone(),
                attached_to,
                declared_parent: event.parent_id.clone(),
                children: Vec::new(),
            },
        );
        true
    }

    /// Remove a node. Its children are re-parked at the root.
    pub fn remove(&mut self, id: &str) -> Option<Node> {
        let node = self.nodes.remove(id)?;

        match &node.attached_to {
            Some(parent) => {
                if let Some(p) = self.nodes.get_mut(parent) {
                    p.children.retain(|c| c != id);
                }
            }
            None => self.roots.retain(|r| r != id),
        }

        for child in &node.children {
            if let Some(c) = self.nodes.get_mut(child) {
                c.attached_to = None;
                self.roots.push(child.clone());
            }
        }
        Some(node)
    }

    /// Depth-first walk yielding `(depth, node)`.
    pub fn walk(&self) -> Vec<(usize, &Node)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, &str)> =
            self.roots.iter().rev().map(|id| (0, id.as_str())).collect();
        while let Some((depth, id)) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            out.push((depth, node));
            for child in node.children.iter().rev() {
                stack.push((depth + 1, child.as_str()));
            }
        }
        out
    }
}

impl Default for ExecutionTree {
    fn default() -> Self {
        Self::new(NodeRegistry::default())
    }
}
