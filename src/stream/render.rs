//! Plain-text outline of an execution tree.

use crate::stream::envelope::Status;
use crate::stream::reconstructor::ExecutionView;
use crate::stream::tree::{Node, NodeKind};
use console::{Emoji, style};
use serde_json::Value;

static CHECK: Emoji<'_, '_> = Emoji("\u{2705} ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("\u{274C} ", "[ERR] ");
static RUNNING: Emoji<'_, '_> = Emoji("\u{25B6}\u{FE0F}  ", "[>] ");
static CLOCK: Emoji<'_, '_> = Emoji("\u{23F1}\u{FE0F}  ", "[..] ");

/// Longest data preview shown per node, in characters.
const PREVIEW_CHARS: usize = 240;

fn status_icon(status: Status) -> Emoji<'static, 'static> {
    match status {
        Status::Pending => CLOCK,
        Status::Running => RUNNING,
        Status::Finished => CHECK,
        Status::Error => CROSS,
    }
}

/// Short human-readable summary of a node's payload.
pub fn preview(node: &Node) -> Option<String> {
    let text = match (&node.kind, &node.data) {
        (_, Value::Null) => return None,
        (_, Value::String(s)) => s.clone(),
        (NodeKind::ToolCall, Value::Object(map)) => {
            let name = map.get("name").and_then(Value::as_str).unwrap_or("tool");
            match map.get("args").or_else(|| map.get("input")) {
                Some(args) => format!("{name} {args}"),
                None => name.to_string(),
            }
        }
        (_, other) => other.to_string(),
    };

    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.chars().count() > PREVIEW_CHARS {
        let cut: String = text.chars().take(PREVIEW_CHARS - 3).collect();
        Some(format!("{cut}..."))
    } else {
        Some(text.to_string())
    }
}

/// Render the tree as an indented outline wrapped to `width` columns.
pub fn render_outline(view: &ExecutionView, width: usize) -> String {
    let mut out = String::new();
    for (depth, node) in view.tree.walk() {
        let indent = "  ".repeat(depth);
        let label = style(node.kind.label()).bold();
        let parked = if node.is_parked() {
            format!(" {}", style("(parked)").dim())
        } else {
            String::new()
        };
        out.push_str(&format!(
            "{indent}{}{label} {}{parked}\n",
            status_icon(node.status),
            style(&node.id).dim()
        ));

        if let Some(text) = preview(node) {
            let body_indent = format!("{indent}    ");
            let opts = textwrap::Options::new(width.max(body_indent.len() + 20))
                .initial_indent(&body_indent)
                .subsequent_indent(&body_indent);
            for line in textwrap::wrap(&text, &opts) {
                out.push_str(&line);
                out.push('\n');
            }
        }
    }
    out
}

/// One-line tally of node statuses.
pub fn status_line(view: &ExecutionView) -> String {
    let mut counts = [0usize; 4];
    for (_, node) in view.tree.walk() {
        let slot = match node.status {
            Status::Pending => 0,
            Status::Running => 1,
            Status::Finished => 2,
            Status::Error => 3,
        };
        counts[slot] += 1;
    }
    format!(
        "{} nodes: {} pending, {} running, {} finished, {} failed{}",
        view.tree.len(),
        counts[0],
        counts[1],
        counts[2],
        counts[3],
        if view.completed { " (stream ended)" } else { "" }
    )
}

/// Terminal width, or 100 columns when not attached to a terminal.
pub fn terminal_width() -> usize {
    terminal_size::terminal_size()
        .map(|(w, _)| w.0 as usize)
        .unwrap_or(100)
}
