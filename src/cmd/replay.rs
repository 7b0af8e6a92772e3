//! `delve replay`: rebuild an execution tree from a journal.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;

use delve::config::Config;
use delve::stream::render::{render_outline, status_line, terminal_width};
use delve::stream::{BatchingScheduler, EventJournal};

pub fn cmd_replay(project_dir: &Path, verbose: bool, journal: &Path, json: bool) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), verbose, None)?;
    let _log_guard = delve::logging::init(&config.logging, verbose, &config.log_dir);

    let records = EventJournal::read(journal)
        .with_context(|| format!("Failed to read journal {}", journal.display()))?;

    // Same ingestion path as the live stream, one batch for the whole journal.
    let mut scheduler = BatchingScheduler::new(config.reconstructor_config());
    let count = records.len();
    for record in records {
        scheduler.upsert(record.envelope);
    }
    scheduler.mark_completed();
    let view = scheduler.view();

    if json {
        let tree: Vec<_> = view
            .tree
            .walk()
            .into_iter()
            .map(|(depth, node)| json!({ "depth": depth, "node": node }))
            .collect();
        let out = json!({ "envelopes": count, "events": view.events(), "tree": tree });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Replayed {} envelopes from {}", count, journal.display());
    println!("{}", status_line(view));
    println!();
    print!("{}", render_outline(view, terminal_width()));
    Ok(())
}
