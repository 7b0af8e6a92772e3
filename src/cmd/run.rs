//! `delve run`: drive the supervisor from a script.

use anyhow::{Context, Result};
use console::style;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use delve::config::Config;
use delve::evaluation::{ParallelismEvaluation, evaluate_summary};
use delve::orchestrator::{ResearchSummary, Supervisor};
use delve::scripted::{Script, ScriptedDecisionSource, ScriptedResearcher};
use delve::stream::render::{render_outline, status_line, terminal_width};
use delve::stream::{BatchingScheduler, ChannelSink, EventEmitter, EventJournal, EventSink, Tee};

/// Envelopes buffered between the supervisor and the scheduler.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Serialize)]
struct RunReport<'a> {
    summary: &'a ResearchSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    evaluation: Option<ParallelismEvaluation>,
    journal: &'a Path,
}

pub async fn cmd_run(
    project_dir: &Path,
    verbose: bool,
    script_path: &Path,
    max_iterations: Option<u32>,
    journal: Option<PathBuf>,
    live: bool,
    json: bool,
) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), verbose, max_iterations)?;
    let _log_guard = delve::logging::init(&config.logging, verbose, &config.log_dir);
    config.ensure_directories()?;

    let script = Script::load(script_path)?;
    let journal_path = journal.unwrap_or_else(|| config.default_journal_path());
    let journal = Arc::new(
        EventJournal::open(&journal_path)
            .with_context(|| format!("Failed to open journal {}", journal_path.display()))?,
    );

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let sinks: Vec<Arc<dyn EventSink>> = vec![journal, Arc::new(ChannelSink::new(tx))];
    let emitter = EventEmitter::new(Arc::new(Tee::new(sinks)));

    let supervisor = Supervisor::new(
        config.supervisor.clone(),
        Arc::new(ScriptedDecisionSource::new(script.rounds.clone())),
        Arc::new(ScriptedResearcher::new(script.research.clone())),
    )
    .with_emitter(emitter);

    let scheduler = BatchingScheduler::new(config.reconstructor_config());
    let live_task = live.then(|| {
        let mut view_rx = scheduler.subscribe();
        tokio::spawn(async move {
            let mut last = String::new();
            while view_rx.changed().await.is_ok() {
                let line = status_line(&view_rx.borrow_and_update());
                if line != last {
                    println!("{} {}", style("live").cyan(), line);
                    last = line;
                }
            }
        })
    });

    let brief = script.brief.clone();
    let supervise = async move {
        let result = supervisor.run(&brief).await;
        // Dropping the supervisor closes the event channel, ending the scheduler.
        drop(supervisor);
        result
    };
    let (result, view) =
        futures::future::join(supervise, scheduler.run(rx, config.flush_interval)).await;

    if let Some(task) = live_task {
        task.await.ok();
    }

    let summary = result.context("Supervisor run failed")?;
    let evaluation = script
        .expected_threads
        .map(|expected| evaluate_summary(&summary, Some(expected)));

    if json {
        let report = RunReport {
            summary: &summary,
            evaluation,
            journal: &journal_path,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("{}", style(&summary.brief).bold());
    println!();
    println!("{}", style("Notes").bold().underlined());
    for (i, note) in summary.notes.iter().enumerate() {
        println!("  {}. {}", i + 1, note);
    }
    if !summary.raw_notes.is_empty() {
        println!();
        println!("{}", style("Raw notes").bold().underlined());
        for note in &summary.raw_notes {
            for line in note.lines() {
                println!("  {}", line);
            }
        }
    }
    println!();
    if summary.limit_reached() {
        println!(
            "{} Cannot continue: research iteration limit reached.",
            style("Limit:").yellow().bold()
        );
    }
    println!(
        "Rounds: {}  Delegations: {}  Ended: {}",
        summary.rounds,
        summary.delegate_actions(),
        summary.termination
    );
    if let Some(eval) = &evaluation {
        let verdict = if eval.passed() {
            style("pass").green()
        } else {
            style("fail").red()
        };
        println!(
            "Parallelism: {} (expected {}, actual {})",
            verdict, eval.expected_threads, eval.actual_threads
        );
    }
    println!("Journal: {}", journal_path.display());
    println!();
    print!("{}", render_outline(&view, terminal_width()));

    Ok(())
}
