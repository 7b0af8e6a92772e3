use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;

use crate::delve_config::{DelveConfig, LoggingSection};
use crate::orchestrator::SupervisorConfig;
use crate::stream::ReconstructorConfig;
use crate::stream::tree::NodeRegistry;

/// Runtime configuration for delve.
///
/// Bridges the layered [`DelveConfig`] to the settings the supervisor and
/// the stream pipeline are built from.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub log_dir: PathBuf,
    pub journal_dir: PathBuf,
    pub verbose: bool,
    pub supervisor: SupervisorConfig,
    pub flush_interval: Duration,
    pub reorder_window: usize,
    pub logging: LoggingSection,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, max_iterations: Option<u32>) -> Result<Self> {
        let delve_config = DelveConfig::with_cli_args(project_dir, verbose, max_iterations)?;
        Ok(Self::from_delve_config(delve_config))
    }

    pub fn from_delve_config(delve_config: DelveConfig) -> Self {
        let toml = &delve_config.toml;
        Self {
            project_dir: delve_config.project_dir.clone(),
            log_dir: delve_config.log_dir(),
            journal_dir: delve_config.journal_dir(),
            verbose: delve_config.verbose,
            supervisor: SupervisorConfig {
                max_iterations: toml.supervisor.max_iterations,
                max_parallel: toml.supervisor.max_parallel,
                ledger_mode: toml.supervisor.ledger_mode,
            },
            flush_interval: Duration::from_millis(toml.stream.flush_interval_ms.max(1)),
            reorder_window: toml.stream.reorder_window,
            logging: toml.logging.clone(),
        }
    }

    pub fn reconstructor_config(&self) -> ReconstructorConfig {
        ReconstructorConfig {
            reorder_window: self.reorder_window,
            registry: NodeRegistry::default(),
        }
    }

    /// Fresh timestamped journal path under `.delve/journals/`.
    pub fn default_journal_path(&self) -> PathBuf {
        self.journal_dir
            .join(format!("run-{}.jsonl", Utc::now().format("%Y%m%dT%H%M%S%.3f")))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.journal_dir).context("Failed to create journal directory")?;
        if self.logging.file {
            std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        }
        Ok(())
    }
}
