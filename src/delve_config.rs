//! Configuration file for delve, read from `.delve/delve.toml`.
//!
//! Settings are layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [supervisor]
//! max_iterations = 6
//! max_parallel = 0          # 0 = unbounded fan-out
//! ledger_mode = "strict"    # or "keep_first"
//!
//! [stream]
//! flush_interval_ms = 16
//! reorder_window = 64
//!
//! [logging]
//! level = "info"
//! json = false
//! file = false
//! ```

use crate::orchestrator::governor::DEFAULT_MAX_ITERATIONS;
use crate::orchestrator::ledger::LedgerMode;
use crate::stream::reconstructor::DEFAULT_REORDER_WINDOW;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "delve.toml";
pub const DELVE_DIR: &str = ".delve";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSection {
    /// Rounds before delegations are refused
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Concurrent delegations; 0 means unbounded
    #[serde(default)]
    pub max_parallel: usize,
    #[serde(default)]
    pub ledger_mode: LedgerMode,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_parallel: 0,
            ledger_mode: LedgerMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSection {
    /// Batching scheduler tick
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Out-of-order envelopes buffered per id before a gap is skipped
    #[serde(default = "default_reorder_window")]
    pub reorder_window: usize,
}

fn default_flush_interval_ms() -> u64 {
    16
}

fn default_reorder_window() -> usize {
    DEFAULT_REORDER_WINDOW
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            reorder_window: default_reorder_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG`/`DELVE_LOG` are unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rotated logs under `.delve/logs/`
    #[serde(default)]
    pub file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: false,
        }
    }
}

/// Root of `delve.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelveToml {
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl DelveToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse delve.toml")
    }

    /// Load from `<delve_dir>/delve.toml`, or defaults if the file is absent.
    pub fn load_or_default(delve_dir: &Path) -> Result<Self> {
        let config_path = delve_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize delve.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `DELVE_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(val) = lookup("DELVE_MAX_ITERATIONS") {
            self.supervisor.max_iterations = val
                .trim()
                .parse()
                .with_context(|| format!("Invalid DELVE_MAX_ITERATIONS '{}'", val))?;
        }
        if let Some(val) = lookup("DELVE_LEDGER_MODE") {
            self.supervisor.ledger_mode = val.parse()?;
        }
        if let Some(val) = lookup("DELVE_LOG")
            && !val.trim().is_empty()
        {
            self.logging.level = val;
        }
        Ok(())
    }

    /// Human-readable warnings for suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.supervisor.max_iterations == 0 {
            warnings.push(
                "supervisor.max_iterations = 0: every delegation will be refused".to_string(),
            );
        }
        if self.stream.flush_interval_ms == 0 {
            warnings.push("stream.flush_interval_ms = 0: flushing on every tick".to_string());
        }
        if self.stream.reorder_window == 0 {
            warnings.push(
                "stream.reorder_window = 0: treated as 1, sequence gaps skipped immediately"
                    .to_string(),
            );
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "Invalid logging.level '{}': expected a tracing filter such as 'info' or 'delve=debug'",
                self.logging.level
            ));
        }

        warnings
    }
}

/// Configuration merged from file, environment and CLI.
#[derive(Debug, Clone)]
pub struct DelveConfig {
    pub project_dir: PathBuf,
    pub delve_dir: PathBuf,
    pub toml: DelveToml,
    pub verbose: bool,
}

impl DelveConfig {
    /// Load `.delve/delve.toml` under `project_dir` and apply the environment.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let delve_dir = project_dir.join(DELVE_DIR);
        let mut toml = DelveToml::load_or_default(&delve_dir)?;
        toml.apply_env()?;

        Ok(Self {
            project_dir,
            delve_dir,
            toml,
            verbose: false,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        max_iterations: Option<u32>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        if let Some(max) = max_iterations {
            config.toml.supervisor.max_iterations = max;
        }
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.delve_dir.join(CONFIG_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.delve_dir.join("logs")
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.delve_dir.join("journals")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
