//! tracing initialisation.
//!
//! Logs go to stderr (plain or JSON) and, when enabled, to a daily-rotated
//! JSON file under `.delve/logs/`. Stdout stays reserved for command output.

use crate::delve_config::LoggingSection;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Keeps the file writer flushing until dropped.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Filter directive: `RUST_LOG` wins, then `--verbose`, then the configured level.
pub fn filter_directive(rust_log: Option<&str>, level: &str, verbose: bool) -> String {
    match rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directive) => directive.to_string(),
        None if verbose => "debug".to_string(),
        None => level.to_string(),
    }
}

/// Install the global subscriber. Calling it twice is harmless; the second
/// call leaves the first subscriber in place.
pub fn init(settings: &LoggingSection, verbose: bool, log_dir: &Path) -> LogGuard {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directive = filter_directive(rust_log.as_deref(), &settings.level, verbose);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(true);
    layers.push(if settings.json {
        stderr.json().boxed()
    } else {
        stderr.boxed()
    });

    let mut file_guard = None;
    if settings.file {
        match std::fs::create_dir_all(log_dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(log_dir, "delve.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                layers.push(
                    fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_writer(writer)
                        .boxed(),
                );
                file_guard = Some(guard);
            }
            Err(e) => eprintln!("Failed to create log directory {}: {}", log_dir.display(), e),
        }
    }

    let installed = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            filter = %directive,
            json = settings.json,
            file = settings.file,
            "tracing initialized"
        );
    }

    LogGuard { _file: file_guard }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_takes_precedence() {
        assert_eq!(filter_directive(Some("delve=trace"), "info", true), "delve=trace");
    }

    #[test]
    fn test_verbose_raises_level() {
        assert_eq!(filter_directive(None, "warn", true), "debug");
        assert_eq!(filter_directive(Some("  "), "warn", false), "warn");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LoggingSection::default();
        let _first = init(&settings, false, dir.path());
        let _second = init(&settings, false, dir.path());
    }
}
