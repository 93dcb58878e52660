//! `tracing` subscriber setup.

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingSection;

const LOG_FILE_PREFIX: &str = "sprintline.log";

/// Keeps the file writer flushing until dropped at the end of `main`.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Filter directive: `RUST_LOG` wins, then `--verbose`, then the config file.
pub fn filter_directive(section: &LoggingSection, verbose: bool) -> String {
    if verbose {
        return "sprintline=debug,info".to_string();
    }
    section
        .filter
        .clone()
        .unwrap_or_else(|| "sprintline=info,warn".to_string())
}

/// Install the global subscriber: stderr (text or JSON) plus an optional
/// daily rolling JSON file under `section.dir`.
pub fn init(section: &LoggingSection, verbose: bool) -> anyhow::Result<LogGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(section, verbose))
            .context("Invalid logging.filter directive")?,
    };

    let stderr = if section.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };

    let (file, guard) = match &section.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard { _file: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_overrides_configured_filter() {
        let section = LoggingSection {
            filter: Some("warn".into()),
            ..Default::default()
        };
        assert_eq!(filter_directive(&section, false), "warn");
        assert!(filter_directive(&section, true).contains("sprintline=debug"));
    }

    #[test]
    fn default_filter_is_valid() {
        let directive = filter_directive(&LoggingSection::default(), false);
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
