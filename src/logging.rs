//! Tracing subscriber setup.
//!
//! Two layers: a human-readable (or JSON) layer on stderr, quiet by default
//! so it does not fight the progress bars, and a JSON file layer under
//! `.conductor/logs/` rotated daily. `CONDUCTOR_LOG` overrides both filters
//! with any `EnvFilter` directive.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

pub const LOG_ENV: &str = "CONDUCTOR_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn default_directive(verbose: bool, file: bool) -> &'static str {
    match (verbose, file) {
        (true, _) => "debug",
        (false, true) => "info",
        (false, false) => "warn",
    }
}

fn filter(verbose: bool, file: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, file)))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file layer on drop; keep it alive for the
/// life of the process.
pub fn init(verbose: bool, format: LogFormat, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let stderr_layer = match format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter(verbose, false))
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter(verbose, false))
            .boxed(),
    };
    layers.push(stderr_layer);

    let guard = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("conductor")
                .filename_suffix("log")
                .build(dir)
                .context("Failed to open conductor log file")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(filter(verbose, true))
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}
