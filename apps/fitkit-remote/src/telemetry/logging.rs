//! Diagnostic logging for the CLI.
//!
//! Every event this crate emits carries one of the `fitkit::*` targets in
//! [`APP_TARGETS`]. `--log-level` raises those targets only; third-party
//! crates stay at `warn` unless `FITKIT_TRACE_DEPS` is set. A full
//! `EnvFilter` string in `FITKIT_LOG_FILTER` replaces both rules.

use clap::ValueEnum;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::env_truthy;

pub const APP_TARGETS: &[&str] = &[
    "fitkit::auth",
    "fitkit::cli",
    "fitkit::connection",
    "fitkit::protocol",
    "fitkit::session",
    "fitkit::terminal",
];

/// Crates in this tree that log on their own.
const DEP_TARGETS: &[&str] = &["tokio_tungstenite", "tungstenite", "reqwest", "hyper", "rustls"];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid FITKIT_LOG_FILTER {filter:?}: {reason}")]
    Filter { filter: String, reason: String },
    #[error("failed to install logger: {0}")]
    Install(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Calls after a successful one are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let filter = match std::env::var("FITKIT_LOG_FILTER") {
        Ok(custom) => EnvFilter::try_new(&custom).map_err(|err| InitError::Filter {
            filter: custom.clone(),
            reason: err.to_string(),
        })?,
        Err(_) => EnvFilter::new(filter_directives(
            config.level,
            env_truthy("FITKIT_TRACE_DEPS"),
        )),
    };

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .try_init()
        .map_err(|err| InitError::Install(err.to_string()))?;

    let _ = GUARD.set(guard);
    Ok(())
}

/// `EnvFilter` directives for `level`: the crate's own targets at `level`,
/// everything else at `warn`. `trace_deps` raises [`DEP_TARGETS`] as well.
fn filter_directives(level: LogLevel, trace_deps: bool) -> String {
    if level <= LogLevel::Warn {
        return level.directive().to_owned();
    }
    let raised = APP_TARGETS
        .iter()
        .chain(trace_deps.then_some(DEP_TARGETS).unwrap_or_default());
    let mut directives = vec![LogLevel::Warn.directive().to_owned()];
    directives.extend(raised.map(|target| format!("{target}={}", level.directive())));
    directives.join(",")
}
