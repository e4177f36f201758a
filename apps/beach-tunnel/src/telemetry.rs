//! Log setup for the `beach-tunnel` binary.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Context;
use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Crates whose own tracing drowns ours at `trace`.
const NOISY_DEPS: &[&str] = &[
    "webrtc",
    "webrtc_ice",
    "webrtc_sctp",
    "webrtc_dtls",
    "hyper",
    "reqwest",
    "rustls",
    "h2",
];

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
    /// Default `EnvFilter` directives. Debug and trace only raise our own
    /// crate; dependencies stay at info.
    pub fn directives(self) -> String {
        match self {
            LogLevel::Error => "error".to_string(),
            LogLevel::Warn => "warn".to_string(),
            LogLevel::Info => "info".to_string(),
            LogLevel::Debug => "info,beach_tunnel=debug".to_string(),
            LogLevel::Trace => NOISY_DEPS
                .iter()
                .fold("info,beach_tunnel=trace".to_string(), |acc, dep| format!("{acc},{dep}=info")),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. `BEACH_TUNNEL_LOG_FILTER` replaces the
/// level's directives outright.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    if GUARD.get().is_some() {
        return Ok(());
    }
    let directives =
        std::env::var("BEACH_TUNNEL_LOG_FILTER").unwrap_or_else(|_| config.level.directives());

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_target(config.level >= LogLevel::Debug)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("logger already installed")?;
    let _ = GUARD.set(guard);
    Ok(())
}
