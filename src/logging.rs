//! Logging setup using tracing
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Single-line human-readable output
    #[default]
    Compact,
    /// JSON lines, for piping into log tooling
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: LogFormat::Compact,
            with_target: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// `debug` when verbose, `info` otherwise.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.level = if verbose { "debug" } else { "info" }.into();
        self
    }

    pub fn json(mut self, json: bool) -> Self {
        self.format = if json { LogFormat::Json } else { LogFormat::Compact };
        self
    }
}

/// Install the global subscriber. Logs go to stderr so tables and JSON on stdout stay clean.
/// `RUST_LOG` overrides the configured level.
pub fn init(config: LogConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(config.with_target);
            tracing_subscriber::registry().with(env_filter).with(layer).init();
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(config.with_target);
            tracing_subscriber::registry().with(env_filter).with(layer).init();
        }
    }
}
