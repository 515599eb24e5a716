//! Log configuration for nativebind
//!
//! The library itself only emits `tracing` events and never installs a
//! subscriber, so it stays silent unless the embedding application (or the
//! `nativebind` binary) calls [`init`].

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;

/// Logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.to_ascii_lowercase().as_str() {
            "error" | "err" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" | "verbose" => Some(Self::Trace),
            _ => None,
        }
    }

    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(text)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::parse(s).ok_or_else(|| {
            format!(
                "invalid log level '{}', expected one of error, warn, info, debug, trace",
                s
            )
        })
    }
}

/// User-specified or environment-provided log configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub level: LogLevel,
    pub ansi: bool,
}

impl LogOptions {
    pub const DEFAULT: Self = Self {
        level: LogLevel::Warn,
        ansi: true,
    };

    pub fn with_level(level: LogLevel) -> Self {
        Self {
            level,
            ..Self::DEFAULT
        }
    }

    /// Reads `NATIVEBIND_LOG`, keeping `base` when it is unset or invalid.
    #[must_use]
    pub fn from_env(base: Self) -> Self {
        let level = env::var_os("NATIVEBIND_LOG").map(|value| value.to_string_lossy().to_string());
        apply_env_override(base, level.as_deref())
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn apply_env_override(mut options: LogOptions, level: Option<&str>) -> LogOptions {
    if let Some(spec) = level.and_then(LogLevel::parse) {
        options.level = spec;
    }
    options
}

/// Install a stderr `fmt` subscriber. Only the first call in a process has
/// any effect, and a subscriber the host installed earlier is left in place.
/// `RUST_LOG` directives take precedence over `options.level`.
pub fn init(options: LogOptions) {
    use std::io::IsTerminal;
    use std::sync::OnceLock;
    use tracing_subscriber::{fmt, EnvFilter};

    static INITIALISED: OnceLock<()> = OnceLock::new();

    let _ = INITIALISED.get_or_init(|| {
        let use_ansi = options.ansi
            && env::var_os("NO_COLOR").is_none()
            && std::io::stderr().is_terminal();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("nativebind={}", options.level)));

        let subscriber = fmt::fmt()
            .with_env_filter(filter)
            .with_ansi(use_ansi)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .compact()
            .finish();
        if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
            tracing::debug!(error = %err, "keeping the subscriber installed by the host");
        }
    });
}
