//! Logging setup for Trellis applications
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and a
//! non-blocking writer. Defaults to JSON lines on stdout at INFO;
//! `RUST_LOG` overrides the configured level.
//!
//! ```no_run
//! use trellis_core::logging::*;
//!
//! let _guard = LogConfig::new()
//!     .level(LogLevel::DEBUG)
//!     .format(LogFormat::Pretty)
//!     .init();
//!
//! info!(port = 8080, "Application configured");
//! ```
//!
//! The same settings can come from the `log_level`, `log_format` and
//! `log_output` configuration keys. `log_output` is `stdout`, `stderr` or a
//! file path.
//!
//! ```no_run
//! # use trellis_core::logging::*;
//! let config = trellis_config::ConfigManager::new();
//! config.set("log_format", "compact").unwrap();
//! let _guard = LogConfig::from_config(&config).unwrap().init();
//! ```

use crate::error::{Error, Result};
use std::fs::OpenOptions;
use std::str::FromStr;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};
use trellis_config::{ConfigError, ConfigManager};

pub use tracing::Level as LogLevel;
pub use tracing::{debug, error, info, trace, warn};

pub const LEVEL_KEY: &str = "log_level";
pub const FORMAT_KEY: &str = "log_format";
pub const OUTPUT_KEY: &str = "log_output";

type FormatLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// How each log line is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Plain,
    /// Multi-line, ANSI colored
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "plain" | "text" => Ok(LogFormat::Plain),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(Error::InvalidArgument(format!("unknown log format: {}", other))),
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Appended to, created when missing
    File(String),
}

impl LogOutput {
    fn writer(&self) -> Result<(NonBlocking, WorkerGuard)> {
        Ok(match self {
            LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
            LogOutput::File(path) => {
                tracing_appender::non_blocking(OpenOptions::new().create(true).append(true).open(path)?)
            }
        })
    }
}

impl FromStr for LogOutput {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let target = s.trim();
        if target.eq_ignore_ascii_case("stdout") {
            Ok(LogOutput::Stdout)
        } else if target.eq_ignore_ascii_case("stderr") {
            Ok(LogOutput::Stderr)
        } else if target.is_empty() {
            Err(Error::InvalidArgument("empty log output".to_string()))
        } else {
            Ok(LogOutput::File(target.to_string()))
        }
    }
}

/// Per-line extras
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogDecorations {
    pub timestamps: bool,
    /// Module path of the event
    pub targets: bool,
    pub thread_ids: bool,
    /// Span close events, plus span context in JSON lines
    pub spans: bool,
    pub colors: bool,
}

impl Default for LogDecorations {
    fn default() -> Self {
        Self {
            timestamps: true,
            targets: true,
            thread_ids: false,
            spans: false,
            colors: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    pub decorations: LogDecorations,
    /// Filter directives such as `trellis_core=debug,hyper=info`; used
    /// instead of `level` when set
    pub directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::INFO,
            format: LogFormat::default(),
            output: LogOutput::default(),
            decorations: LogDecorations::default(),
            directives: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings from the configuration holder. Absent keys keep their
    /// defaults; present but unparsable ones are an error.
    pub fn from_config(config: &ConfigManager) -> Result<Self> {
        let mut log = Self::default();
        if let Ok(level) = config.get_string(LEVEL_KEY) {
            log.level = level
                .trim()
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("unknown log level: {}", level)))?;
        }
        if let Ok(format) = config.get_string(FORMAT_KEY) {
            log.format = format.parse()?;
            log.decorations.colors = log.format == LogFormat::Pretty;
        }
        if let Ok(output) = config.get_string(OUTPUT_KEY) {
            log.output = output.parse()?;
        }
        Ok(log)
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn decorations(mut self, decorations: LogDecorations) -> Self {
        self.decorations = decorations;
        self
    }

    pub fn directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    fn filter(&self) -> Result<EnvFilter> {
        self.filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok())
    }

    /// `RUST_LOG` wins over configured directives, which win over `level`
    fn filter_from(&self, env: Option<String>) -> Result<EnvFilter> {
        let (source, directives) = match (env, &self.directives) {
            (Some(env), _) if !env.trim().is_empty() => (EnvFilter::DEFAULT_ENV, env),
            (_, Some(directives)) => ("log filter directives", directives.clone()),
            _ => return Ok(EnvFilter::new(self.level.as_str().to_ascii_lowercase())),
        };
        EnvFilter::try_new(&directives).map_err(|e| {
            Error::Config(ConfigError::Malformed {
                location: source.to_string(),
                reason: format!("{:?}: {}", directives, e),
            })
        })
    }

    /// Install the global subscriber, reporting failure on stderr.
    ///
    /// The returned guard flushes buffered lines when dropped, so hold it
    /// for the life of the program.
    pub fn init(self) -> Option<WorkerGuard> {
        self.try_init()
            .map_err(|err| eprintln!("Logging not initialized: {}", err))
            .ok()
    }

    /// Fails when the log file cannot be opened, the filter directives do
    /// not parse or a global subscriber is already installed
    pub fn try_init(self) -> Result<WorkerGuard> {
        let (writer, guard) = self.output.writer()?;
        tracing_subscriber::registry()
            .with(self.filter()?)
            .with(self.layer(writer))
            .try_init()
            .map_err(|e| Error::Internal(format!("cannot install log subscriber: {}", e)))?;
        Ok(guard)
    }

    fn layer(&self, writer: NonBlocking) -> FormatLayer {
        let d = self.decorations;
        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(d.targets)
            .with_thread_ids(d.thread_ids)
            .with_ansi(d.colors && self.format != LogFormat::Json)
            .with_span_events(if d.spans { FmtSpan::CLOSE } else { FmtSpan::NONE });

        match (self.format, d.timestamps) {
            (LogFormat::Json, true) => layer
                .json()
                .with_current_span(d.spans)
                .with_span_list(d.spans)
                .boxed(),
            (LogFormat::Json, false) => layer
                .json()
                .without_time()
                .with_current_span(d.spans)
                .with_span_list(d.spans)
                .boxed(),
            (LogFormat::Pretty, true) => layer.pretty().boxed(),
            (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
            (LogFormat::Compact, true) => layer.compact().boxed(),
            (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
            (LogFormat::Plain, true) => layer.boxed(),
            (LogFormat::Plain, false) => layer.without_time().boxed(),
        }
    }
}
