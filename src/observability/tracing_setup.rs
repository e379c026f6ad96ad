// observability/tracing_setup.rs - Log Output

use std::str::FromStr;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// How agent logs are printed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TracingFormat {
    /// Multi-line, for operators at a terminal
    #[default]
    Pretty,
    /// One line per event, for hook logs
    Compact,
    /// For log shippers
    Json,
}

impl FromStr for TracingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`
    pub filter: String,

    pub format: TracingFormat,

    /// Print file and line of each event, and the duration of each
    /// dispatch span when it closes
    pub source_locations: bool,

    pub ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "warn,minio_agent=info".into(),
            format: TracingFormat::Pretty,
            source_locations: false,
            ansi: true,
        }
    }
}

impl TracingConfig {
    /// Agent logs at `level`, dependencies at warn. Debug and trace levels
    /// also turn on source locations.
    pub fn with_level(mut self, level: &str) -> Self {
        let level = level.trim().to_ascii_lowercase();
        self.source_locations = matches!(level.as_str(), "debug" | "trace");
        self.filter = format!("warn,minio_agent={}", level);
        self
    }

    pub fn with_format(mut self, format: TracingFormat) -> Self {
        if format == TracingFormat::Json {
            self.ansi = false;
        }
        self.format = format;
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.source_locations {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber. Call once, at startup.
///
/// Logs go to stderr so command output stays machine readable.
pub fn init_tracing(config: TracingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        TracingFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_span_events(config.span_events())
                    .with_file(config.source_locations)
                    .with_line_number(config.source_locations)
                    .with_ansi(config.ansi),
            )
            .init(),
        TracingFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_span_events(config.span_events())
                    .with_file(config.source_locations)
                    .with_line_number(config.source_locations)
                    .with_ansi(config.ansi),
            )
            .init(),
        TracingFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(config.span_events())
                    .with_file(config.source_locations)
                    .with_line_number(config.source_locations),
            )
            .init(),
    }

    tracing::debug!(filter = %config.filter, format = ?config.format, "Tracing initialized");
}
