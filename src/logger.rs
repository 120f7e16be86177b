use tracing_subscriber::prelude::*;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
};

/// Logging setup handed to [`init`] by the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub level: String,
    /// Log span close events with their durations.
    pub span_events: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            span_events: false,
        }
    }
}

impl LogConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init(config: &LogConfig) {
    let env_filter = config.filter();

    let is_debug = config.span_events
        || env_filter.to_string().contains("debug")
        || env_filter.to_string().contains("trace");

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::uptime())
        .with_span_events(if is_debug {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
