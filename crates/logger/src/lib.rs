use std::env::var;

use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable selecting the output format
pub const LOG_FORMAT_VAR: &str = "RUST_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Anything but `json` selects the compact format
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }

    fn from_env() -> Self {
        var(LOG_FORMAT_VAR).map(|value| Self::parse(&value)).unwrap_or_default()
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` directives take precedence over `level`.
pub fn init_tracing_with_level(level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();
    let format = LogFormat::from_env();

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(log_layer).init();
    debug!("Tracing initialized with {:?} output", format);
}
