use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "mylobster_memory=info";

/// Install the global subscriber with the default filter.
pub fn init() {
    init_with(&LoggingConfig::default());
}

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level; a second call is a no-op.
pub fn init_with(config: &LoggingConfig) {
    let filter = build_filter(config);

    let result = if config.json.unwrap_or(false) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let directive = config
        .level
        .as_deref()
        .map(|level| format!("mylobster_memory={level}"))
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string());

    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}
