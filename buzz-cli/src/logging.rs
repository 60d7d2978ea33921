use shared::config::{ClientConfig, LogFormat};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt};

/// Installs the global subscriber, writing to stderr so chat output on
/// stdout stays clean. Returns the configured level.
pub fn initialize_tracing(config: &ClientConfig) -> String {
    let builder = fmt::fmt()
        .with_env_filter(build_env_filter(config))
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr);

    let installed = if matches!(config.log_format, LogFormat::Json) {
        builder.json().with_ansi(false).try_init()
    } else {
        builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    config.log_level.clone()
}

fn build_env_filter(config: &ClientConfig) -> EnvFilter {
    let default_level = config
        .log_level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::WARN);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}
