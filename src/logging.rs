//! Tracing setup for the CLI.
//!
//! Logs go to stderr so answers printed on stdout stay clean. `RUST_LOG`
//! overrides the configured level.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

pub fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    // A second init (tests, embedding in another binary) is not fatal.
    let result = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
    };
    let _ = result;
}

fn default_directive(level: &str) -> String {
    format!("{level},casefile={level},casefile_core={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_covers_both_crates() {
        let d = default_directive("debug");
        assert!(d.contains("casefile=debug"));
        assert!(d.contains("casefile_core=debug"));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let cfg = LoggingConfig::default();
        init_logging(&cfg);
        init_logging(&cfg);
    }
}
