use anyhow::{anyhow, Result};
use env_filter::Builder as EnvFilterBuilder;
use log::LevelFilter;

use crate::settings::LogLevel;

/// `RUST_LOG` when set and valid, otherwise the configured level.
fn build_logger(level: LogLevel) -> env_logger::Builder {
    let fallback = LevelFilter::from(level);
    let mut builder = env_logger::Builder::new();

    match std::env::var("RUST_LOG") {
        Ok(spec) if !spec.trim().is_empty() => {
            if let Err(err) = EnvFilterBuilder::new().try_parse(&spec) {
                eprintln!(
                    "Ignoring invalid RUST_LOG value '{}': {}. Falling back to {} logging",
                    spec, err, fallback
                );
                builder.filter_level(fallback);
            } else {
                builder.parse_filters(&spec);
            }
        }
        _ => {
            builder.filter_level(fallback);
        }
    }

    builder
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis();
    builder
}

/// Install the process-wide logger. Fails if a logger is already installed.
pub fn init_logging(level: LogLevel) -> Result<()> {
    build_logger(level)
        .try_init()
        .map_err(|e| anyhow!("logger already initialized: {}", e))
}
