//! File logging for the server binaries
//!
//! Logs go to a daily-rolling JSON file so the stdio transport keeps stdout
//! for protocol traffic only.

use anyhow::Result;
use std::path::Path;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter for `level`, which may be a bare level or a directive list
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    let filter = EnvFilter::try_new(level)?
        .add_directive("hyper=info".parse()?)
        .add_directive("h2=info".parse()?);
    Ok(filter)
}

/// Install the global subscriber writing to `<log_dir>/<file_name>.<date>`
pub fn init_logging(log_dir: &Path, file_name: &str, level: &str) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, file_name);

    tracing_subscriber::registry()
        .with(build_filter(level)?)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .json(),
        )
        .try_init()?;

    info!(
        log_dir = %log_dir.display(),
        file_name,
        level,
        "Logging initialized"
    );
    debug!("Debug logging is enabled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_levels_and_directives() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("debug,amadeus_flights_mcp=trace").is_ok());
        assert!(build_filter("amadeus_flights_mcp=notalevel").is_err());
    }
}
