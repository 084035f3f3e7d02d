//! Tracing subscriber installation

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingMode;
use crate::error::{AccessError, Result};

/// Install the global subscriber for `mode`, writing to stdout
///
/// `RUST_LOG` takes precedence over `default_filter`. Nothing is installed
/// for [`LoggingMode::Disabled`].
pub fn init_logging(mode: LoggingMode, default_filter: &str) -> Result<()> {
    init_logging_to(mode, default_filter, std::io::stdout)
}

/// Same as [`init_logging`] with an explicit writer, e.g. `std::io::stderr`
pub fn init_logging_to<W>(mode: LoggingMode, default_filter: &str, writer: W) -> Result<()>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let installed = match mode {
        LoggingMode::Disabled => return Ok(()),
        LoggingMode::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init(),
        LoggingMode::Console => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
    };

    installed.map_err(|e| AccessError::Config(format!("Failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_installs_nothing() {
        init_logging_to(LoggingMode::Disabled, "info", std::io::sink).unwrap();
    }

    #[test]
    fn test_second_install_is_a_config_error() {
        let _ = init_logging_to(LoggingMode::Console, "warn", std::io::sink);
        let err = init_logging_to(LoggingMode::Json, "warn", std::io::sink).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
