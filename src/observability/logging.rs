//! Tracing subscriber with a live-reloadable level and format.
//!
//! Records go to stderr; stdout belongs to the stdio transport.

use tracing_subscriber::{
    fmt, layer::Layered, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter,
    Layer, Registry,
};

use crate::config::LogFormat;

type FormatLayer = Box<dyn Layer<Registry> + Send + Sync>;
type Formatted = Layered<reload::Layer<FormatLayer, Registry>, Registry>;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("invalid log level '{level}': {message}")]
    InvalidLevel { level: String, message: String },

    #[error("failed to update logger: {0}")]
    Reload(#[from] reload::Error),

    #[error("failed to install logger: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Handle for changing the installed subscriber's level and format.
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Formatted>,
    format: reload::Handle<FormatLayer, Registry>,
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle").finish_non_exhaustive()
    }
}

fn format_layer(format: LogFormat) -> FormatLayer {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Console => fmt::layer().with_writer(std::io::stderr).boxed(),
    }
}

fn parse_filter(level: &str) -> Result<EnvFilter, LogError> {
    EnvFilter::try_new(level).map_err(|e| LogError::InvalidLevel {
        level: level.to_string(),
        message: e.to_string(),
    })
}

/// Build the subscriber without installing it. `RUST_LOG`, when set, wins over `level`.
pub fn build(
    level: &str,
    format: LogFormat,
) -> Result<(impl tracing::Subscriber + Send + Sync + 'static, LogHandle), LogError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(level)?,
    };
    let (format_layer, format_handle) = reload::Layer::new(format_layer(format));
    let (filter_layer, filter_handle) = reload::Layer::new(filter);

    let subscriber = tracing_subscriber::registry()
        .with(format_layer)
        .with(filter_layer);

    Ok((
        subscriber,
        LogHandle {
            filter: filter_handle,
            format: format_handle,
        },
    ))
}

/// Install the global subscriber.
pub fn init(level: &str, format: LogFormat) -> Result<LogHandle, LogError> {
    let (subscriber, handle) = build(level, format)?;
    subscriber.try_init()?;
    Ok(handle)
}

impl LogHandle {
    pub fn set_level(&self, level: &str) -> Result<(), LogError> {
        let filter = parse_filter(level)?;
        self.filter.reload(filter)?;
        Ok(())
    }

    pub fn set_format(&self, format: LogFormat) -> Result<(), LogError> {
        self.format.reload(format_layer(format))?;
        Ok(())
    }

    /// Current filter directives, for diagnostics.
    pub fn level(&self) -> Option<String> {
        self.filter.with_current(|filter| filter.to_string()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_changes_apply_to_the_live_subscriber() {
        let (subscriber, handle) = build("info", LogFormat::Console).unwrap();
        let _guard = tracing::subscriber::set_default(subscriber);

        handle.set_level("warn").unwrap();
        assert!(!tracing::enabled!(tracing::Level::INFO));
        handle.set_level("debug").unwrap();
        assert!(tracing::enabled!(tracing::Level::DEBUG));
        assert_eq!(handle.level().as_deref(), Some("debug"));
    }

    #[test]
    fn invalid_levels_are_rejected() {
        let (_subscriber, handle) = build("info", LogFormat::Json).unwrap();
        assert!(matches!(
            handle.set_level("loud=[["),
            Err(LogError::InvalidLevel { .. })
        ));
    }

    #[test]
    fn format_can_be_swapped() {
        let (subscriber, handle) = build("info", LogFormat::Console).unwrap();
        let _guard = tracing::subscriber::set_default(subscriber);
        handle.set_format(LogFormat::Json).unwrap();
    }
}
