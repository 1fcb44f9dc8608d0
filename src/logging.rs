//! Tracing setup and logging helpers for binir.
//!
//! The library only emits events; installing a subscriber is up to the
//! embedding tool, which can use [`init_tracing`] for a ready-made one.
//! Serialization events carry `node` and `kind` for the IR node they concern
//! and run inside a `phase` span naming the step of the save or load.

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Environment variable holding the filter, consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "BINIR_LOG";

const DEFAULT_FILTER: &str = "binir=info";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Could not install the tracing subscriber: {0}")]
    Install(String),
}

static INIT: OnceCell<Result<LogFormat, LoggingError>> = OnceCell::new();

/// Install a global subscriber writing `format`.
///
/// The first call decides the outcome and later calls return it, whatever
/// format they ask for. Fails when the filter from `BINIR_LOG` or `RUST_LOG`
/// does not parse, or when another global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> Result<(), LoggingError> {
    INIT.get_or_init(|| install(format)).clone().map(|_| ())
}

/// [`init_tracing`] with JSON output.
pub fn init_tracing_json() -> Result<(), LoggingError> {
    init_tracing(LogFormat::Json)
}

fn parse_filter(directives: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directives).map_err(|e| LoggingError::InvalidFilter {
        filter: directives.to_string(),
        reason: e.to_string(),
    })
}

fn install(format: LogFormat) -> Result<LogFormat, LoggingError> {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let env_filter = parse_filter(&directives)?;

    let installed = match format {
        LogFormat::Text => {
            let fmt_layer = fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
        }
    };
    installed.map_err(|e| LoggingError::Install(e.to_string()))?;

    info!(?format, filter = %directives, "binir tracing initialized");
    Ok(format)
}

/// Span around one phase of a save or load, such as `"decode-body"`.
#[macro_export]
macro_rules! phase_span {
    ($phase:expr) => {
        tracing::debug_span!("phase", phase = $phase)
    };
    ($phase:expr, $($field:tt)*) => {
        tracing::debug_span!("phase", phase = $phase, $($field)*)
    };
}

/// Trace event about one IR node, tagged with its `kind` and `node` id.
#[macro_export]
macro_rules! trace_node {
    ($kind:expr, $id:expr, $($rest:tt)+) => {
        tracing::trace!(kind = %$kind, node = %$id, $($rest)+)
    };
}

/// Log an error at `error` level and hand it back.
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let e = $err;
        tracing::error!(error = %e, "operation failed");
        e
    }};
    ($err:expr, $msg:expr) => {{
        let e = $err;
        tracing::error!(error = %e, $msg);
        e
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::NodeKind;

    #[test]
    fn test_first_init_decides() {
        let first = init_tracing(LogFormat::Text);
        assert_eq!(init_tracing_json(), first);
        assert_eq!(init_tracing(LogFormat::Text), first);
    }

    #[test]
    fn test_bad_filter_is_reported() {
        assert!(parse_filter("binir=debug,warn").is_ok());
        match parse_filter("binir=chatty") {
            Err(LoggingError::InvalidFilter { filter, .. }) => assert_eq!(filter, "binir=chatty"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_phase_span_and_node_events() {
        let _ = init_tracing(LogFormat::Text);
        let span = phase_span!("resolve-links", pending = 3);
        let _guard = span.enter();
        let id = uuid::Uuid::nil();
        trace_node!(NodeKind::Symbol, id, name = "main", "resolved referent");
    }

    #[test]
    fn test_log_error_passthrough() {
        let err = log_error!(crate::error::IrError::UnknownNode(uuid::Uuid::nil()));
        assert!(matches!(err, crate::error::IrError::UnknownNode(_)));
        let err = log_error!(crate::error::IrError::UnknownNode(uuid::Uuid::nil()), "lookup failed");
        assert!(matches!(err, crate::error::IrError::UnknownNode(_)));
    }
}
