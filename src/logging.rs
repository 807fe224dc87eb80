//! Logging and tracing setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the embedding program. These helpers do it with the usual defaults.

use std::sync::Once;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

/// Output encoding of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Install the global subscriber once. `RUST_LOG` selects the level and
/// defaults to `info`; later calls do nothing.
pub fn init_with(format: LogFormat) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        let installed = match format {
            LogFormat::Text => tracing_subscriber::registry().with(filter).with(layer).try_init(),
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(layer.json().with_current_span(true))
                .try_init(),
        };
        if installed.is_ok() {
            info!(?format, "tracing ready");
        }
    });
}

pub fn init_tracing() {
    init_with(LogFormat::Text);
}

/// Structured output, one JSON object per event.
pub fn init_tracing_json() {
    init_with(LogFormat::Json);
}

/// Open an `info`-level span named after a pipeline phase.
#[macro_export]
macro_rules! span_trace {
    ($name:expr) => {
        tracing::info_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}

/// Log an error at `error` level and hand it back, for use in `map_err`.
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let e = $err;
        tracing::error!(error = %e, "Operation failed");
        e
    }};
    ($err:expr, $msg:expr) => {{
        let e = $err;
        tracing::error!(error = %e, message = $msg, "Operation failed");
        e
    }};
}
