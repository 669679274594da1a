//! Structured logging setup
//!
//! - `LOG_FORMAT=json` selects JSON lines for log aggregation, anything else
//!   selects human-readable text.
//! - `RUST_LOG` controls filtering (default: `info`), for example
//!   `RUST_LOG=hp_pool=debug,hp_queue=info`.
//!
//! Reconfiguration logs carry `pool_id` as a structured field, so a single
//! pool's history can be filtered out of the stream:
//!
//! ```rust,ignore
//! hp_common::logging::init_logging("orders-service");
//! let span = tracing::info_span!("refresh", pool_id = %candidate.pool_id);
//! let _entered = span.enter();
//! engine.refresh(&candidate)?;
//! ```

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log output format, selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn from_env() -> Self {
        let value = std::env::var("LOG_FORMAT").unwrap_or_default();
        Self::parse(&value)
    }

    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Install the global subscriber.
///
/// Calling this twice (or after another crate installed a subscriber) is not
/// an error: the second call is ignored and reported on stderr.
pub fn init_logging(service_name: &str) {
    let env_filter = default_filter();

    let result = match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_thread_names(true)
                    .with_target(true)
                    .flatten_event(true)
                    .with_span_events(FmtSpan::NONE),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_ansi(true),
            )
            .try_init(),
    };

    match result {
        Ok(()) => tracing::info!(service = %service_name, "Logging initialized"),
        Err(e) => eprintln!("[{service_name}] logging already initialized: {e}"),
    }
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
