//! Optional subscriber bootstrap for applications embedding the router.
//!
//! The router itself only emits `tracing` events: route registration and group
//! nesting at `debug`, matching at `trace`, and uncacheable handlers or skipped
//! middleware at `warn`. This module installs a formatted subscriber for them.

use parking_lot::RwLock;
use tracing_subscriber::{
    Layer, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
};

pub use tracing::level_filters::LevelFilter;

static TRACING_LEVEL: RwLock<LevelFilter> = RwLock::new(LevelFilter::DEBUG);

/// Level used by the next [`init_tracing`] call.
pub fn set_tracing_level(level_filter: LevelFilter) {
    *TRACING_LEVEL.write() = level_filter;
}

/// Initializes the global tracing subscriber with formatted output.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .with_filter(*TRACING_LEVEL.read()),
        )
        .init();
}
