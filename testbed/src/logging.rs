//! Diagnostic tracing for the harness itself.

use tracing_subscriber::{Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

/// Target used by the harness's own tracing events.
pub const TRACE_TARGET: &str = "testbed";

/// Installs a tracing subscriber writing to the real standard error.
///
/// Diagnostics never land in a test's captured output. Harness events are shown
/// at debug level when `debug` is set; everything else at info level.
///
/// Returns whether the subscriber was installed; a subscriber installed earlier by
/// the embedding program is left in place.
pub fn init(debug: bool) -> bool {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(crate::console::real_stderr)
        .without_time()
        .with_target(false)
        .with_filter(compose_filter(debug));

    if tracing_subscriber::registry().with(layer).try_init().is_ok() {
        true
    } else {
        // Something went wrong; proceed on anyway but complain audibly.
        eprintln!("warning: failed to initialize tracing.");
        false
    }
}

fn compose_filter(debug: bool) -> Targets {
    let filter =
        Targets::new().with_default(tracing_subscriber::filter::LevelFilter::INFO);

    if debug {
        filter.with_target(TRACE_TARGET, tracing::Level::DEBUG)
    } else {
        filter
    }
}
