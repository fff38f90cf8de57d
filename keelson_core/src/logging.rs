use tracing::{debug, Level};
use tracing_subscriber::{fmt::format::FmtSpan, FmtSubscriber};

/// Set up the tracing module.  This dumps out detailed traces of every probe
/// attempt and classification to stdout.  Installing a subscriber twice is
/// harmless, the first one wins.
pub(crate) fn setup_tracing(level: Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_span_events(FmtSpan::FULL)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("A global tracing subscriber was already installed");
    }
}
