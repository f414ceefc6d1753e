/// Tracing setup shared by hosting apps and tests
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Safe to call more than once;
/// later calls are ignored.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
