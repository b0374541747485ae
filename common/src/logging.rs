use std::sync::Once;

static INIT: Once = Once::new();

/// Install the process-wide fmt subscriber.
///
/// `RUST_LOG` wins over `level`. Safe to call any number of times from any
/// thread; only the first call has an effect, and an already-installed
/// global subscriber is left in place.
pub fn init(level: &str) {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| level.parse().unwrap_or_default());
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}
