//! Install a global `tracing` subscriber.

use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer,
    Registry,
};

/// Log events at `level` and above to stdout, as JSON if `json` is set.
///
/// Fails if a global subscriber was already installed.
pub fn init(level: Level, json: bool) -> Result<(), TryInitError> {
    let filter = EnvFilter::new(level.to_string());
    let layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer()
            .json()
            .with_line_number(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_span_list(false)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };
    Registry::default().with(layer).with(filter).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_once() {
        init(Level::DEBUG, true).unwrap();
        assert!(init(Level::INFO, false).is_err());
    }
}
