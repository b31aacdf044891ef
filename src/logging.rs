//! `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber filtered by `filter` (an `EnvFilter`
/// directive such as `info` or `dart_mc_bridge=debug`).
///
/// Does nothing if the host process already installed a global subscriber.
/// Returns whether this call installed one.
pub fn init(filter: &str) -> bool {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|err| {
        eprintln!("dart_mc_bridge: invalid log filter `{filter}` ({err}); using `info`");
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        init("not==a filter");
        assert!(!init("debug"));
    }
}
