//! Logging setup
//!
//! The runtime only emits `tracing` events. Hosts that have no subscriber of their own
//! can install a formatted one here.

use tracing_subscriber::EnvFilter;

use crate::interop::Settings;

/// Install a fmt subscriber filtered to `tether_runtime={level}`. `RUST_LOG` overrides
/// the level when set. Returns `false` if a global subscriber already exists.
pub fn init(level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .try_init()
        .is_ok()
}

/// [`init`] with the configured level
pub fn init_from(settings: &Settings) -> bool {
    init(&settings.log_level)
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tether_runtime={}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_filter_defaults_to_runtime_target() {
        env::remove_var("RUST_LOG");
        assert_eq!(filter("debug").to_string(), "tether_runtime=debug");

        let settings = Settings::default();
        assert_eq!(
            filter(&settings.log_level).to_string(),
            format!("tether_runtime={}", settings.log_level)
        );
    }

    #[test]
    #[serial]
    fn test_rust_log_overrides_level() {
        env::set_var("RUST_LOG", "warn");
        let directives = filter("trace").to_string();
        env::remove_var("RUST_LOG");
        assert_eq!(directives, "warn");
    }
}
