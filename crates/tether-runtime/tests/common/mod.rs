//! Shared helpers for tether-runtime integration tests

#![allow(dead_code)]

use tether_runtime::{AllocatorStrategy, Interop, Settings};

// Re-export testing utilities
pub use pretty_assertions::{assert_eq, assert_ne};

/// An isolated interop instance with default settings
pub fn interop() -> Interop {
    Interop::new(Settings::default())
}

/// An isolated interop instance backed by `strategy`
pub fn interop_with(strategy: AllocatorStrategy) -> Interop {
    Interop::new(Settings {
        allocator: strategy,
        shards: 4,
        ..Settings::default()
    })
}

/// Assert that the instance holds no blocks, arrays or pins
pub fn assert_drained(interop: &Interop) {
    assert_eq!(interop.live_blocks(), 0, "blocks leaked");
    assert_eq!(interop.live_arrays(), 0, "array records leaked");
    assert_eq!(interop.live_pins(), 0, "pins leaked");
}
