//! Installing the process-wide subscriber

use serial_test::serial;
use tether_runtime::{logging, Settings};

#[test]
#[serial]
fn test_init_installs_subscriber_once() {
    assert!(logging::init_from(&Settings::default()));
    assert!(!logging::init("debug"));
    assert!(!logging::init_from(&Settings::default()));

    // Events go through the installed subscriber without panicking.
    let interop = tether_runtime::Interop::default();
    let h = interop.allocate(8).unwrap();
    assert!(interop.free(h));
}
