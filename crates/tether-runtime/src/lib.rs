//! Tether Runtime - native interop memory and marshaling core
//!
//! Generated bindings call into this crate to:
//! - allocate, adopt and free native memory blocks
//! - encode and decode strings and string arrays in native encodings
//! - export callbacks as native function pointers
//! - look up stable per-type interface identifiers
//! - create and wait on events
//!
//! All state hangs off an [`Interop`] instance; [`global`] provides a process-wide one.

/// Tether runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod array;
pub mod codec;
pub mod error;
pub mod handle;
pub mod interop;
pub mod logging;
pub mod memory;
pub mod scope;
pub mod thunk;
pub mod typeid;
pub mod wait;

// Re-export commonly used types
pub use codec::Encoding;
pub use error::{InteropError, PlatformError, Result};
pub use handle::Handle;
pub use interop::{global, init_global, Interop, Settings};
pub use memory::{AllocatorStrategy, ReleaseFn};
pub use scope::MarshalScope;
pub use thunk::{
    Callback, CallbackBody, CallingConvention, NativeType, NativeValue, Signature, Thunk,
    ThunkKind,
};
pub use typeid::{identifier_of, iid_of, Guid, Interface, TypeIdCache};
pub use wait::{EventBridge, Timeout, WaitStatus, INFINITE};
