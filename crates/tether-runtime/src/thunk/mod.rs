//! Callback thunk manager
//!
//! Turns a [`Callback`] into a function pointer native code can call. Stubs may be
//! pinned: the stub then lives in the interop's pin registry, keyed by its address,
//! until `free` is called with that address.

mod stub;
pub mod types;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

pub(crate) use stub::NativeStub;
pub use types::{CallingConvention, NativeType, NativeValue, Signature, ThunkKind};

use crate::error::{InteropError, Result};
use crate::handle::Handle;
use crate::interop::Interop;

/// Host-side body of a closure callback
pub type ClosureFn = Arc<dyn Fn(&[NativeValue]) -> NativeValue + Send + Sync>;

/// What a callback runs when native code calls it
#[derive(Clone)]
pub enum CallbackBody {
    /// A context-free `extern "C"` function
    Static(Handle),
    /// A closure, possibly capturing state
    Closure(ClosureFn),
}

impl fmt::Debug for CallbackBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackBody::Static(address) => write!(f, "Static({})", address),
            CallbackBody::Closure(_) => f.write_str("Closure(..)"),
        }
    }
}

/// A callable to export to native code
#[derive(Debug, Clone)]
pub struct Callback {
    signature: Signature,
    declared: Option<CallingConvention>,
    body: CallbackBody,
}

impl Callback {
    /// Wrap a closure
    pub fn closure<F>(signature: Signature, f: F) -> Self
    where
        F: Fn(&[NativeValue]) -> NativeValue + Send + Sync + 'static,
    {
        Self {
            signature,
            declared: None,
            body: CallbackBody::Closure(Arc::new(f)),
        }
    }

    /// Wrap a context-free function by address.
    ///
    /// # Safety
    ///
    /// `address` must be an `extern "C"` function with exactly `signature`.
    pub unsafe fn from_static(signature: Signature, address: Handle) -> Self {
        Self {
            signature,
            declared: Some(CallingConvention::Cdecl),
            body: CallbackBody::Static(address),
        }
    }

    /// Declare the convention this callback was written for
    pub fn declare(mut self, convention: CallingConvention) -> Self {
        self.declared = Some(convention);
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn declared(&self) -> Option<CallingConvention> {
        self.declared
    }

    pub fn body(&self) -> &CallbackBody {
        &self.body
    }
}

/// A native function pointer produced by [`Interop::thunk`].
///
/// An unpinned stub thunk owns its trampoline; dropping the thunk invalidates the
/// address. Pinned and passthrough thunks only carry the address.
pub struct Thunk {
    address: Handle,
    kind: ThunkKind,
    pinned: bool,
    stub: Option<Box<NativeStub>>,
}

impl Thunk {
    /// Address native code should call
    pub fn address(&self) -> Handle {
        self.address
    }

    pub fn kind(&self) -> ThunkKind {
        self.kind
    }

    /// Whether the stub lives in the pin registry until freed
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Whether this thunk keeps the trampoline alive itself
    pub fn owns_stub(&self) -> bool {
        self.stub.is_some()
    }

    /// Reinterpret the address as a typed function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type matching the callback's signature and the
    /// thunk's convention, and the thunk (or its pin) must outlive every call.
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<usize>(),
            "as_fn target must be a function pointer"
        );
        std::mem::transmute_copy::<usize, F>(&self.address.addr())
    }
}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thunk")
            .field("address", &format_args!("{}", self.address))
            .field("kind", &self.kind)
            .field("pinned", &self.pinned)
            .finish()
    }
}

impl Interop {
    /// Export `callback` as a native function pointer, enforcing declared conventions
    /// unless disabled in configuration.
    pub fn thunk(&self, callback: &Callback, kind: ThunkKind, pinned: bool) -> Result<Thunk> {
        self.thunk_with(callback, kind, pinned, false)
    }

    /// Like [`thunk`](Self::thunk), optionally bypassing the convention check.
    pub fn thunk_with(
        &self,
        callback: &Callback,
        kind: ThunkKind,
        pinned: bool,
        bypass_convention_check: bool,
    ) -> Result<Thunk> {
        match kind {
            ThunkKind::Passthrough => {
                let CallbackBody::Static(address) = callback.body else {
                    return Err(InteropError::invalid_operation(
                        "passthrough thunks require a static, context-free function",
                    ));
                };
                if address.is_null() {
                    return Err(InteropError::invalid_operation(
                        "passthrough thunk for a null function",
                    ));
                }
                debug!(%address, "passthrough thunk");
                Ok(Thunk {
                    address,
                    kind,
                    pinned: false,
                    stub: None,
                })
            }
            ThunkKind::Stub(requested) => {
                let enforce = self.settings().enforce_conventions && !bypass_convention_check;
                if let Some(declared) = callback.declared {
                    if enforce && !declared.accepts(requested) {
                        return Err(InteropError::CallingConventionMismatch {
                            declared,
                            requested,
                        });
                    }
                }
                if let CallbackBody::Static(address) = callback.body {
                    if address.is_null() {
                        return Err(InteropError::invalid_operation(
                            "stub thunk for a null function",
                        ));
                    }
                }

                let stub = Box::new(NativeStub::build(
                    &callback.signature,
                    &callback.body,
                    requested,
                ));
                let address = stub.address();
                debug!(
                    %address,
                    convention = %requested,
                    signature = %stub.signature(),
                    pinned,
                    "created stub thunk"
                );

                if pinned {
                    self.pins.insert(address.addr(), stub);
                    Ok(Thunk {
                        address,
                        kind,
                        pinned: true,
                        stub: None,
                    })
                } else {
                    Ok(Thunk {
                        address,
                        kind,
                        pinned: false,
                        stub: Some(stub),
                    })
                }
            }
        }
    }

    /// Whether `address` is a pinned stub
    pub fn is_pinned(&self, address: Handle) -> bool {
        self.pins.contains(address.addr())
    }

    /// Number of pinned stubs
    pub fn live_pins(&self) -> usize {
        self.pins.len()
    }

    pub(crate) fn release_pin(&self, address: Handle) -> bool {
        match self.pins.remove(address.addr()) {
            Some(stub) => {
                debug!(%address, "released pinned stub");
                drop(stub);
                true
            }
            None => false,
        }
    }
}
