//! libffi closure trampolines
//!
//! A [`NativeStub`] is an executable entry point that native code can call with the
//! stub's signature and convention. Closure bodies receive marshalled
//! [`NativeValue`]s; static bodies are forwarded to with `ffi_call`, which lets a
//! cdecl function be exported under another convention.

use libffi::low::ffi_cif;
use libffi::middle::{Cif, Closure, CodePtr};
use libffi::raw;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use super::types::{CallingConvention, NativeValue, Signature};
use super::{CallbackBody, ClosureFn};
use crate::handle::Handle;

enum StubTarget {
    Closure(ClosureFn),
    Forward { cif: Cif, code: CodePtr },
}

struct StubState {
    signature: Signature,
    target: StubTarget,
}

/// An allocated trampoline. Dropping it frees the executable memory, after which its
/// address must not be called.
pub(crate) struct NativeStub {
    // Declared before `state`: the closure borrows it and must drop first.
    closure: Closure<'static>,
    state: Box<StubState>,
}

// The state is immutable after construction and the body is `Send + Sync`.
unsafe impl Send for NativeStub {}
unsafe impl Sync for NativeStub {}

impl NativeStub {
    pub(crate) fn build(
        signature: &Signature,
        body: &CallbackBody,
        convention: CallingConvention,
    ) -> Self {
        let target = match body {
            CallbackBody::Closure(f) => StubTarget::Closure(f.clone()),
            CallbackBody::Static(address) => StubTarget::Forward {
                cif: signature.cif(CallingConvention::Cdecl),
                code: CodePtr(address.as_ptr::<c_void>()),
            },
        };
        let state = Box::new(StubState {
            signature: signature.clone(),
            target,
        });

        // The box never moves and outlives the closure (field order above).
        let userdata: &'static StubState = unsafe { &*(state.as_ref() as *const StubState) };
        let closure = Closure::new(signature.cif(convention), trampoline, userdata);

        Self { closure, state }
    }

    pub(crate) fn address(&self) -> Handle {
        Handle::from_addr(*self.closure.code_ptr() as usize)
    }

    pub(crate) fn signature(&self) -> &Signature {
        &self.state.signature
    }
}

unsafe extern "C" fn trampoline(
    _cif: &ffi_cif,
    result: &mut c_void,
    args: *const *const c_void,
    state: &StubState,
) {
    let result = result as *mut c_void;
    match &state.target {
        StubTarget::Forward { cif, code } => {
            raw::ffi_call(
                cif.as_raw_ptr(),
                Some(*code.as_fun()),
                result,
                args as *mut *mut c_void,
            );
        }
        StubTarget::Closure(body) => {
            let signature = &state.signature;
            let values: Vec<NativeValue> = signature
                .params()
                .iter()
                .enumerate()
                .map(|(i, ty)| ty.read(*args.add(i)))
                .collect();

            let value = match panic::catch_unwind(AssertUnwindSafe(|| body(&values))) {
                Ok(value) => value.coerce(signature.ret()),
                Err(_) => {
                    warn!(
                        signature = %signature,
                        "callback panicked; returning zero to native caller"
                    );
                    NativeValue::zero(signature.ret())
                }
            };
            value.write_result(result);
        }
    }
}
