//! Callback thunks invoked as native function pointers

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use std::os::raw::{c_int, c_long};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tether_runtime::{
    Callback, CallingConvention, Handle, Interop, InteropError, NativeType, NativeValue,
    Settings, Signature, ThunkKind,
};

extern "C" fn add(a: c_int, b: c_int) -> c_int {
    a + b
}

fn add_callback() -> Callback {
    let sig = Signature::new([NativeType::Int, NativeType::Int], NativeType::Int).unwrap();
    unsafe { Callback::from_static(sig, Handle::from_addr(add as usize)) }
}

fn scale_callback(factor: f64) -> Callback {
    let sig = Signature::new([NativeType::Double], NativeType::Double).unwrap();
    Callback::closure(sig, move |args| match args {
        [NativeValue::Double(x)] => NativeValue::Double(x * factor),
        _ => NativeValue::Double(f64::NAN),
    })
}

// ===== Passthrough =====

#[test]
fn test_passthrough_returns_function_address() {
    let interop = interop();
    let thunk = interop.thunk(&add_callback(), ThunkKind::Passthrough, true).unwrap();

    assert_eq!(thunk.address(), Handle::from_addr(add as usize));
    assert!(!thunk.is_pinned());
    assert_eq!(interop.live_pins(), 0);

    let f: extern "C" fn(c_int, c_int) -> c_int = unsafe { thunk.as_fn() };
    assert_eq!(f(2, 40), 42);
}

#[test]
fn test_passthrough_rejects_closures() {
    let interop = interop();
    let err = interop
        .thunk(&scale_callback(2.0), ThunkKind::Passthrough, false)
        .unwrap_err();
    assert!(matches!(err, InteropError::InvalidOperation(_)));
}

// ===== Stubs =====

#[test]
fn test_closure_stub_captures_state() {
    let interop = interop();
    let thunk = interop
        .thunk(&scale_callback(2.5), ThunkKind::Stub(CallingConvention::Platform), false)
        .unwrap();
    assert!(thunk.owns_stub());

    let f: extern "C" fn(f64) -> f64 = unsafe { thunk.as_fn() };
    assert_eq!(f(4.0), 10.0);
    assert_eq!(f(-1.0), -2.5);
}

#[test]
fn test_static_stub_forwards_call() {
    let interop = interop();
    let thunk = interop
        .thunk(&add_callback(), ThunkKind::Stub(CallingConvention::Cdecl), false)
        .unwrap();
    assert_ne!(thunk.address(), Handle::from_addr(add as usize));

    let f: extern "C" fn(c_int, c_int) -> c_int = unsafe { thunk.as_fn() };
    assert_eq!(f(-7, 3), -4);
}

#[test]
fn test_stub_marshals_every_scalar() {
    let interop = interop();
    let sig = Signature::new(
        [
            NativeType::Int,
            NativeType::Long,
            NativeType::Float,
            NativeType::Pointer,
            NativeType::Bool,
        ],
        NativeType::Long,
    )
    .unwrap();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let cb = Callback::closure(sig, move |args| {
        sink.lock().extend_from_slice(args);
        NativeValue::Int(-1)
    });

    let thunk = interop.thunk(&cb, ThunkKind::Stub(CallingConvention::Platform), false).unwrap();
    let f: extern "C" fn(c_int, c_long, f32, *const u8, bool) -> c_long = unsafe { thunk.as_fn() };

    // Int is widened to the declared Long return.
    assert_eq!(f(1, 2, 0.5, 0x40 as *const u8, true), -1);
    assert_eq!(
        *seen.lock(),
        vec![
            NativeValue::Int(1),
            NativeValue::Long(2),
            NativeValue::Float(0.5),
            NativeValue::Pointer(0x40),
            NativeValue::Bool(true),
        ]
    );
}

#[test]
fn test_panicking_closure_returns_zero() {
    let interop = interop();
    let sig = Signature::new([NativeType::Int], NativeType::Int).unwrap();
    let cb = Callback::closure(sig, |_| panic!("callback failure"));

    let thunk = interop.thunk(&cb, ThunkKind::Stub(CallingConvention::Platform), false).unwrap();
    let f: extern "C" fn(c_int) -> c_int = unsafe { thunk.as_fn() };
    assert_eq!(f(9), 0);
}

#[test]
fn test_void_callback_counts_invocations() {
    let interop = interop();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let signature = Signature::new(Vec::<NativeType>::new(), NativeType::Void).unwrap();
    let cb = Callback::closure(signature, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        NativeValue::Void
    });

    let thunk = interop.thunk(&cb, ThunkKind::Stub(CallingConvention::Platform), false).unwrap();
    let f: extern "C" fn() = unsafe { thunk.as_fn() };
    for _ in 0..5 {
        f();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

// ===== Pinning =====

#[test]
fn test_pinned_stub_lives_until_freed() {
    let interop = interop();
    let address = {
        let thunk = interop
            .thunk(&scale_callback(3.0), ThunkKind::Stub(CallingConvention::Platform), true)
            .unwrap();
        assert!(thunk.is_pinned());
        assert!(!thunk.owns_stub());
        thunk.address()
    };

    assert!(interop.is_pinned(address));
    assert_eq!(interop.live_pins(), 1);

    let f: extern "C" fn(f64) -> f64 = unsafe { std::mem::transmute(address.addr()) };
    assert_eq!(f(2.0), 6.0);

    assert!(interop.free(address));
    assert!(!interop.free(address));
    assert_drained(&interop);
}

#[test]
fn test_free_resolves_pin_independent_of_blocks() {
    let interop = interop();
    let block = interop.allocate(8).unwrap();
    let thunk = interop
        .thunk(&add_callback(), ThunkKind::Stub(CallingConvention::Cdecl), true)
        .unwrap();

    assert!(interop.free(thunk.address()));
    assert!(interop.is_allocated(block));
    assert!(interop.free(block));
    assert_drained(&interop);
}

// ===== Calling conventions =====

#[test]
fn test_convention_mismatch_is_rejected() {
    let interop = interop();
    let err = interop
        .thunk(&add_callback(), ThunkKind::Stub(CallingConvention::Stdcall), false)
        .unwrap_err();
    match err {
        InteropError::CallingConventionMismatch { declared, requested } => {
            assert_eq!(declared, CallingConvention::Cdecl);
            assert_eq!(requested, CallingConvention::Stdcall);
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
    assert_eq!(interop.live_pins(), 0);
}

#[test]
fn test_convention_mismatch_can_be_bypassed() {
    let interop = interop();
    let thunk = interop
        .thunk_with(&add_callback(), ThunkKind::Stub(CallingConvention::Stdcall), false, true)
        .unwrap();
    assert!(!thunk.address().is_null());

    #[cfg(not(target_arch = "x86"))]
    {
        let f: extern "C" fn(c_int, c_int) -> c_int = unsafe { thunk.as_fn() };
        assert_eq!(f(20, 22), 42);
    }
}

#[test]
fn test_enforcement_disabled_by_settings() {
    let interop = Interop::new(Settings {
        enforce_conventions: false,
        ..Settings::default()
    });
    assert!(interop
        .thunk(&add_callback(), ThunkKind::Stub(CallingConvention::Fastcall), false)
        .is_ok());
}

#[test]
fn test_declared_closure_convention() {
    let interop = interop();
    let cb = scale_callback(1.0).declare(CallingConvention::Stdcall);
    assert!(interop
        .thunk(&cb, ThunkKind::Stub(CallingConvention::Stdcall), false)
        .is_ok());
    assert!(interop
        .thunk(&cb, ThunkKind::Stub(CallingConvention::Cdecl), false)
        .is_err());
}
