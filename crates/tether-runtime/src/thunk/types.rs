//! Native signatures for callback thunks
//!
//! Only the C scalar types that cross a callback boundary by value are supported.
//! Aggregates go through pointers.

use libffi::middle::{Cif, Type};
use libffi::raw;
use std::ffi::c_void;
use std::fmt;
use std::os::raw::{c_int, c_long};
use std::ptr;

use tracing::warn;

use crate::error::{InteropError, Result};

/// C scalar types a callback may take or return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    /// C `int`
    Int,
    /// C `long`
    Long,
    /// C `float`
    Float,
    /// C `double`
    Double,
    /// Any pointer (`void*`, `char*`, handles)
    Pointer,
    /// C `_Bool`
    Bool,
    /// C `void` (return only)
    Void,
}

impl NativeType {
    fn ffi_type(self) -> Type {
        match self {
            NativeType::Int => Type::c_int(),
            NativeType::Long => Type::c_long(),
            NativeType::Float => Type::f32(),
            NativeType::Double => Type::f64(),
            NativeType::Pointer => Type::pointer(),
            NativeType::Bool => Type::u8(),
            NativeType::Void => Type::void(),
        }
    }

    /// Read one argument of this type from libffi's argument slot.
    ///
    /// # Safety
    ///
    /// `slot` must point to a value of this type.
    pub(crate) unsafe fn read(self, slot: *const c_void) -> NativeValue {
        match self {
            NativeType::Int => NativeValue::Int(ptr::read_unaligned(slot.cast::<c_int>())),
            NativeType::Long => {
                NativeValue::Long(ptr::read_unaligned(slot.cast::<c_long>()) as i64)
            }
            NativeType::Float => NativeValue::Float(ptr::read_unaligned(slot.cast::<f32>())),
            NativeType::Double => NativeValue::Double(ptr::read_unaligned(slot.cast::<f64>())),
            NativeType::Pointer => {
                NativeValue::Pointer(ptr::read_unaligned(slot.cast::<usize>()))
            }
            NativeType::Bool => NativeValue::Bool(ptr::read_unaligned(slot.cast::<u8>()) != 0),
            NativeType::Void => NativeValue::Void,
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NativeType::Int => "int",
            NativeType::Long => "long",
            NativeType::Float => "float",
            NativeType::Double => "double",
            NativeType::Pointer => "void*",
            NativeType::Bool => "bool",
            NativeType::Void => "void",
        };
        f.write_str(name)
    }
}

/// A value crossing a callback boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Pointer(usize),
    Bool(bool),
    Void,
}

impl NativeValue {
    /// The type this value carries
    pub fn native_type(&self) -> NativeType {
        match self {
            NativeValue::Int(_) => NativeType::Int,
            NativeValue::Long(_) => NativeType::Long,
            NativeValue::Float(_) => NativeType::Float,
            NativeValue::Double(_) => NativeType::Double,
            NativeValue::Pointer(_) => NativeType::Pointer,
            NativeValue::Bool(_) => NativeType::Bool,
            NativeValue::Void => NativeType::Void,
        }
    }

    /// The zero value of `ty`
    pub fn zero(ty: NativeType) -> Self {
        match ty {
            NativeType::Int => NativeValue::Int(0),
            NativeType::Long => NativeValue::Long(0),
            NativeType::Float => NativeValue::Float(0.0),
            NativeType::Double => NativeValue::Double(0.0),
            NativeType::Pointer => NativeValue::Pointer(0),
            NativeType::Bool => NativeValue::Bool(false),
            NativeType::Void => NativeValue::Void,
        }
    }

    fn as_i64(&self) -> i64 {
        match *self {
            NativeValue::Int(v) => v as i64,
            NativeValue::Long(v) => v,
            NativeValue::Float(v) => v as i64,
            NativeValue::Double(v) => v as i64,
            NativeValue::Pointer(v) => v as i64,
            NativeValue::Bool(v) => v as i64,
            NativeValue::Void => 0,
        }
    }

    fn as_f64(&self) -> f64 {
        match *self {
            NativeValue::Float(v) => v as f64,
            NativeValue::Double(v) => v,
            other => other.as_i64() as f64,
        }
    }

    /// Convert to `ty`, numerically where the types differ
    pub fn coerce(self, ty: NativeType) -> Self {
        if self.native_type() == ty {
            return self;
        }
        warn!(
            from = %self.native_type(),
            to = %ty,
            "callback returned a mismatched type; converting"
        );
        match ty {
            NativeType::Int => NativeValue::Int(self.as_i64() as i32),
            NativeType::Long => NativeValue::Long(self.as_i64()),
            NativeType::Float => NativeValue::Float(self.as_f64() as f32),
            NativeType::Double => NativeValue::Double(self.as_f64()),
            NativeType::Pointer => NativeValue::Pointer(self.as_i64() as usize),
            NativeType::Bool => NativeValue::Bool(self.as_i64() != 0),
            NativeType::Void => NativeValue::Void,
        }
    }

    /// Store this value in libffi's return slot. Integral values are widened to
    /// `ffi_arg` as libffi requires.
    ///
    /// # Safety
    ///
    /// `slot` must be the return buffer for a signature returning this value's type.
    pub(crate) unsafe fn write_result(self, slot: *mut c_void) {
        match self {
            NativeValue::Int(v) => {
                ptr::write_unaligned(slot.cast::<raw::ffi_sarg>(), v as raw::ffi_sarg)
            }
            NativeValue::Long(v) => {
                ptr::write_unaligned(slot.cast::<raw::ffi_sarg>(), v as raw::ffi_sarg)
            }
            NativeValue::Float(v) => ptr::write_unaligned(slot.cast::<f32>(), v),
            NativeValue::Double(v) => ptr::write_unaligned(slot.cast::<f64>(), v),
            NativeValue::Pointer(v) => {
                ptr::write_unaligned(slot.cast::<raw::ffi_arg>(), v as raw::ffi_arg)
            }
            NativeValue::Bool(v) => {
                ptr::write_unaligned(slot.cast::<raw::ffi_arg>(), v as raw::ffi_arg)
            }
            NativeValue::Void => {}
        }
    }
}

/// Native calling conventions a stub can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallingConvention {
    Cdecl,
    Stdcall,
    Fastcall,
    Thiscall,
    /// The target's default C ABI
    #[default]
    Platform,
}

impl CallingConvention {
    #[cfg(target_arch = "x86")]
    fn abi(self) -> raw::ffi_abi {
        match self {
            CallingConvention::Cdecl => raw::ffi_abi_FFI_SYSV,
            CallingConvention::Stdcall => raw::ffi_abi_FFI_STDCALL,
            CallingConvention::Fastcall => raw::ffi_abi_FFI_FASTCALL,
            CallingConvention::Thiscall => raw::ffi_abi_FFI_THISCALL,
            CallingConvention::Platform => raw::ffi_abi_FFI_DEFAULT_ABI,
        }
    }

    /// Whether both conventions lower to the same ABI on this target.
    /// Only 32-bit x86 distinguishes them.
    pub fn same_abi(self, other: CallingConvention) -> bool {
        #[cfg(target_arch = "x86")]
        {
            self.abi() == other.abi()
        }
        #[cfg(not(target_arch = "x86"))]
        {
            let _ = other;
            true
        }
    }

    /// Whether a callback declared with `self` may be exported through a stub
    /// requested as `requested`. Named conventions must match exactly; `Platform`
    /// matches whichever named convention shares its ABI.
    pub fn accepts(self, requested: CallingConvention) -> bool {
        self == requested
            || ((self == CallingConvention::Platform || requested == CallingConvention::Platform)
                && self.same_abi(requested))
    }

    #[cfg_attr(not(target_arch = "x86"), allow(unused_variables, unused_mut))]
    fn apply(self, cif: &mut Cif) {
        #[cfg(target_arch = "x86")]
        cif.set_abi(self.abi());
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallingConvention::Cdecl => "cdecl",
            CallingConvention::Stdcall => "stdcall",
            CallingConvention::Fastcall => "fastcall",
            CallingConvention::Thiscall => "thiscall",
            CallingConvention::Platform => "platform",
        };
        f.write_str(name)
    }
}

/// How a callback is exported to native code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThunkKind {
    /// The callback's own address, for context-free functions only
    Passthrough,
    /// A generated trampoline using the given convention
    Stub(CallingConvention),
}

impl fmt::Display for ThunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThunkKind::Passthrough => f.write_str("passthrough"),
            ThunkKind::Stub(conv) => write!(f, "stub({})", conv),
        }
    }
}

/// Parameter and return types of a callback
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    params: Vec<NativeType>,
    ret: NativeType,
}

impl Signature {
    /// Build a signature; `void` is only valid as a return type.
    pub fn new(params: impl Into<Vec<NativeType>>, ret: NativeType) -> Result<Self> {
        let params = params.into();
        if params.contains(&NativeType::Void) {
            return Err(InteropError::invalid_operation(
                "void is not a valid parameter type",
            ));
        }
        Ok(Self { params, ret })
    }

    pub fn params(&self) -> &[NativeType] {
        &self.params
    }

    pub fn ret(&self) -> NativeType {
        self.ret
    }

    /// libffi call interface for this signature under `convention`
    pub(crate) fn cif(&self, convention: CallingConvention) -> Cif {
        let mut cif = Cif::new(
            self.params.iter().map(|t| t.ffi_type()),
            self.ret.ffi_type(),
        );
        convention.apply(&mut cif);
        cif
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "({}) -> {}", params, self.ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_signature_rejects_void_param() {
        assert!(Signature::new([NativeType::Void], NativeType::Int).is_err());
        let sig = Signature::new([NativeType::Int, NativeType::Pointer], NativeType::Void).unwrap();
        assert_eq!(sig.to_string(), "(int, void*) -> void");
    }

    #[rstest]
    #[case(NativeValue::Int(7), NativeType::Long, NativeValue::Long(7))]
    #[case(NativeValue::Double(2.9), NativeType::Int, NativeValue::Int(2))]
    #[case(NativeValue::Int(0), NativeType::Bool, NativeValue::Bool(false))]
    #[case(NativeValue::Long(3), NativeType::Double, NativeValue::Double(3.0))]
    #[case(NativeValue::Pointer(16), NativeType::Pointer, NativeValue::Pointer(16))]
    fn test_coerce(
        #[case] value: NativeValue,
        #[case] ty: NativeType,
        #[case] expected: NativeValue,
    ) {
        assert_eq!(value.coerce(ty), expected);
    }

    #[test]
    fn test_convention_acceptance() {
        use CallingConvention::*;
        assert!(Cdecl.accepts(Cdecl));
        assert!(!Cdecl.accepts(Stdcall));
        assert!(!Stdcall.accepts(Fastcall));
        assert!(Platform.accepts(Platform));
        #[cfg(not(target_arch = "x86"))]
        assert!(Platform.accepts(Stdcall));
    }

    #[test]
    fn test_read_and_write_slots() {
        let arg: c_int = -5;
        let value = unsafe { NativeType::Int.read((&arg as *const c_int).cast()) };
        assert_eq!(value, NativeValue::Int(-5));

        let mut slot: raw::ffi_arg = 0;
        unsafe { NativeValue::Int(-5).write_result((&mut slot as *mut raw::ffi_arg).cast()) };
        assert_eq!(slot as raw::ffi_sarg, -5);
    }
}
