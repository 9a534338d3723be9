//! Scoped views over raw native memory
//!
//! All reads and writes of bytes at a native address go through a [`RawView`] created
//! for one operation and dropped at its end. Views never outlive the call that made
//! them, so no Rust reference to native memory is retained across calls.

use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr::{self, NonNull};

use crate::handle::Handle;

/// Bounds-checked window onto `len` bytes at a native address
pub struct RawView<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _scope: PhantomData<&'a mut [u8]>,
}

impl<'a> RawView<'a> {
    /// Create a view; `None` for a null handle.
    ///
    /// # Safety
    ///
    /// `len` bytes starting at `handle` must be valid for reads and writes for `'a`,
    /// and nothing else may access them while the view is alive.
    pub unsafe fn new(handle: Handle, len: usize) -> Option<Self> {
        NonNull::new(handle.as_ptr::<u8>()).map(|ptr| Self {
            ptr,
            len,
            _scope: PhantomData,
        })
    }

    /// View length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if view is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The viewed bytes
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Copy `bytes` in at `offset`.
    ///
    /// # Panics
    ///
    /// If the write would leave the view.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.check(offset, bytes.len());
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr().add(offset), bytes.len());
        }
    }

    /// Copy UTF-16 code units in at byte `offset`, native endian.
    pub fn write_units(&mut self, offset: usize, units: &[u16]) {
        self.check(offset, units.len() * size_of::<u16>());
        for (i, unit) in units.iter().enumerate() {
            unsafe {
                ptr::write_unaligned(
                    self.ptr.as_ptr().add(offset + i * size_of::<u16>()).cast::<u16>(),
                    *unit,
                );
            }
        }
    }

    /// Read the `index`th pointer-sized slot
    pub fn read_slot(&self, index: usize) -> usize {
        let offset = index * size_of::<usize>();
        self.check(offset, size_of::<usize>());
        unsafe { ptr::read_unaligned(self.ptr.as_ptr().add(offset).cast::<usize>()) }
    }

    /// Write the `index`th pointer-sized slot
    pub fn write_slot(&mut self, index: usize, value: usize) {
        let offset = index * size_of::<usize>();
        self.check(offset, size_of::<usize>());
        unsafe { ptr::write_unaligned(self.ptr.as_ptr().add(offset).cast::<usize>(), value) }
    }

    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).map_or(false, |end| end <= self.len),
            "raw view access out of bounds: {}+{} > {}",
            offset,
            len,
            self.len
        );
    }
}

/// Bytes up to (not including) the first zero byte.
///
/// # Safety
///
/// `handle` must be non-null and point to a zero-terminated byte sequence.
pub unsafe fn scan_terminated_bytes<'a>(handle: Handle) -> &'a [u8] {
    std::ffi::CStr::from_ptr(handle.as_ptr::<std::ffi::c_char>()).to_bytes()
}

/// UTF-16 code units up to (not including) the first zero unit.
///
/// # Safety
///
/// `handle` must be non-null and point to a zero-terminated sequence of 16-bit units.
pub unsafe fn scan_terminated_units(handle: Handle) -> Vec<u16> {
    let base = handle.as_ptr::<u16>() as *const u16;
    let mut units = Vec::new();
    loop {
        let unit = ptr::read_unaligned(base.add(units.len()));
        if unit == 0 {
            return units;
        }
        units.push(unit);
    }
}

/// `count` UTF-16 code units starting at `handle`.
///
/// # Safety
///
/// `count * 2` bytes at `handle` must be readable.
pub unsafe fn read_units(handle: Handle, count: usize) -> Vec<u16> {
    let base = handle.as_ptr::<u16>() as *const u16;
    (0..count).map(|i| ptr::read_unaligned(base.add(i))).collect()
}
