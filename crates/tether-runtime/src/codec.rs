//! String codec - host strings ↔ native string encodings
//!
//! | Encoding | Layout | Block size |
//! |----------|--------|------------|
//! | `Narrow` | UTF-8 bytes, zero byte | `3 * utf16_units + 1` |
//! | `Utf8`   | UTF-8 bytes, zero byte | `3 * utf16_units + 1` |
//! | `Wide`   | UTF-16 units, zero unit | `(utf16_units + 1) * 2` |
//! | `BStr`   | `u32` LE byte length, UTF-16 units, zero unit | header + payload + 2 |
//!
//! The narrow code page is UTF-8 on every supported target, so `Narrow` and `Utf8`
//! share a layout. BStr handles point at the payload, just past the length header.
//!
//! # Safety
//!
//! Decoding reads raw memory. For the terminated encodings the caller guarantees the
//! memory holds a terminator; for BStr that the four bytes before the handle hold the
//! payload length.

use std::fmt;
use std::mem::size_of;

use crate::error::{InteropError, Result};
use crate::handle::Handle;
use crate::interop::Interop;
use crate::memory::view::{read_units, scan_terminated_bytes, scan_terminated_units};
use crate::memory::{RawView, BSTR_HEADER};

/// Native string encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Platform narrow (ANSI) code page
    Narrow,
    Utf8,
    /// UTF-16
    Wide,
    /// Length-prefixed UTF-16
    BStr,
}

impl Encoding {
    pub const ALL: [Encoding; 4] = [
        Encoding::Narrow,
        Encoding::Utf8,
        Encoding::Wide,
        Encoding::BStr,
    ];

    /// Decode a selector value passed by generated bindings
    pub fn from_raw(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Encoding::Narrow),
            1 => Ok(Encoding::Utf8),
            2 => Ok(Encoding::Wide),
            3 => Ok(Encoding::BStr),
            other => Err(InteropError::InvalidEncoding(other)),
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Encoding::Narrow => 0,
            Encoding::Utf8 => 1,
            Encoding::Wide => 2,
            Encoding::BStr => 3,
        }
    }

    /// Whether the encoded form ends at the first zero byte or unit
    pub fn is_terminated(self) -> bool {
        !matches!(self, Encoding::BStr)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::Narrow => "narrow",
            Encoding::Utf8 => "utf8",
            Encoding::Wide => "wide",
            Encoding::BStr => "bstr",
        };
        f.write_str(name)
    }
}

/// Upper bound on the narrow encoding of `text`, excluding the terminator
pub fn max_encoded_len(text: &str) -> Option<usize> {
    text.encode_utf16().count().checked_mul(3)
}

fn size_overflow(text: &str) -> InteropError {
    InteropError::OutOfMemory {
        requested: text.len().saturating_mul(3).saturating_add(1),
    }
}

impl Interop {
    /// Encode `text` into a newly allocated block; release it with `free`.
    pub fn encode(&self, text: &str, encoding: Encoding) -> Result<Handle> {
        if encoding.is_terminated() && text.contains('\0') {
            return Err(InteropError::invalid_operation(format!(
                "text with an interior NUL cannot be encoded as {}",
                encoding
            )));
        }

        match encoding {
            Encoding::Narrow | Encoding::Utf8 => {
                let len = max_encoded_len(text)
                    .and_then(|n| n.checked_add(1))
                    .ok_or_else(|| size_overflow(text))?;
                let handle = self.allocate(len)?;
                self.fill(handle, len, |view| {
                    view.write_bytes(0, text.as_bytes());
                    view.write_bytes(text.len(), &[0]);
                });
                Ok(handle)
            }
            Encoding::Wide => {
                let mut units: Vec<u16> = text.encode_utf16().collect();
                units.push(0);
                let len = units
                    .len()
                    .checked_mul(size_of::<u16>())
                    .ok_or_else(|| size_overflow(text))?;
                let handle = self.allocate(len)?;
                self.fill(handle, len, |view| view.write_units(0, &units));
                Ok(handle)
            }
            Encoding::BStr => {
                let units: Vec<u16> = text.encode_utf16().collect();
                let payload = units
                    .len()
                    .checked_mul(size_of::<u16>())
                    .ok_or_else(|| size_overflow(text))?;
                let handle = self.blocks.allocate_bstr(payload)?;
                self.fill(handle, payload + size_of::<u16>(), |view| {
                    view.write_units(0, &units)
                });
                Ok(handle)
            }
        }
    }

    /// Encode with a raw selector from generated bindings
    pub fn encode_raw(&self, text: &str, selector: u32) -> Result<Handle> {
        self.encode(text, Encoding::from_raw(selector)?)
    }

    /// Encode an optional string; `None` becomes [`Handle::NULL`].
    pub fn encode_opt(&self, text: Option<&str>, encoding: Encoding) -> Result<Handle> {
        match text {
            Some(text) => self.encode(text, encoding),
            None => Ok(Handle::NULL),
        }
    }

    /// Decode a native string. `None` for a null handle.
    ///
    /// # Safety
    ///
    /// See the [module documentation](self).
    pub unsafe fn decode(&self, handle: Handle, encoding: Encoding) -> Option<String> {
        decode(handle, encoding)
    }

    /// Decode with a raw selector from generated bindings
    ///
    /// # Safety
    ///
    /// See the [module documentation](self).
    pub unsafe fn decode_raw(&self, handle: Handle, selector: u32) -> Result<Option<String>> {
        Ok(decode(handle, Encoding::from_raw(selector)?))
    }

    fn fill(&self, handle: Handle, len: usize, write: impl FnOnce(&mut RawView<'_>)) {
        // Freshly allocated and not yet published: nothing else can reach it.
        if let Some(mut view) = unsafe { RawView::new(handle, len) } {
            write(&mut view);
        }
    }
}

/// Decode a native string without going through an [`Interop`]. `None` for a null
/// handle.
///
/// # Safety
///
/// See the [module documentation](self).
pub unsafe fn decode(handle: Handle, encoding: Encoding) -> Option<String> {
    if handle.is_null() {
        return None;
    }
    let text = match encoding {
        Encoding::Narrow | Encoding::Utf8 => {
            String::from_utf8_lossy(scan_terminated_bytes(handle)).into_owned()
        }
        Encoding::Wide => String::from_utf16_lossy(&scan_terminated_units(handle)),
        Encoding::BStr => {
            let bytes = bstr_byte_len(handle)? as usize;
            String::from_utf16_lossy(&read_units(handle, bytes / size_of::<u16>()))
        }
    };
    Some(text)
}

/// Payload length in bytes stored in a BStr header.
///
/// # Safety
///
/// `handle` must be null or a BStr payload pointer.
pub unsafe fn bstr_byte_len(handle: Handle) -> Option<u32> {
    if handle.is_null() {
        return None;
    }
    let header = (handle.addr() - BSTR_HEADER) as *const u32;
    Some(u32::from_le(std::ptr::read_unaligned(header)))
}
