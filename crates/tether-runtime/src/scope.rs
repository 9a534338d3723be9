//! Call-scoped marshaling
//!
//! Bindings convert arguments into native blocks just before a native call and release
//! them right after. A [`MarshalScope`] records every handle it produces and frees them
//! all on drop, unless the callee took ownership and the handle was [`kept`](MarshalScope::keep).

use crate::codec::Encoding;
use crate::error::Result;
use crate::handle::Handle;
use crate::interop::Interop;

/// Tracks blocks produced for one native call
///
/// # Example
///
/// ```
/// # use tether_runtime::{Encoding, Interop};
/// let interop = Interop::default();
/// {
///     let mut scope = interop.scope();
///     let name = scope.encode("config.toml", Encoding::Wide).unwrap();
///     assert!(interop.is_allocated(name));
/// }
/// assert_eq!(interop.live_blocks(), 0);
/// ```
pub struct MarshalScope<'a> {
    interop: &'a Interop,
    owned: Vec<Handle>,
}

impl<'a> MarshalScope<'a> {
    pub fn new(interop: &'a Interop) -> Self {
        Self {
            interop,
            owned: Vec::new(),
        }
    }

    pub fn allocate(&mut self, length: usize) -> Result<Handle> {
        let handle = self.interop.allocate(length)?;
        self.owned.push(handle);
        Ok(handle)
    }

    pub fn encode(&mut self, text: &str, encoding: Encoding) -> Result<Handle> {
        let handle = self.interop.encode(text, encoding)?;
        self.owned.push(handle);
        Ok(handle)
    }

    /// `None` marshals to a null pointer and is not tracked.
    pub fn encode_opt(&mut self, text: Option<&str>, encoding: Encoding) -> Result<Handle> {
        match text {
            Some(text) => self.encode(text, encoding),
            None => Ok(Handle::NULL),
        }
    }

    pub fn encode_array<S: AsRef<str>>(
        &mut self,
        strings: &[S],
        encoding: Encoding,
    ) -> Result<Handle> {
        let handle = self.interop.encode_array(strings, encoding)?;
        self.owned.push(handle);
        Ok(handle)
    }

    /// Stop tracking `handle`; the caller (or the native callee) now owns it.
    /// Returns whether the scope was tracking it.
    pub fn keep(&mut self, handle: Handle) -> bool {
        match self.owned.iter().position(|&h| h == handle) {
            Some(index) => {
                self.owned.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of handles released on drop
    pub fn tracked(&self) -> usize {
        self.owned.len()
    }
}

impl Drop for MarshalScope<'_> {
    fn drop(&mut self) {
        for handle in self.owned.drain(..) {
            self.interop.free(handle);
        }
    }
}

impl Interop {
    /// Start a marshaling scope
    pub fn scope(&self) -> MarshalScope<'_> {
        MarshalScope::new(self)
    }
}
