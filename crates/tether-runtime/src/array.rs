//! String array marshaling
//!
//! A string array is a block of `count` pointer-sized slots, each holding a string
//! handle. Arrays built here carry a record of their element count, so `free` on the
//! array releases every element and then the table.

use std::mem::size_of;

use tracing::trace;

use crate::codec::{self, Encoding};
use crate::error::{InteropError, Result};
use crate::handle::Handle;
use crate::interop::Interop;
use crate::memory::RawView;

impl Interop {
    /// Encode every string with `encoding` into a new pointer table
    pub fn encode_array<S: AsRef<str>>(&self, strings: &[S], encoding: Encoding) -> Result<Handle> {
        self.encode_array_with(strings, |text| self.encode(text, encoding))
    }

    /// Encode every string with a custom encoder into a new pointer table.
    ///
    /// Handles returned by `encoder` become owned by the array and are released with it.
    /// If any element fails, everything encoded so far is released.
    pub fn encode_array_with<S, F>(&self, strings: &[S], mut encoder: F) -> Result<Handle>
    where
        S: AsRef<str>,
        F: FnMut(&str) -> Result<Handle>,
    {
        let count = strings.len();
        let len = count
            .checked_mul(size_of::<usize>())
            .ok_or(InteropError::OutOfMemory { requested: usize::MAX })?;

        let mut elements = Vec::with_capacity(count);
        for text in strings {
            match encoder(text.as_ref()) {
                Ok(handle) => elements.push(handle),
                Err(err) => {
                    for handle in elements {
                        self.free(handle);
                    }
                    return Err(err);
                }
            }
        }

        let table = match self.allocate(len) {
            Ok(table) => table,
            Err(err) => {
                for handle in elements {
                    self.free(handle);
                }
                return Err(err);
            }
        };
        if let Some(mut view) = unsafe { RawView::new(table, len) } {
            for (i, handle) in elements.iter().enumerate() {
                view.write_slot(i, handle.addr());
            }
        }
        self.arrays.insert(table.addr(), count);

        trace!(%table, count, "encoded string array");
        Ok(table)
    }

    /// Decode `count` strings from a pointer table. `None` for a null table; null
    /// elements decode to `None` entries.
    ///
    /// The count is not checked against any record: the table may come from native
    /// code.
    ///
    /// # Safety
    ///
    /// `handle` must point to `count` readable pointer slots, each null or valid for
    /// `encoding` (see [`codec`]).
    pub unsafe fn decode_array(
        &self,
        handle: Handle,
        count: usize,
        encoding: Encoding,
    ) -> Option<Vec<Option<String>>> {
        self.decode_array_with(handle, count, |element| codec::decode(element, encoding))
    }

    /// Decode `count` pointers with a custom decoder.
    ///
    /// # Safety
    ///
    /// `handle` must point to `count` readable pointer slots, and `decoder` must be
    /// sound for each of them.
    pub unsafe fn decode_array_with<T, F>(
        &self,
        handle: Handle,
        count: usize,
        mut decoder: F,
    ) -> Option<Vec<T>>
    where
        F: FnMut(Handle) -> T,
    {
        let len = count.checked_mul(size_of::<usize>())?;
        let view = RawView::new(handle, len)?;
        let pointers: Vec<Handle> = (0..count)
            .map(|i| Handle::from_addr(view.read_slot(i)))
            .collect();
        drop(view);
        Some(pointers.into_iter().map(&mut decoder).collect())
    }

    /// Element count recorded for an array built by [`encode_array`](Self::encode_array)
    pub fn array_len(&self, handle: Handle) -> Option<usize> {
        self.arrays.get(handle.addr())
    }
}
