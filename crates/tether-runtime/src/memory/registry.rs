//! Allocation registry
//!
//! Tracks every block of native memory handed out by an [`Interop`](crate::Interop),
//! keyed by address. An address is present exactly while its block is live, so a
//! second release finds nothing and is reported rather than faulting.

use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;

use tracing::{trace, warn};

use super::sharded::ShardedMap;
use super::strategy::{AllocatorStrategy, NativeAllocator};
use crate::error::{InteropError, Result};
use crate::handle::Handle;

/// Size of the BStr length header preceding the payload
pub const BSTR_HEADER: usize = size_of::<u32>();

/// Native release function for adopted blocks
pub type ReleaseFn = unsafe extern "C" fn(*mut c_void);

/// How a block was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Plain heap block; the handle is the allocation
    Heap,
    /// Length-prefixed block; the allocation starts `BSTR_HEADER` bytes before the handle
    BStr,
    /// Caller-supplied address
    Adopted,
}

/// Registry entry for a live block
#[derive(Clone, Copy)]
pub struct BlockInfo {
    /// Usable bytes starting at the handle
    pub len: usize,
    /// Origin of the block
    pub kind: BlockKind,
    release: Option<ReleaseFn>,
}

impl fmt::Debug for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockInfo")
            .field("len", &self.len)
            .field("kind", &self.kind)
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

/// Concurrent address → block map plus the allocator that backs it
pub struct AllocationRegistry {
    blocks: ShardedMap<BlockInfo>,
    allocator: Box<dyn NativeAllocator>,
}

impl AllocationRegistry {
    /// Create a registry backed by `strategy`
    pub fn new(strategy: AllocatorStrategy, shards: usize) -> Self {
        Self::with_allocator(strategy.allocator(), shards)
    }

    /// Create a registry backed by a custom allocator
    pub fn with_allocator(allocator: Box<dyn NativeAllocator>, shards: usize) -> Self {
        Self {
            blocks: ShardedMap::new(shards),
            allocator,
        }
    }

    /// Name of the backing allocator
    pub fn allocator_name(&self) -> &'static str {
        self.allocator.name()
    }

    /// Allocate `len` zero-initialised bytes and register them
    pub fn allocate(&self, len: usize) -> Result<Handle> {
        let ptr = self
            .allocator
            .allocate_zeroed(len)
            .ok_or(InteropError::OutOfMemory { requested: len })?;
        let handle = Handle::from_ptr(ptr.as_ptr());
        self.register_fresh(
            handle,
            BlockInfo {
                len,
                kind: BlockKind::Heap,
                release: None,
            },
        );
        trace!(%handle, len, "allocated block");
        Ok(handle)
    }

    /// Allocate a length-prefixed block for `payload_bytes` bytes plus a two-byte
    /// terminator. The little-endian header holds `payload_bytes`; the returned handle
    /// points at the payload.
    pub fn allocate_bstr(&self, payload_bytes: usize) -> Result<Handle> {
        let header = u32::try_from(payload_bytes).map_err(|_| InteropError::OutOfMemory {
            requested: payload_bytes,
        })?;
        let usable = payload_bytes
            .checked_add(size_of::<u16>())
            .ok_or(InteropError::OutOfMemory {
                requested: payload_bytes,
            })?;
        let total = usable
            .checked_add(BSTR_HEADER)
            .ok_or(InteropError::OutOfMemory { requested: usable })?;

        let base = self
            .allocator
            .allocate_zeroed(total)
            .ok_or(InteropError::OutOfMemory { requested: total })?;
        unsafe {
            std::ptr::write_unaligned(base.as_ptr().cast::<u32>(), header.to_le());
        }

        let handle = Handle::from_addr(base.as_ptr() as usize + BSTR_HEADER);
        self.register_fresh(
            handle,
            BlockInfo {
                len: usable,
                kind: BlockKind::BStr,
                release: None,
            },
        );
        trace!(%handle, payload_bytes, "allocated bstr");
        Ok(handle)
    }

    // An existing entry here is an adopted address that was returned to the heap
    // without going through `free`.
    fn register_fresh(&self, handle: Handle, info: BlockInfo) {
        if let Some(stale) = self.blocks.insert(handle.addr(), info) {
            warn!(
                %handle,
                kind = ?stale.kind,
                "allocator reused a registered address; dropping stale entry"
            );
        }
    }

    /// Register a caller-supplied address so it is released through the same path as
    /// every other block. `release` runs on free; without one, free only forgets the
    /// address.
    pub fn adopt(
        &self,
        handle: Handle,
        len: usize,
        release: Option<ReleaseFn>,
    ) -> Result<Handle> {
        if handle.is_null() {
            return Err(InteropError::invalid_operation("cannot adopt a null address"));
        }
        let info = BlockInfo {
            len,
            kind: BlockKind::Adopted,
            release,
        };
        if self.blocks.try_insert(handle.addr(), info).is_err() {
            return Err(InteropError::invalid_operation(format!(
                "address {} is already registered",
                handle
            )));
        }
        trace!(%handle, len, "adopted block");
        Ok(handle)
    }

    /// Remove a block from the registry without releasing its memory.
    ///
    /// Of several concurrent callers for the same handle, exactly one receives the
    /// entry; the winner must pass it to [`dispose`](Self::dispose).
    pub fn claim(&self, handle: Handle) -> Option<BlockInfo> {
        self.blocks.remove(handle.addr())
    }

    /// Release the memory of a claimed block.
    ///
    /// # Safety
    ///
    /// `info` must be the entry returned by [`claim`](Self::claim) for `handle`.
    pub unsafe fn dispose(&self, handle: Handle, info: BlockInfo) {
        match info.kind {
            BlockKind::Heap => {
                if let Some(ptr) = NonNull::new(handle.as_ptr::<u8>()) {
                    self.allocator.deallocate(ptr, info.len);
                }
            }
            BlockKind::BStr => {
                let base = handle.addr() - BSTR_HEADER;
                if let Some(ptr) = NonNull::new(base as *mut u8) {
                    self.allocator.deallocate(ptr, info.len + BSTR_HEADER);
                }
            }
            BlockKind::Adopted => {
                if let Some(release) = info.release {
                    release(handle.as_ptr::<c_void>());
                }
            }
        }
        trace!(%handle, kind = ?info.kind, "released block");
    }

    /// Claim and dispose in one step. Returns whether the handle was known.
    pub fn release(&self, handle: Handle) -> bool {
        match self.claim(handle) {
            Some(info) => {
                unsafe { self.dispose(handle, info) };
                true
            }
            None => false,
        }
    }

    /// Whether the handle is a live block
    pub fn contains(&self, handle: Handle) -> bool {
        self.blocks.contains(handle.addr())
    }

    /// Metadata for a live block
    pub fn info(&self, handle: Handle) -> Option<BlockInfo> {
        self.blocks.get(handle.addr())
    }

    /// Number of live blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if no blocks are live
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Drop for AllocationRegistry {
    fn drop(&mut self) {
        let remaining = self.blocks.drain();
        if !remaining.is_empty() {
            trace!(count = remaining.len(), "releasing blocks still live at teardown");
        }
        for (addr, info) in remaining {
            unsafe { self.dispose(Handle::from_addr(addr), info) };
        }
    }
}

impl fmt::Debug for AllocationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationRegistry")
            .field("allocator", &self.allocator.name())
            .field("live_blocks", &self.blocks.len())
            .finish()
    }
}
