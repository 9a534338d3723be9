//! Native allocator strategies
//!
//! The strategy is chosen once, when an [`Interop`](crate::Interop) is built:
//! - `system`: the C heap (`calloc`/`free`), so blocks are compatible with native code
//!   that frees with the C runtime.
//! - `rust`: the Rust global allocator.
//!
//! Both return zero-initialised memory.

use serde::{Deserialize, Serialize};
use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;

use crate::error::InteropError;

/// Alignment of blocks from the Rust heap (matches `max_align_t` on 64-bit targets)
const RUST_HEAP_ALIGN: usize = 16;

/// Source of raw native memory
pub trait NativeAllocator: Send + Sync {
    /// Strategy name, for diagnostics
    fn name(&self) -> &'static str;

    /// Allocate `size` zeroed bytes; `None` when the request cannot be satisfied.
    fn allocate_zeroed(&self, size: usize) -> Option<NonNull<u8>>;

    /// Release a block.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate_zeroed` on this allocator with the same `size`,
    /// and must not be released twice.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize);
}

/// Allocation strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorStrategy {
    /// C heap
    #[default]
    System,
    /// Rust global allocator
    Rust,
}

impl AllocatorStrategy {
    /// Instantiate the allocator for this strategy
    pub fn allocator(self) -> Box<dyn NativeAllocator> {
        match self {
            AllocatorStrategy::System => Box::new(SystemHeap),
            AllocatorStrategy::Rust => Box::new(RustHeap),
        }
    }

    /// Name as written in configuration
    pub fn as_str(self) -> &'static str {
        match self {
            AllocatorStrategy::System => "system",
            AllocatorStrategy::Rust => "rust",
        }
    }
}

impl fmt::Display for AllocatorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocatorStrategy {
    type Err = InteropError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(AllocatorStrategy::System),
            "rust" => Ok(AllocatorStrategy::Rust),
            other => Err(InteropError::invalid_operation(format!(
                "unknown allocator strategy '{}'",
                other
            ))),
        }
    }
}

/// The C heap
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHeap;

impl NativeAllocator for SystemHeap {
    fn name(&self) -> &'static str {
        "system"
    }

    fn allocate_zeroed(&self, size: usize) -> Option<NonNull<u8>> {
        // calloc(0) may return NULL or a unique pointer; ask for one byte instead.
        let ptr = unsafe { libc::calloc(1, size.max(1)) };
        NonNull::new(ptr.cast::<u8>())
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _size: usize) {
        libc::free(ptr.as_ptr().cast::<libc::c_void>());
    }
}

/// The Rust global allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct RustHeap;

impl RustHeap {
    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.max(1), RUST_HEAP_ALIGN).ok()
    }
}

impl NativeAllocator for RustHeap {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn allocate_zeroed(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout(size)?;
        NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = Self::layout(size) {
            alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}
