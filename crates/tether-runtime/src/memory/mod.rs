//! Native memory: allocator strategies, the allocation registry and raw views
//!
//! Blocks are identified by their address ([`Handle`](crate::Handle)) plus the length
//! recorded in the registry; no Rust reference to native memory is kept between calls.

pub mod registry;
pub(crate) mod sharded;
pub mod strategy;
pub mod view;

pub use registry::{AllocationRegistry, BlockInfo, BlockKind, ReleaseFn, BSTR_HEADER};
pub use strategy::{AllocatorStrategy, NativeAllocator, RustHeap, SystemHeap};
pub use view::RawView;
